/// Decodes raw chat log text into timestamped `LineEvent`s.
///
/// Chat log line format (CRLF terminated):
///
///   YY-MM-DD<TAB>HH:MM:SS<TAB>PAYLOAD
///   0  3  6  8   9  12 15 17  18
///
/// The header is read positionally: six two-digit fields at fixed offsets,
/// `-`, tab and `:` separators between them, a tab at byte 17, payload from
/// byte 18 onwards. Lines that do not have
/// this shape (client diagnostics, blank lines, the file's preamble) are
/// dropped without error.
use crate::error::TailError;
use chrono::{DateTime, Local, NaiveDate, TimeZone};
use serde::Serialize;

/// Width of the positional `YY-MM-DD\tHH:MM:SS\t` header.
pub const HEADER_LEN: usize = 18;

/// Offsets of the YY, MM, DD, hh, mm, ss fields inside the header.
const FIELD_OFFSETS: [usize; 6] = [0, 3, 6, 9, 12, 15];

/// Separator byte expected at each offset between the fields.
const SEPARATORS: [(usize, u8); 6] =
    [(2, b'-'), (5, b'-'), (8, b'\t'), (11, b':'), (14, b':'), (17, b'\t')];

/// Upper bound on an unterminated line carried between reads.
const MAX_PENDING_BYTES: usize = 1024 * 1024;

/// One recognised chat line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineEvent {
    pub timestamp: DateTime<Local>,
    pub payload:   String,
}

// ---------------------------------------------------------------------------
// Line decoding
// ---------------------------------------------------------------------------

/// Read a two-digit ASCII field at `at`. Rejects signs, spaces and anything
/// a generic integer parse would accept beyond two plain digits.
fn two_digits(bytes: &[u8], at: usize) -> Option<u32> {
    let hi = *bytes.get(at)?;
    let lo = *bytes.get(at + 1)?;
    if !hi.is_ascii_digit() || !lo.is_ascii_digit() {
        return None;
    }
    Some(u32::from(hi - b'0') * 10 + u32::from(lo - b'0'))
}

fn parse_header(bytes: &[u8]) -> Option<DateTime<Local>> {
    if !SEPARATORS.iter().all(|&(at, sep)| bytes.get(at) == Some(&sep)) {
        return None;
    }
    let mut f = [0u32; 6];
    for (slot, &at) in f.iter_mut().zip(FIELD_OFFSETS.iter()) {
        *slot = two_digits(bytes, at)?;
    }
    let [yy, month, day, hour, minute, second] = f;

    let naive = NaiveDate::from_ymd_opt(2000 + yy as i32, month, day)?
        .and_hms_opt(hour, minute, second)?;

    // DST gap -> None (dropped); DST overlap -> earlier instant.
    Local.from_local_datetime(&naive).earliest()
}

/// Decode one line (terminator already stripped) or explain why not.
pub fn try_decode_line(line: &str) -> Result<LineEvent, TailError> {
    let bytes = line.as_bytes();
    if bytes.len() <= HEADER_LEN {
        return Err(TailError::MalformedLine);
    }
    let timestamp = parse_header(bytes).ok_or(TailError::MalformedLine)?;

    // Bytes 0..18 are all ASCII once the header parsed, so 18 is a char boundary.
    Ok(LineEvent { timestamp, payload: line[HEADER_LEN..].to_owned() })
}

pub fn decode_line(line: &str) -> Option<LineEvent> {
    try_decode_line(line).ok()
}

/// Split `raw` into lines and decode every line with a valid header, in order.
pub fn decode(raw: &str) -> Vec<LineEvent> {
    raw.split('\n')
        .map(|l| l.trim_end_matches(['\r', '\n']))
        .filter_map(|l| match try_decode_line(l) {
            Ok(event) => Some(event),
            Err(_) => {
                if !l.is_empty() {
                    tracing::trace!("dropping non-chat line: {:?}", l);
                }
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Partial-line carry-over
// ---------------------------------------------------------------------------

/// Bytes of the last read that did not end on a line boundary.
///
/// The writer flushes whenever it likes, so a poll can observe half a line.
/// Those bytes are held here and prefixed to the next read; only text up to
/// the last `\n` is ever handed to `decode`.
#[derive(Debug, Default)]
pub struct PendingFragment {
    tail: Vec<u8>,
}

impl PendingFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `bytes` and return the text of every line now complete.
    /// Returns `None` while no line terminator has been seen.
    pub fn complete(&mut self, bytes: &[u8]) -> Option<String> {
        self.tail.extend_from_slice(bytes);

        let Some(last_nl) = self.tail.iter().rposition(|&b| b == b'\n') else {
            if self.tail.len() > MAX_PENDING_BYTES {
                tracing::warn!(
                    "Discarding {} bytes of unterminated log text",
                    self.tail.len()
                );
                self.tail.clear();
            }
            return None;
        };

        let rest = self.tail.split_off(last_nl + 1);
        let done = std::mem::replace(&mut self.tail, rest);
        Some(String::from_utf8_lossy(&done).into_owned())
    }

    pub fn len(&self) -> usize {
        self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tail.is_empty()
    }

    pub fn clear(&mut self) {
        self.tail.clear();
    }
}
