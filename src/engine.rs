/// Tailing state machine: decides what the poll loop does on every tick.
///
/// The machine does no I/O. `Machine::handle` takes a `Trigger` (a tick, a
/// command, or the outcome of an earlier effect) and returns the `Effect`s
/// the driver in `tailer.rs` must run next. Outcomes of those effects come
/// back as further triggers until the list runs dry.
///
/// Per tick:
///   1. local date changed            → ReconnectPending (new file name)
///   2. else re-evaluation due (30 s) → Evaluate; folder changed → ReconnectPending
///   3. ReconnectPending              → Release
///   4. no cursor                     → Select, then Connect
///   5. cursor held                   → Read; truncation/error → ReconnectPending
use crate::selector::LogSource;
use chrono::NaiveDate;
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Default folder re-evaluation interval.
pub const REEVALUATE_INTERVAL: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Never started.
    Idle,
    /// Fresh start, no cursor yet. With `start_at_end` the first connect
    /// skips content already in the file.
    Starting,
    /// Cursor held and read every tick.
    Connected,
    /// Cursor must be dropped and a new source selected.
    ReconnectPending,
    /// No cursor; the next connect reads the file from byte 0.
    Disconnected,
    /// Explicitly stopped. Ticks are ignored until the next start.
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Start,
    Stop,
    /// The custom folder override was changed.
    OverrideChanged,
    Tick { today: NaiveDate, at: Instant },
    /// Result of `Effect::Evaluate`.
    Evaluated(Option<PathBuf>),
    /// Result of `Effect::Select`.
    Selected(Option<PathBuf>),
    Connected,
    ConnectFailed,
    Truncated,
    ReadFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Drop the cursor together with its zone watch and pending fragment.
    Release,
    /// Periodic folder re-evaluation; answer with `Trigger::Evaluated`.
    Evaluate,
    /// Pick a folder to connect to; answer with `Trigger::Selected`.
    Select,
    /// Open a cursor; answer with `Trigger::Connected` / `ConnectFailed`.
    Connect { source: LogSource, seek_to_end: bool },
    /// Read and dispatch appended bytes; answer with `Truncated` / `ReadFailed`
    /// on failure, nothing on success.
    Read,
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct Machine {
    state:          EngineState,
    /// `true` when a fresh start skips existing content.
    start_at_end:   bool,
    reevaluate:     Duration,
    seek_to_end:    bool,
    has_cursor:     bool,
    /// Local date seen on the previous tick.
    today:          Option<NaiveDate>,
    /// Instant of the tick being processed.
    now:            Option<Instant>,
    /// Authoritative folder from the last selection.
    folder:         Option<PathBuf>,
    last_selection: Option<Instant>,
    evaluate_due:   bool,
}

impl Machine {
    pub fn new(start_at_end: bool, reevaluate: Duration) -> Self {
        Self {
            state: EngineState::Idle,
            start_at_end,
            reevaluate,
            seek_to_end: start_at_end,
            has_cursor: false,
            today: None,
            now: None,
            folder: None,
            last_selection: None,
            evaluate_due: false,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn folder(&self) -> Option<&PathBuf> {
        self.folder.as_ref()
    }

    pub fn today(&self) -> Option<NaiveDate> {
        self.today
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, EngineState::Idle | EngineState::Stopped)
    }

    pub fn handle(&mut self, trigger: Trigger) -> Vec<Effect> {
        match trigger {
            Trigger::Start => {
                let effects = self.release();
                self.state = EngineState::Starting;
                self.seek_to_end = self.start_at_end;
                self.today = None;
                self.folder = None;
                self.last_selection = None;
                self.evaluate_due = false;
                effects
            }

            Trigger::Stop => {
                let effects = self.release();
                self.state = EngineState::Stopped;
                effects
            }

            Trigger::OverrideChanged => {
                if self.is_running() {
                    self.evaluate_due = true;
                }
                Vec::new()
            }

            Trigger::Tick { today, at } => {
                if !self.is_running() {
                    return Vec::new();
                }
                self.now = Some(at);

                match self.today.replace(today) {
                    Some(prev) if prev != today => {
                        tracing::info!("Local date changed {} → {} — reconnecting", prev, today);
                        self.state = EngineState::ReconnectPending;
                        self.seek_to_end = false;
                        self.advance()
                    }
                    _ if self.has_cursor && self.reevaluation_due(at) => vec![Effect::Evaluate],
                    _ => self.advance(),
                }
            }

            Trigger::Evaluated(folder) => {
                self.evaluate_due = false;
                self.last_selection = self.now;
                if folder != self.folder {
                    tracing::info!(
                        "Authoritative folder changed {:?} → {:?} — reconnecting",
                        self.folder, folder
                    );
                    self.folder = folder;
                    self.state = EngineState::ReconnectPending;
                    self.seek_to_end = self.start_at_end;
                }
                self.advance()
            }

            Trigger::Selected(folder) => {
                self.evaluate_due = false;
                self.last_selection = self.now;
                self.folder = folder;
                match (&self.folder, self.today) {
                    (Some(folder), Some(day)) => vec![Effect::Connect {
                        source:      LogSource::new(folder.clone(), day),
                        seek_to_end: self.seek_to_end,
                    }],
                    _ => Vec::new(),
                }
            }

            Trigger::Connected => {
                self.has_cursor = true;
                self.seek_to_end = false;
                self.state = EngineState::Connected;
                vec![Effect::Read]
            }

            Trigger::ConnectFailed => Vec::new(),

            Trigger::Truncated | Trigger::ReadFailed => {
                if self.has_cursor {
                    self.state = EngineState::ReconnectPending;
                    self.seek_to_end = false;
                }
                Vec::new()
            }
        }
    }

    fn reevaluation_due(&self, at: Instant) -> bool {
        self.evaluate_due
            || self
                .last_selection
                .map_or(true, |last| at.saturating_duration_since(last) >= self.reevaluate)
    }

    /// Steps 3–5 of a tick.
    fn advance(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if self.state == EngineState::ReconnectPending {
            effects.extend(self.release());
        }
        if self.has_cursor {
            effects.push(Effect::Read);
        } else {
            effects.push(Effect::Select);
        }
        effects
    }

    /// Forget the cursor and settle into the matching no-cursor state.
    fn release(&mut self) -> Vec<Effect> {
        let held = std::mem::take(&mut self.has_cursor);
        if self.is_running() {
            self.state = if self.seek_to_end {
                EngineState::Starting
            } else {
                EngineState::Disconnected
            };
        }
        if held { vec![Effect::Release] } else { Vec::new() }
    }
}
