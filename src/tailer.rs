/// Poll loop that tails the daily chat log and hands lines to a subscriber.
///
/// `Driver` owns every piece of mutable state: the state machine, the
/// cursor, the zone watch, the pending fragment and the subscriber. It runs
/// the effects `Machine` asks for and feeds their outcomes back.
///
/// `LogTailer` puts one `Driver` on a tokio task. That task is the only
/// place the driver is touched, so ticks never overlap and subscriber
/// callbacks always run there. The next tick is scheduled only after the
/// current one (callbacks included) has finished, so a slow subscriber
/// delays polling but never causes a burst of queued ticks.
use crate::config::TailConfig;
use crate::cursor::Cursor;
use crate::decoder::{self, LineEvent, PendingFragment};
use crate::engine::{Effect, EngineState, Machine, Trigger};
use crate::error::TailError;
use crate::selector::{self, CandidateFolders};
use crate::zone::{FsEvent, ZoneWatch};
use chrono::{Local, NaiveDate};
use serde::Serialize;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

// ---------------------------------------------------------------------------
// Subscriber seam
// ---------------------------------------------------------------------------

/// Receives tailer output. Called on the poll task, one call at a time.
pub trait Subscriber: Send + 'static {
    fn on_line(&mut self, event: LineEvent);

    fn on_zone_changed(&mut self) {}
}

/// Channel form of the subscriber callbacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TailEvent {
    Line(LineEvent),
    ZoneChanged,
}

/// Fire-and-forget: a full or closed channel drops the event.
impl Subscriber for mpsc::Sender<TailEvent> {
    fn on_line(&mut self, event: LineEvent) {
        let _ = self.try_send(TailEvent::Line(event));
    }

    fn on_zone_changed(&mut self) {
        let _ = self.try_send(TailEvent::ZoneChanged);
    }
}

// ---------------------------------------------------------------------------
// Driver
// ---------------------------------------------------------------------------

pub struct Driver {
    machine:       Machine,
    folders:       CandidateFolders,
    custom_folder: Option<PathBuf>,
    settings_file: String,
    cursor:        Option<Cursor>,
    zone:          Option<ZoneWatch>,
    fragment:      PendingFragment,
    zone_tx:       UnboundedSender<FsEvent>,
    subscriber:    Box<dyn Subscriber>,
}

impl Driver {
    pub fn new(
        config:     &TailConfig,
        subscriber: Box<dyn Subscriber>,
        zone_tx:    UnboundedSender<FsEvent>,
    ) -> Self {
        Self {
            machine:       Machine::new(config.start_at_end, config.reevaluate_interval()),
            folders:       config.folders(),
            custom_folder: config.custom_folder(),
            settings_file: config.settings_file.clone(),
            cursor:        None,
            zone:          None,
            fragment:      PendingFragment::new(),
            zone_tx,
            subscriber,
        }
    }

    pub fn folders(&self) -> &CandidateFolders {
        &self.folders
    }

    pub fn state(&self) -> EngineState {
        self.machine.state()
    }

    pub fn is_running(&self) -> bool {
        self.machine.is_running()
    }

    /// Path of the file currently held open, if any.
    pub fn current_file(&self) -> Option<&std::path::Path> {
        self.cursor.as_ref().map(|c| c.path())
    }

    pub fn start(&mut self) {
        tracing::info!(
            "Tailing chat logs: primary={:?} secondary={:?} custom={:?}",
            self.folders.primary.logs, self.folders.secondary.logs, self.custom_folder
        );
        self.run(Trigger::Start);
    }

    pub fn stop(&mut self) {
        self.run(Trigger::Stop);
    }

    /// Empty string clears the override.
    pub fn set_custom_folder(&mut self, path: &str) {
        let trimmed = path.trim();
        let custom = (!trimmed.is_empty()).then(|| PathBuf::from(trimmed));
        if custom != self.custom_folder {
            tracing::info!("Custom folder set to {:?}", custom);
            self.custom_folder = custom;
            self.run(Trigger::OverrideChanged);
        }
    }

    pub fn tick(&mut self) {
        self.tick_at(Local::now().date_naive(), Instant::now());
    }

    /// One poll with an explicit local date and instant.
    pub fn tick_at(&mut self, today: NaiveDate, at: Instant) {
        self.run(Trigger::Tick { today, at });
    }

    pub fn on_fs_event(&mut self, event: FsEvent) {
        match event {
            Ok(event) => {
                if let Some(zone) = self.zone.as_mut() {
                    if zone.changed(&event) {
                        tracing::debug!("Settings file changed — zone change");
                        self.subscriber.on_zone_changed();
                    }
                }
            }
            Err(e) => tracing::warn!("Zone watcher error: {}", e),
        }
    }

    /// Feed `trigger` to the machine and run effects depth-first until none remain.
    fn run(&mut self, trigger: Trigger) {
        let mut pending: VecDeque<Effect> = self.machine.handle(trigger).into();
        while let Some(effect) = pending.pop_front() {
            if let Some(outcome) = self.execute(effect) {
                for next in self.machine.handle(outcome).into_iter().rev() {
                    pending.push_front(next);
                }
            }
        }
    }

    fn execute(&mut self, effect: Effect) -> Option<Trigger> {
        match effect {
            Effect::Release => {
                self.release();
                None
            }
            Effect::Evaluate => Some(Trigger::Evaluated(self.select())),
            Effect::Select => Some(Trigger::Selected(self.select())),
            Effect::Connect { source, seek_to_end } => {
                match Cursor::connect(&source.path, seek_to_end) {
                    Ok(cursor) => {
                        tracing::info!(
                            "Connected to {:?} (byte {})",
                            source.path,
                            cursor.offset()
                        );
                        self.cursor = Some(cursor);
                        self.zone = match ZoneWatch::open(
                            &source.folder,
                            &self.settings_file,
                            self.zone_tx.clone(),
                        ) {
                            Ok(zone) => Some(zone),
                            Err(e) => {
                                tracing::warn!("Zone watch unavailable on {:?}: {}", source.folder, e);
                                None
                            }
                        };
                        Some(Trigger::Connected)
                    }
                    Err(e) => {
                        tracing::debug!("Connect failed, retrying next tick: {}", e);
                        Some(Trigger::ConnectFailed)
                    }
                }
            }
            Effect::Read => {
                let Some(cursor) = self.cursor.as_mut() else {
                    return Some(Trigger::ReadFailed);
                };
                match cursor.read_new_bytes() {
                    Ok(bytes) => {
                        self.dispatch(&bytes);
                        None
                    }
                    Err(e @ TailError::Truncated { .. }) => {
                        tracing::info!("Chat log rotated in place ({}) — reconnecting", e);
                        Some(Trigger::Truncated)
                    }
                    Err(e) => {
                        tracing::warn!("Chat log read error: {}", e);
                        Some(Trigger::ReadFailed)
                    }
                }
            }
        }
    }

    fn select(&self) -> Option<PathBuf> {
        let day = self.machine.today()?;
        selector::select(
            self.custom_folder.as_deref(),
            &self.folders.primary.logs,
            &self.folders.secondary.logs,
            day,
        )
    }

    fn dispatch(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        if let Some(text) = self.fragment.complete(bytes) {
            for event in decoder::decode(&text) {
                self.subscriber.on_line(event);
            }
        }
    }

    /// Cursor, zone watch and pending fragment go together.
    fn release(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.close();
        }
        self.zone = None;
        self.fragment.clear();
    }
}

// ---------------------------------------------------------------------------
// LogTailer: the task-owning handle
// ---------------------------------------------------------------------------

enum Command {
    Start,
    Stop,
    CustomFolder(String),
    Shutdown,
}

pub struct LogTailer {
    cmd_tx:  UnboundedSender<Command>,
    folders: CandidateFolders,
    task:    JoinHandle<()>,
}

impl LogTailer {
    /// Spawn the poll task. Nothing is read until `start()`.
    pub fn spawn(config: &TailConfig, subscriber: Box<dyn Subscriber>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (zone_tx, zone_rx) = mpsc::unbounded_channel();

        let driver = Driver::new(config, subscriber, zone_tx);
        let folders = driver.folders().clone();
        let task = tokio::spawn(poll_loop(driver, cmd_rx, zone_rx, config.poll_interval()));

        Self { cmd_tx, folders, task }
    }

    /// Begin (or restart) tailing. The first connect skips existing content
    /// when `start_at_end` is set.
    pub fn start(&self) {
        self.send(Command::Start);
    }

    /// Release the file and stop polling. Takes effect between ticks.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    /// Override folder selection. Empty string removes the override.
    pub fn configure_custom_folder(&self, path: impl Into<String>) {
        self.send(Command::CustomFolder(path.into()));
    }

    /// The two candidate folders resolved from configuration.
    pub fn folders(&self) -> &CandidateFolders {
        &self.folders
    }

    /// Stop and wait for the poll task to exit.
    pub async fn shutdown(self) {
        self.send(Command::Shutdown);
        if let Err(e) = self.task.await {
            tracing::error!("Tailer task failed: {}", e);
        }
    }

    fn send(&self, cmd: Command) {
        if self.cmd_tx.send(cmd).is_err() {
            tracing::warn!("Tailer task is gone — command dropped");
        }
    }
}

async fn poll_loop(
    mut driver:  Driver,
    mut cmd_rx:  UnboundedReceiver<Command>,
    mut zone_rx: UnboundedReceiver<FsEvent>,
    interval:    Duration,
) {
    let mut next_tick = tokio::time::Instant::now();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Start) => {
                    driver.start();
                    next_tick = tokio::time::Instant::now();
                }
                Some(Command::Stop) => driver.stop(),
                Some(Command::CustomFolder(path)) => driver.set_custom_folder(&path),
                Some(Command::Shutdown) | None => break,
            },
            Some(event) = zone_rx.recv() => driver.on_fs_event(event),
            _ = tokio::time::sleep_until(next_tick), if driver.is_running() => {
                driver.tick();
                next_tick = tokio::time::Instant::now() + interval;
            }
        }
    }

    driver.stop();
    tracing::info!("Tailer stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::ModifyKind;
    use notify::{Event, EventKind};
    use std::io::Write;
    use std::path::Path;
    use std::time::SystemTime;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        primary:   TempDir,
        secondary: TempDir,
        driver:    Driver,
        rx:        mpsc::Receiver<TailEvent>,
        t0:        Instant,
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, d).unwrap()
    }

    fn fixture(start_at_end: bool) -> Fixture {
        let primary = tempdir().unwrap();
        let secondary = tempdir().unwrap();
        std::fs::create_dir(primary.path().join("Logs")).unwrap();
        std::fs::create_dir(secondary.path().join("Logs")).unwrap();

        let config = TailConfig {
            primary_root:   primary.path().to_path_buf(),
            secondary_root: secondary.path().to_path_buf(),
            start_at_end,
            ..TailConfig::default()
        };
        let (tx, rx) = mpsc::channel(64);
        let (zone_tx, _zone_rx) = mpsc::unbounded_channel();
        let driver = Driver::new(&config, Box::new(tx), zone_tx);

        Fixture { primary, secondary, driver, rx, t0: Instant::now() }
    }

    fn log_path(root: &Path, d: u32) -> PathBuf {
        root.join("Logs").join(selector::log_file_name(day(d)))
    }

    fn append(path: &Path, text: &str) {
        let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        f.flush().unwrap();
    }

    fn drain(rx: &mut mpsc::Receiver<TailEvent>) -> Vec<TailEvent> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    fn payloads(events: &[TailEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TailEvent::Line(l) => Some(l.payload.clone()),
                TailEvent::ZoneChanged => None,
            })
            .collect()
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn start_at_end_skips_history_then_dispatches_one_line() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "24-03-05\t11:00:00\told news\r\n24-03-05\t11:00:01\tolder\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(fx.driver.state(), EngineState::Connected);
        assert!(drain(&mut fx.rx).is_empty());

        append(&log, "24-03-05\t12:00:00\tfresh\r\n");
        fx.driver.tick_at(day(5), fx.t0 + ms(500));

        let events = drain(&mut fx.rx);
        assert_eq!(payloads(&events), ["fresh"]);
    }

    #[test]
    fn unchanged_file_yields_nothing_on_second_tick() {
        let mut fx = fixture(false);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "24-03-05\t11:00:00\tonce\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(payloads(&drain(&mut fx.rx)), ["once"]);

        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert!(drain(&mut fx.rx).is_empty());
    }

    #[test]
    fn nothing_to_tail_keeps_retrying() {
        let mut fx = fixture(true);
        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(fx.driver.state(), EngineState::Starting);
        assert!(fx.driver.current_file().is_none());

        // Game starts writing: the file appears, history is still skipped.
        let log = log_path(fx.secondary.path(), 5);
        append(&log, "24-03-05\t11:00:00\tbefore connect\r\n");
        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert_eq!(fx.driver.current_file(), Some(log.as_path()));
        assert!(drain(&mut fx.rx).is_empty());
    }

    #[test]
    fn truncation_reconnects_and_reads_from_start() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "24-03-05\t11:00:00\ta fairly long line of history\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);

        std::fs::OpenOptions::new().write(true).open(&log).unwrap().set_len(0).unwrap();
        append(&log, "24-03-05\t12:00:00\tnew\r\n");

        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert_eq!(fx.driver.state(), EngineState::ReconnectPending);
        assert!(drain(&mut fx.rx).is_empty());

        fx.driver.tick_at(day(5), fx.t0 + ms(1000));
        assert_eq!(fx.driver.state(), EngineState::Connected);
        assert_eq!(payloads(&drain(&mut fx.rx)), ["new"]);
    }

    #[test]
    fn file_recreated_at_same_path_is_read_from_start() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "24-03-05\t11:00:00\ta fairly long line of history\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(fx.driver.state(), EngineState::Connected);

        std::fs::remove_file(&log).unwrap();
        append(&log, "24-03-05\t12:00:00\tafter replace\r\n");

        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert_eq!(fx.driver.state(), EngineState::ReconnectPending);

        fx.driver.tick_at(day(5), fx.t0 + ms(1000));
        assert_eq!(fx.driver.state(), EngineState::Connected);
        assert_eq!(payloads(&drain(&mut fx.rx)), ["after replace"]);
    }

    #[test]
    fn deleted_file_is_picked_up_once_rewritten() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "24-03-05\t11:00:00\thistory\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);

        std::fs::remove_file(&log).unwrap();
        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert_eq!(fx.driver.state(), EngineState::ReconnectPending);

        fx.driver.tick_at(day(5), fx.t0 + ms(1000));
        assert_eq!(fx.driver.current_file(), None);
        assert!(fx.driver.is_running());

        append(&log, "24-03-05\t12:00:00\tback again\r\n");
        fx.driver.tick_at(day(5), fx.t0 + ms(1500));
        assert_eq!(fx.driver.state(), EngineState::Connected);
        assert_eq!(payloads(&drain(&mut fx.rx)), ["back again"]);
    }

    #[test]
    fn line_split_across_ticks_is_delivered_once() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);

        append(&log, "24-03-05\t12:00:00\thalf a ");
        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert!(drain(&mut fx.rx).is_empty());

        append(&log, "sentence\r\n");
        fx.driver.tick_at(day(5), fx.t0 + ms(1000));
        assert_eq!(payloads(&drain(&mut fx.rx)), ["half a sentence"]);
    }

    #[test]
    fn day_rollover_reads_new_file_from_start() {
        let mut fx = fixture(true);
        append(&log_path(fx.primary.path(), 5), "24-03-05\t23:59:59\tlast of day\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);

        let next = log_path(fx.primary.path(), 6);
        append(&next, "24-03-06\t00:00:01\tfirst of day\r\n");
        fx.driver.tick_at(day(6), fx.t0 + ms(500));

        assert_eq!(fx.driver.current_file(), Some(next.as_path()));
        assert_eq!(payloads(&drain(&mut fx.rx)), ["first of day"]);
    }

    #[test]
    fn silent_folder_switch_detected_on_reevaluation() {
        let mut fx = fixture(true);
        let a = log_path(fx.primary.path(), 5);
        append(&a, "24-03-05\t11:00:00\tin a\r\n");
        std::fs::File::options()
            .write(true)
            .open(&a)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(fx.driver.current_file(), Some(a.as_path()));

        let b = log_path(fx.secondary.path(), 5);
        append(&b, "24-03-05\t11:30:00\tb history\r\n");

        // Not yet due: still on folder a.
        fx.driver.tick_at(day(5), fx.t0 + Duration::from_secs(10));
        assert_eq!(fx.driver.current_file(), Some(a.as_path()));

        fx.driver.tick_at(day(5), fx.t0 + Duration::from_secs(31));
        assert_eq!(fx.driver.current_file(), Some(b.as_path()));
        assert!(drain(&mut fx.rx).is_empty());

        append(&b, "24-03-05\t11:31:00\tb live\r\n");
        fx.driver.tick_at(day(5), fx.t0 + Duration::from_millis(31_500));
        assert_eq!(payloads(&drain(&mut fx.rx)), ["b live"]);
    }

    #[test]
    fn custom_folder_takes_over_on_next_tick() {
        let mut fx = fixture(false);
        append(&log_path(fx.primary.path(), 5), "24-03-05\t11:00:00\tprimary\r\n");
        let custom = tempdir().unwrap();
        let custom_log = custom.path().join(selector::log_file_name(day(5)));
        append(&custom_log, "24-03-05\t11:00:00\tcustom\r\n");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        assert_eq!(payloads(&drain(&mut fx.rx)), ["primary"]);

        fx.driver.set_custom_folder(&custom.path().to_string_lossy());
        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert_eq!(fx.driver.current_file(), Some(custom_log.as_path()));

        // A folder switch is a fresh start, but this config reads from the top.
        assert_eq!(payloads(&drain(&mut fx.rx)), ["custom"]);
    }

    #[test]
    fn stop_releases_file_and_ignores_ticks() {
        let mut fx = fixture(true);
        let log = log_path(fx.primary.path(), 5);
        append(&log, "");

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);
        fx.driver.stop();
        assert_eq!(fx.driver.state(), EngineState::Stopped);
        assert!(fx.driver.current_file().is_none());

        append(&log, "24-03-05\t12:00:00\tunheard\r\n");
        fx.driver.tick_at(day(5), fx.t0 + ms(500));
        assert!(drain(&mut fx.rx).is_empty());
    }

    #[test]
    fn settings_change_fires_zone_signal() {
        let mut fx = fixture(true);
        let logs = fx.primary.path().join("Logs");
        append(&log_path(fx.primary.path(), 5), "");
        let settings = logs.join("settings.ini");
        std::fs::write(&settings, "zone=1").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&settings)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(600))
            .unwrap();

        fx.driver.start();
        fx.driver.tick_at(day(5), fx.t0);

        std::fs::write(&settings, "zone=2").unwrap();
        let event = Event::new(EventKind::Modify(ModifyKind::Any)).add_path(settings.clone());
        fx.driver.on_fs_event(Ok(event));

        assert_eq!(drain(&mut fx.rx), vec![TailEvent::ZoneChanged]);
    }

    #[tokio::test]
    async fn log_tailer_delivers_lines_from_task() {
        let root = tempdir().unwrap();
        let other = tempdir().unwrap();
        std::fs::create_dir(root.path().join("Logs")).unwrap();
        let today = Local::now().date_naive();
        let log = root.path().join("Logs").join(selector::log_file_name(today));
        append(&log, "history\r\n");

        let config = TailConfig {
            primary_root:     root.path().to_path_buf(),
            secondary_root:   other.path().to_path_buf(),
            poll_interval_ms: 20,
            ..TailConfig::default()
        };
        let (tx, mut rx) = mpsc::channel(16);
        let tailer = LogTailer::spawn(&config, Box::new(tx));
        assert_eq!(tailer.folders().primary.logs, root.path().join("Logs"));

        tailer.start();
        tokio::time::sleep(ms(200)).await;
        let stamp = Local::now().format("%y-%m-%d\t%H:%M:%S");
        append(&log, &format!("{stamp}\tlive line\r\n"));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("line within timeout")
            .expect("channel open");
        match event {
            TailEvent::Line(line) => assert_eq!(line.payload, "live line"),
            other => panic!("unexpected event: {:?}", other),
        }

        tailer.stop();
        tokio::time::sleep(ms(100)).await;
        append(&log, &format!("{stamp}\tafter stop\r\n"));
        tokio::time::sleep(ms(200)).await;
        assert!(rx.try_recv().is_err());

        tailer.shutdown().await;
    }
}
