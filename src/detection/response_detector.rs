use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::detection::source::{AiResponse, ChatSource};
use crate::error::AiContextError;
use crate::observability;
use crate::utils::{BackoffPolicy, debug_log, preview};

pub type ResponseCallback = Arc<dyn Fn(&AiResponse) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorState {
    Idle,
    Busy,
}

/// What one detection pass did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// A new response was handed to the callback.
    Processed(String),
    Duplicate,
    NoResponse,
    /// Another pass was in flight.
    Skipped,
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub poll_interval: Duration,
    pub debounce: Duration,
    pub startup_backoff: BackoffPolicy,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            debounce: Duration::from_millis(500),
            startup_backoff: BackoffPolicy::default(),
        }
    }
}

impl DetectorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            debounce: config.debounce(),
            startup_backoff: config.source_backoff(),
        }
    }
}

enum Command {
    Notify,
    Stop,
}

/// Handle for delivering "the chat store changed" notifications to a detector.
#[derive(Clone)]
pub struct DetectorNotifier {
    tx: Sender<Command>,
}

impl DetectorNotifier {
    pub fn notify(&self) {
        let _ = self.tx.send(Command::Notify);
    }
}

struct DetectorCore {
    source: Arc<dyn ChatSource>,
    callback: ResponseCallback,
    state: Mutex<DetectorState>,
    last_processed: Mutex<Option<String>>,
}

/// Resets the state to Idle even if the callback panics.
struct BusyGuard<'a> {
    state: &'a Mutex<DetectorState>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        *lock(self.state) = DetectorState::Idle;
    }
}

impl DetectorCore {
    fn try_begin(&self) -> Option<BusyGuard<'_>> {
        let mut state = lock(&self.state);
        if *state == DetectorState::Busy {
            return None;
        }
        *state = DetectorState::Busy;
        Some(BusyGuard { state: &self.state })
    }

    fn poll_once(&self) -> PollOutcome {
        let Some(_busy) = self.try_begin() else {
            return PollOutcome::Skipped;
        };

        let latest = match self.source.latest_assistant_message() {
            Ok(latest) => latest,
            Err(e) => {
                debug_log(&format!("Chat source read failed: {}", e));
                observability::log_error(&e, Some(serde_json::json!({"operation": "detect_response"})));
                return PollOutcome::Failed(e.to_string());
            }
        };

        let Some(response) = latest else {
            return PollOutcome::NoResponse;
        };
        if lock(&self.last_processed).as_deref() == Some(response.id.as_str()) {
            return PollOutcome::Duplicate;
        }

        debug_log(&format!(
            "New assistant response {} in {}: {}",
            response.id,
            response.conversation_id,
            preview(&response.text, 80)
        ));
        (self.callback)(&response);
        *lock(&self.last_processed) = Some(response.id.clone());
        PollOutcome::Processed(response.id)
    }
}

/// Watches a chat source for new assistant responses.
///
/// A single actor thread owns the polling loop. It wakes on a fixed tick and on
/// debounced change notifications; notifications that arrive while a pass is running
/// are dropped.
pub struct ResponseDetector {
    core: Arc<DetectorCore>,
    settings: DetectorSettings,
    tx: Sender<Command>,
    rx: Option<Receiver<Command>>,
    handle: Option<JoinHandle<()>>,
}

impl ResponseDetector {
    pub fn new(source: Arc<dyn ChatSource>, settings: DetectorSettings, callback: ResponseCallback) -> Self {
        let (tx, rx) = mpsc::channel();
        Self {
            core: Arc::new(DetectorCore {
                source,
                callback,
                state: Mutex::new(DetectorState::Idle),
                last_processed: Mutex::new(None),
            }),
            settings,
            tx,
            rx: Some(rx),
            handle: None,
        }
    }

    pub fn notifier(&self) -> DetectorNotifier {
        DetectorNotifier { tx: self.tx.clone() }
    }

    /// Probe the source (with backoff) and start the polling thread.
    ///
    /// Exhausting the startup backoff is the only fatal source error.
    pub fn start(&mut self) -> Result<(), AiContextError> {
        if self.handle.is_some() {
            return Ok(());
        }
        let Some(rx) = self.rx.take() else {
            return Err(AiContextError::Generic(
                "response detector cannot be restarted".to_string(),
            ));
        };

        let source = self.core.source.clone();
        if let Err(e) = self
            .settings
            .startup_backoff
            .retry("chat source probe", |_| source.probe())
        {
            self.rx = Some(rx);
            let err = match e {
                AiContextError::SourceUnavailable(_) => e,
                other => AiContextError::SourceUnavailable(other.to_string()),
            };
            observability::log_error(&err, Some(serde_json::json!({"operation": "detector_start"})));
            return Err(err);
        }

        let core = self.core.clone();
        let settings = self.settings.clone();
        let handle = thread::Builder::new()
            .name("ai-context-detector".to_string())
            .spawn(move || run_loop(core, settings, rx))?;
        self.handle = Some(handle);
        debug_log("Response detector started");
        Ok(())
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(Command::Stop);
            let _ = handle.join();
            debug_log("Response detector stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Run one detection pass on the calling thread.
    pub fn poll_once(&self) -> PollOutcome {
        self.core.poll_once()
    }

    pub fn state(&self) -> DetectorState {
        *lock(&self.core.state)
    }

    pub fn last_processed_id(&self) -> Option<String> {
        lock(&self.core.last_processed).clone()
    }

    /// Forget the last processed id so the current latest response is emitted again.
    pub fn reset_last_processed(&self) {
        *lock(&self.core.last_processed) = None;
    }
}

impl Drop for ResponseDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(core: Arc<DetectorCore>, settings: DetectorSettings, rx: Receiver<Command>) {
    let mut next_tick = Instant::now() + settings.poll_interval;
    let mut debounce_deadline: Option<Instant> = None;

    loop {
        let wake_at = debounce_deadline.map_or(next_tick, |d| d.min(next_tick));
        match rx.recv_timeout(wake_at.saturating_duration_since(Instant::now())) {
            Ok(Command::Notify) => {
                // Each notification pushes the deadline out
                debounce_deadline = Some(Instant::now() + settings.debounce);
                continue;
            }
            Ok(Command::Stop) | Err(RecvTimeoutError::Disconnected) => return,
            Err(RecvTimeoutError::Timeout) => {}
        }

        let now = Instant::now();
        let debounced = debounce_deadline.is_some_and(|d| now >= d);
        if !debounced && now < next_tick {
            continue;
        }
        debounce_deadline = None;

        let outcome = core.poll_once();
        if let PollOutcome::Processed(id) = &outcome {
            debug_log(&format!("Detector pass processed {}", id));
        }

        // Triggers that arrived during the pass are dropped, not queued
        loop {
            match rx.try_recv() {
                Ok(Command::Notify) => {}
                Ok(Command::Stop) | Err(TryRecvError::Disconnected) => return,
                Err(TryRecvError::Empty) => break,
            }
        }
        next_tick = Instant::now() + settings.poll_interval;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
