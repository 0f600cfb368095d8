use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::config::Config;
use crate::detection::source::AiResponse;
use crate::error::AiContextError;
use crate::utils::debug_log;

pub type FollowUpRun = Arc<dyn Fn(&AiResponse, &FollowUpTicket) + Send + Sync>;

/// Handed to each follow-up run. A run that waited behind other work checks
/// `is_current` before touching anything, since a newer response may have replaced it.
#[derive(Debug, Clone)]
pub struct FollowUpTicket {
    response_id: String,
    active: Arc<Mutex<Option<String>>>,
}

impl FollowUpTicket {
    pub fn is_current(&self) -> bool {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).as_deref() == Some(self.response_id.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct FollowUpSettings {
    pub interval: Duration,
    pub duration: Duration,
}

impl Default for FollowUpSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            duration: Duration::from_secs(10 * 60),
        }
    }
}

impl FollowUpSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: config.follow_up_interval(),
            duration: config.follow_up_duration(),
        }
    }
}

enum FollowUpCommand {
    Schedule(AiResponse),
    Cancel,
    Stop,
}

struct Schedule {
    response: AiResponse,
    expires_at: Instant,
    next_run: Instant,
}

/// Re-runs the pipeline for the latest response to pick up edits that land after the
/// first pass.
///
/// At most one response is scheduled. Scheduling a different response replaces the
/// current one before its next run.
pub struct FollowUpScheduler {
    tx: Sender<FollowUpCommand>,
    active: Arc<Mutex<Option<String>>>,
    handle: Option<JoinHandle<()>>,
}

impl FollowUpScheduler {
    pub fn start(settings: FollowUpSettings, run: FollowUpRun) -> Result<Self, AiContextError> {
        let (tx, rx) = mpsc::channel();
        let active = Arc::new(Mutex::new(None));
        let shared = active.clone();
        let handle = thread::Builder::new()
            .name("ai-context-follow-up".to_string())
            .spawn(move || run_loop(settings, run, rx, shared))?;
        Ok(Self {
            tx,
            active,
            handle: Some(handle),
        })
    }

    pub fn schedule(&self, response: AiResponse) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = Some(response.id.clone());
        let _ = self.tx.send(FollowUpCommand::Schedule(response));
    }

    pub fn cancel(&self) {
        *self.active.lock().unwrap_or_else(|p| p.into_inner()) = None;
        let _ = self.tx.send(FollowUpCommand::Cancel);
    }

    /// Response currently being followed up, if any.
    pub fn active_response_id(&self) -> Option<String> {
        self.active.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.tx.send(FollowUpCommand::Stop);
            let _ = handle.join();
        }
    }
}

impl Drop for FollowUpScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    settings: FollowUpSettings,
    run: FollowUpRun,
    rx: Receiver<FollowUpCommand>,
    active: Arc<Mutex<Option<String>>>,
) {
    let mut current: Option<Schedule> = None;

    loop {
        let command = match &current {
            Some(schedule) => {
                match rx.recv_timeout(schedule.next_run.saturating_duration_since(Instant::now())) {
                    Ok(cmd) => Some(cmd),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => return,
                }
            }
            None => match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => return,
            },
        };

        match command {
            Some(FollowUpCommand::Schedule(response)) => {
                if current
                    .as_ref()
                    .is_some_and(|s| s.response.id == response.id)
                {
                    continue;
                }
                if let Some(old) = &current {
                    debug_log(&format!(
                        "Follow-up for {} superseded by {}",
                        old.response.id, response.id
                    ));
                }
                let now = Instant::now();
                current = Some(Schedule {
                    response,
                    expires_at: now + settings.duration,
                    next_run: now + settings.interval,
                });
            }
            Some(FollowUpCommand::Cancel) => current = None,
            Some(FollowUpCommand::Stop) => return,
            None => {
                let Some(schedule) = current.as_mut() else {
                    continue;
                };
                if Instant::now() >= schedule.expires_at {
                    debug_log(&format!("Follow-up for {} expired", schedule.response.id));
                    clear_if_active(&active, &schedule.response.id);
                    current = None;
                    continue;
                }
                let ticket = FollowUpTicket {
                    response_id: schedule.response.id.clone(),
                    active: active.clone(),
                };
                run(&schedule.response, &ticket);
                schedule.next_run = Instant::now() + settings.interval;
            }
        }
    }
}

fn clear_if_active(active: &Mutex<Option<String>>, id: &str) {
    let mut guard = active.lock().unwrap_or_else(|p| p.into_inner());
    if guard.as_deref() == Some(id) {
        *guard = None;
    }
}
