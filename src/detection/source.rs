use serde::{Deserialize, Serialize};

use crate::error::AiContextError;
use crate::utils::normalize_timestamp_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One chat message as reported by the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AiResponse {
    pub id: String,
    pub conversation_id: String,
    /// Milliseconds, or seconds when below 1e12.
    pub timestamp: i64,
    pub role: Role,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens: Option<u64>,
}

impl AiResponse {
    pub fn timestamp_ms(&self) -> i64 {
        normalize_timestamp_ms(self.timestamp)
    }
}

/// Read access to chat history. Implementations open and release their backing store
/// on every call.
pub trait ChatSource: Send + Sync {
    /// Most recent assistant message across all conversations.
    fn latest_assistant_message(&self) -> Result<Option<AiResponse>, AiContextError>;

    /// Messages of one conversation, oldest first.
    fn messages(&self, conversation_id: &str) -> Result<Vec<AiResponse>, AiContextError>;

    /// Cheap availability check used at startup.
    fn probe(&self) -> Result<(), AiContextError> {
        self.latest_assistant_message().map(|_| ())
    }
}

/// Newest assistant message; the first one seen wins a timestamp tie.
pub fn latest_assistant<'a, I>(messages: I) -> Option<AiResponse>
where
    I: IntoIterator<Item = &'a AiResponse>,
{
    let mut latest: Option<&AiResponse> = None;
    for message in messages {
        if message.role != Role::Assistant {
            continue;
        }
        if latest.is_none_or(|l| message.timestamp_ms() > l.timestamp_ms()) {
            latest = Some(message);
        }
    }
    latest.cloned()
}

/// Latest user message in `history` at or before the response time.
pub fn prompt_for<'a>(history: &'a [AiResponse], response: &AiResponse) -> Option<&'a AiResponse> {
    let response_time = response.timestamp_ms();
    history
        .iter()
        .filter(|m| m.role == Role::User && m.timestamp_ms() <= response_time)
        .max_by_key(|m| m.timestamp_ms())
}

#[cfg(any(test, feature = "test-support"))]
pub use in_memory::InMemoryChatSource;

#[cfg(any(test, feature = "test-support"))]
mod in_memory {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Scriptable source for tests.
    #[derive(Default)]
    pub struct InMemoryChatSource {
        messages: Mutex<Vec<AiResponse>>,
        failures: AtomicU32,
        calls: AtomicUsize,
    }

    impl InMemoryChatSource {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_messages(messages: Vec<AiResponse>) -> Self {
            let source = Self::new();
            for m in messages {
                source.push(m);
            }
            source
        }

        pub fn push(&self, message: AiResponse) {
            self.messages
                .lock()
                .unwrap_or_else(|p| p.into_inner())
                .push(message);
        }

        /// Make the next `n` calls fail with `SourceUnavailable`.
        pub fn fail_next(&self, n: u32) {
            self.failures.store(n, Ordering::SeqCst);
        }

        /// Number of `latest_assistant_message` calls so far, including failed ones.
        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn check_failure(&self) -> Result<(), AiContextError> {
            let failed = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failed {
                Err(AiContextError::SourceUnavailable("scripted failure".to_string()))
            } else {
                Ok(())
            }
        }
    }

    impl ChatSource for InMemoryChatSource {
        fn latest_assistant_message(&self) -> Result<Option<AiResponse>, AiContextError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.check_failure()?;
            let messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
            Ok(latest_assistant(messages.iter()))
        }

        fn messages(&self, conversation_id: &str) -> Result<Vec<AiResponse>, AiContextError> {
            self.check_failure()?;
            let messages = self.messages.lock().unwrap_or_else(|p| p.into_inner());
            let mut found: Vec<AiResponse> = messages
                .iter()
                .filter(|m| m.conversation_id == conversation_id)
                .cloned()
                .collect();
            found.sort_by_key(|m| m.timestamp_ms());
            Ok(found)
        }
    }
}
