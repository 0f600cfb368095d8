pub mod cursor_db;
pub mod follow_up;
pub mod response_detector;
pub mod source;

pub use cursor_db::CursorDatabase;
pub use follow_up::{FollowUpScheduler, FollowUpSettings, FollowUpTicket};
pub use response_detector::{DetectorNotifier, DetectorSettings, DetectorState, PollOutcome, ResponseDetector};
pub use source::{AiResponse, ChatSource, Role};
