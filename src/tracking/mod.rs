pub mod change_tracker;
pub mod fs_watch;

pub use change_tracker::{ChangeEvent, ChangeTracker, ChangeTrackerSettings};
pub use fs_watch::FsWatcher;
