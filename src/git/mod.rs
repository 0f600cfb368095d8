pub mod diff;
pub mod provenance_branch;
pub mod repository;
pub mod status;

pub use diff::{DiffRequest, DiffResolver, LineRangesByFile};
pub use provenance_branch::{BranchSwitch, CommitOrchestrator, SavedHead};
pub use repository::{Repository, find_repository_in_path};
