pub mod commit_store;
pub mod lookup;
pub mod path_match;
pub mod pipeline;
pub mod store;
pub mod types;

pub use commit_store::CommitContextStore;
pub use lookup::{LineProvenance, ProvenanceLookup};
pub use pipeline::{CorrelationPipeline, PipelineReport, PipelineSettings, RangeSource};
pub use store::ProvenanceStore;
pub use types::{CommitContext, FileChange, LineRange, ProvenanceRecord};
