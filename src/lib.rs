pub mod commands;
pub mod config;
pub mod detection;
pub mod error;
pub mod feature_flags;
pub mod git;
pub mod observability;
pub mod provenance;
pub mod tracking;
pub mod utils;
