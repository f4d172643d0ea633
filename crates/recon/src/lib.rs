//! `opmerge-recon`: key-based merge/unmerge engine for routing exports.
//!
//! Pure engine crate: receives decoded lines, returns merged tables,
//! side-stores and reconstructed tables. No CLI or IO dependencies.

pub mod aggregate;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod model;
pub mod reconstruct;
pub mod sidecar;
pub mod table;

pub use aggregate::{MergeAggregator, MergeOutput, MergeStamp};
pub use config::EngineConfig;
pub use engine::{merge, read_merged, unmerge, unmerge_table, RawFile};
pub use error::MergeError;
pub use model::{Diagnostic, MergedTable, SourceTable, Table};
pub use reconstruct::{verify_round_trip, ReconstructMode, ReconstructOutput, ReconstructedTable};
pub use sidecar::{Sidecar, SIDECAR_SUFFIX};
