// File I/O for opmerge: exports, side-stores, durable writes

pub mod csv;
pub mod error;
pub mod fsutil;
pub mod store;

pub use error::IoError;
pub use store::SidecarStore;
