//! voltree: versioned data volumes with snapshot lineage, named branches,
//! three-way metadata sync against a hub, and chunk-level content transfer.

pub mod blob;
pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod model;
pub mod output;
pub mod remote;
pub mod resolve;
pub mod store;
pub mod sync;
pub mod transfer;

pub use error::{Result, VoltreeError};
