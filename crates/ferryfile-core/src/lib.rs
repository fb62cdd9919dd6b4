//! Core types for ferryfile.
//!
//! This crate provides the plain data the file-operation engine works on:
//! operation contexts, batch requests, clipboard payloads, the error
//! taxonomy and engine configuration.

mod clipboard;
mod config;
mod context;
mod error;
mod name;
mod request;

pub use clipboard::{ClipboardMode, ClipboardPayload};
pub use config::{EngineConfig, EngineConfigBuilder};
pub use context::{LibraryContext, OperationContext};
pub use error::{ErrorKind, OperationError, OpsError, Severity};
pub use name::validate_filename;
pub use request::{
    BackupHandle, ConflictPolicy, FileOperationRequest, OperationKind, check_cycle,
};
