// src/lib.rs

//! Choco Package Manager
//!
//! Installs, upgrades and uninstalls `.nupkg` archive packages, runs their
//! lifecycle scripts, and reconciles them with the native software registry.
//!
//! # Architecture
//!
//! - Install context: every filesystem root is carried explicitly, never global
//! - Orchestrator: per-package state machine with staging, backup and rollback
//! - Installed-package registry: archive metadata and native registry entries
//!   behind one package abstraction
//! - Results: per-package messages so one failure never aborts the batch
//! - File-level tracking: SHA-256 checksums of every installed file

pub mod config;
pub mod context;
pub mod db;
mod error;
pub mod filesystem;
pub mod installed;
pub mod orchestrator;
pub mod packages;
pub mod pin;
pub mod registry;
pub mod results;
pub mod scripts;
pub mod source;
pub mod version;

pub use config::{CommandKind, FileConfig, OperationConfig, PinCommand};
pub use context::InstallContext;
pub use error::{Error, Result};
pub use installed::PackageRegistry;
pub use orchestrator::Orchestrator;
pub use results::{MessageSeverity, OperationResults, PackageResult};
