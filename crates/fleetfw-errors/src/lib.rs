//! Centralized error types for fleet firmware orchestration
//!
//! This crate provides the error taxonomy shared by the analysis, planning and
//! execution layers of the orchestrator.
//!
//! # Architecture
//!
//! - [`common`]: Top-level [`FleetError`] enum, classification and context helpers
//! - [`protocol`]: Management-protocol failures and their recoverability
//! - [`catalog`]: Firmware catalog and version parsing errors
//!
//! # Propagation
//!
//! Analysis errors (for example one host's [`FleetError::IncompatibleUpdate`])
//! are recorded against that host by callers and never abort sibling hosts.
//! Execution errors carry a [`ErrorSeverity`] so that the executor can decide
//! whether to halt a phase.
//!
//! # Example
//!
//! ```
//! use fleetfw_errors::prelude::*;
//!
//! fn reserve(cluster: &str, active: usize, batch: usize, min_active: usize) -> Result<()> {
//!     if active < batch + min_active {
//!         return Err(FleetError::capacity(cluster, active, batch, min_active));
//!     }
//!     Ok(())
//! }
//!
//! assert!(matches!(reserve("prod-01", 4, 3, 2), Err(FleetError::CapacityViolation { .. })));
//! ```

#![deny(unsafe_op_in_unsafe_fn, clippy::unwrap_used)]
#![warn(missing_docs, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod catalog;
pub mod common;
pub mod prelude;
pub mod protocol;

pub use catalog::{CatalogError, VersionError};
pub use common::{ErrorCategory, ErrorContext, ErrorSeverity, FleetError, ResultExt};
pub use protocol::{FailureKind, ProtocolFailure};

/// A specialized `Result` type for orchestration operations.
pub type Result<T> = std::result::Result<T, FleetError>;
