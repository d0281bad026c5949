//! Common types for Kiln: CRDs, errors, and the controller runtime pieces
//! shared by every reconciler (cache, work queue, dependency tracking)

#![deny(missing_docs)]

pub mod config;
pub mod crd;
pub mod duck;
pub mod error;
pub mod identity;
pub mod informer;
pub mod lifecycle;
pub mod queue;
pub mod telemetry;
pub mod tracker;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of every Kiln resource
pub const KILN_GROUP: &str = "kiln.dev";

/// Field manager name used for status writes
pub const FIELD_MANAGER: &str = "kiln-controller";
