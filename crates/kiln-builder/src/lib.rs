//! Builder and ClusterBuilder reconciliation for Kiln
//!
//! The reconciler keeps a builder image in sync with its store and stack.
//! Registry work is delegated to a [`controller::BuilderCreator`]; everything
//! else (caching, dependency tracking, credentials, status writes) lives here
//! or in `kiln-common`.

#![deny(missing_docs)]

pub mod controller;
pub mod controller_runner;
pub mod keychain;
pub mod repository;
pub mod status;

pub use controller::{reconcile, BuilderCreator, Context};
pub use controller_runner::run;
pub use keychain::{Keychain, KeychainFactory, ServiceAccountKeychainFactory};
pub use repository::{BuildpackRepository, StoreRepository};
pub use status::{KubeStatusClient, StatusClient};
