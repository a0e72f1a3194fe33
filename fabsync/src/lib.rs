//! fabsync: declarative fabric configuration, reconciled against a fabric
//! controller.
//!
//! Lifecycle managers push desired state (switches, VRFs, networks,
//! interfaces, service route peerings) to the controller's REST API, trigger
//! device-side deployment jobs, and poll until convergence, timeout, or
//! failure.

pub mod error;
pub mod model;
pub mod paths;
pub mod reconcile;
pub mod reconciler;

pub use error::{Error, Result};
