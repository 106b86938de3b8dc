//! runbox service layer.
//!
//! - [`ExecutionService`]: one-shot runs with a timeout, snapshot and upload
//! - [`DeploymentManager`]: deploy / invoke / patch / delete of persistent
//!   file-backed deployments
//!
//! Both take the isolation manager by `Arc` so one process-wide backend is
//! shared between them.

pub mod bucket;
pub mod deployment;
pub mod error;
pub mod execution;
pub mod process;

pub use deployment::{DeployResult, Deployment, DeploymentManager, InvokeResult};
pub use error::ServiceError;
pub use execution::{ExecuteRequest, ExecutionResult, ExecutionService};
