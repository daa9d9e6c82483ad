//! Application layer: concrete requests and scheduling simulations
//!
//! This layer drives the domain tree the way a node's request starter would.

pub mod error;
pub mod request;
pub mod simulation;

pub use error::{ApplicationError, ApplicationResult};
pub use request::Request;
pub use simulation::{DrainReport, FairnessReport, Simulation};
