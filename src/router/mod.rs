//! Router Module
//!
//! Instance selection and round-robin rotation over keys and models.

pub mod registry;
pub mod round_robin;

pub use registry::{enabled_instances, EnabledInstance, Registry};
pub use round_robin::{InstanceCounters, RoundRobin};
