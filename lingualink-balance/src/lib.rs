//! Backend pool management: registry, health probing, and selection.
//!
//! The [`BackendRegistry`] owns every backend's configuration and
//! metrics. The [`HealthProber`] drives the per-backend state machine
//! from periodic liveness probes. The [`Selector`] picks one backend
//! from the healthy subset under a configurable policy and accounts for
//! the connection it hands out.

mod health;
mod registry;
mod select;

pub use health::{HealthProber, ProberConfig, PROBE_TIMEOUT};
pub use registry::{
    BackendConfigView, BackendRegistry, BackendSnapshot, BackendStatus, MetricsSnapshot,
    SelectionCandidate, RESPONSE_TIME_WINDOW,
};
pub use select::{Selector, Strategy};
