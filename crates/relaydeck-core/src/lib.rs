//! Shared data model for the Relaydeck access layer.
//!
//! This crate is the foundation of the workspace: the error taxonomy every
//! component speaks, the circuit breaker and health data model that crosses
//! into the UI layer, cache partitioning types, and the trait seams through
//! which the host application supplies credentials and connectivity status.
//!
//! It performs no I/O of its own.

pub mod circuit;
pub mod error;
pub mod health;
pub mod metric;
pub mod scope;
pub mod traits;

pub use circuit::{CircuitBreakerStatus, CircuitState, CircuitTransition};
pub use error::{ApiError, ApiResult, RETRYABLE_STATUS};
pub use health::{BackendComponents, BackendHealthReport, ComponentStatus, HealthState};
pub use metric::{ApiCallMetric, MetricsSummary};
pub use scope::{EntityKind, ScopeKey};
pub use traits::{AlwaysOnline, AuthProvider, ConnectivityProbe, StaticToken};
