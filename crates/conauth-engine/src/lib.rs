//! # conauth-engine
//!
//! Continuous-authorization workflow engine for the conauth compliance
//! platform.
//!
//! This crate implements the authorization domain, providing:
//!
//! - **Indicator Ledger**: One compliance record per (service, indicator)
//!   pair, mutated by manual review and automated validation
//! - **Validation Scheduler**: A catalogue of automated checks, a
//!   time-driven scan loop with a bounded worker pool, and rule status
//!   derived from execution history
//! - **Incident Lifecycle**: A guarded response state machine with a
//!   parallel external-reporting sub-state and severity-driven deadlines
//! - **Change Control**: A guarded lifecycle gating approval on completed
//!   impact analysis and a conditional notification requirement
//! - **Authorization Rollup**: Per-service denormalized compliance
//!   counters, always refreshed by full recount
//! - **Report Aggregator**: Immutable quarterly snapshots of all of the
//!   above
//!
//! ## Guarantees
//!
//! - **Guarded transitions**: Out-of-order lifecycle calls fail with a
//!   typed precondition error; they are never silently reordered
//! - **Serialized history**: Per-aggregate CAS saves keep concurrent
//!   transitions from racing; concurrent work on different aggregates is
//!   unconstrained
//! - **Absorbed check failures**: Failing or erroring executions feed each
//!   rule's own status machine and never break the scan loop
//!
//! ## Example
//!
//! ```rust,no_run
//! use conauth_engine::error::Result;
//! use conauth_engine::engine::Engine;
//! use conauth_engine::outbox::{shared, InMemoryOutbox};
//! use conauth_engine::rollup::ImpactTier;
//!
//! # async fn demo() -> Result<()> {
//! let sink = shared(InMemoryOutbox::new());
//! let (engine, _stores) = Engine::with_memory_stores(sink);
//!
//! let service = engine.register_service("payments-api", ImpactTier::Moderate).await?;
//! let metrics = engine.recount_metrics(&service.id).await?;
//! assert_eq!(metrics.total_indicators, 0);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod change;
pub mod check;
pub mod engine;
pub mod error;
pub mod events;
pub mod executor;
pub mod incident;
pub mod indicator;
pub mod metrics;
pub mod outbox;
pub mod report;
pub mod rollup;
pub mod scheduler;
pub mod store;
pub mod timeline;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::change::{ChangeRequest, ChangeStatus, ChangeType, ImpactAnalysis, ImpactLevel, RiskDelta};
    pub use crate::check::{
        CheckConfig, CheckDefinition, ExecutionOutcome, ExecutionRecord, ExecutionStatus,
        Frequency, RuleStatus, FAILURE_THRESHOLD,
    };
    pub use crate::engine::{Engine, EngineDeps};
    pub use crate::error::{Error, Result};
    pub use crate::events::{EngineEventData, EventEnvelope};
    pub use crate::executor::{CheckExecutor, CheckRequest, ExecutorError};
    pub use crate::incident::{
        Incident, IncidentCategory, IncidentSeverity, IncidentStatus, ReportingStatus,
    };
    pub use crate::indicator::{
        ComplianceStatus, ImplementationStatus, IndicatorRecord, ValidationMethod,
    };
    pub use crate::metrics::EngineMetrics;
    pub use crate::outbox::{shared, ChannelSink, EventSink, InMemoryOutbox, SharedMemoryOutbox};
    pub use crate::report::{AuthorizationReport, ReportAggregator, ReportPeriod, ReportStatus};
    pub use crate::rollup::{
        AuthorizationRollup, AuthorizationStatus, ComplianceMetrics, ImpactTier,
        ServiceAuthorization,
    };
    pub use crate::scheduler::{SchedulerConfig, TickSummary, ValidationScheduler};
    pub use crate::store::memory::InMemoryStores;
    pub use crate::store::{CasResult, EvidenceMetadata, VulnerabilityRecord, VulnerabilitySeverity};
    pub use crate::timeline::{Timeline, TimelineEntry};
}
