//! Incident coordinator
//!
//! Fans each alert out to its responders, correlates their answers per alert,
//! and forwards exactly one aggregate per alert downstream:
//! - **Complete:** every expected responder answered
//! - **Degraded:** the response deadline passed first
//!
//! Collaborators that missed the broadcast can look an alert up by id.

mod aggregator;
mod config;
mod core;
mod dispatcher;
mod forwarder;
mod handle;
mod ingest;
mod lookup;
mod messages;
mod metrics;
mod registry;
mod sweeper;

pub use aggregator::ResponseAggregator;
pub use config::CoordinatorConfig;
pub use core::Coordinator;
pub use dispatcher::{DispatchReport, FanoutDispatcher};
pub use forwarder::{DownstreamForwarder, RelayHandler};
pub use handle::CoordinatorHandle;
pub use ingest::AlertIngestor;
pub use lookup::{AlertLookupResponder, LookupClient};
pub use messages::{AggregatePayload, AlertDataRequest, AlertDataResponse, AnalyzerResponse, RootCauseResult};
pub use metrics::{CoordinatorMetrics, Metrics};
pub use registry::{AttachOutcome, AuditRecord, DiscardReason, RegistryError, SessionRegistry};
pub use sweeper::TimeoutSweeper;
