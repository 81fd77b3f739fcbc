//! incidentd - incident fan-out and response correlation
//!
//! Every incoming alert is enriched, cached and broadcast to a set of analyzer
//! agents. Their answers are correlated per alert and exactly one aggregate is
//! forwarded downstream, either once all expected responders answered or, with
//! the missing ones marked, once the response deadline passed.
//!
//! # Modules
//!
//! - [`bus`] - publish/subscribe transport, broker and reconnecting listeners
//! - [`cache`] - TTL alert cache with an optional JSONL journal
//! - [`coordinator`] - session registry, fan-out, aggregation and timeout sweeps
//! - [`domain`] - alerts, responder roles, priorities and sessions
//! - [`enrich`] - alert enrichment
//! - [`config`] - configuration types and loading
//! - [`cli`] - command-line interface

pub mod bus;
pub mod cache;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod enrich;

pub use bus::{BusConfig, BusError, MemoryBus, MessageBus, SocketBus};
pub use cache::AlertCache;
pub use config::Config;
pub use coordinator::{AggregatePayload, Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics};
pub use domain::{AlertSession, EnrichedAlert, Priority, RawAlert, ResponderRole, SessionStatus};
pub use enrich::{AlertEnricher, KeywordEnricher};
