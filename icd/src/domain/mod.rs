//! Domain types for incident coordination
//!
//! Alerts, responder roles, priority tiers and the per-alert session record.

mod alert;
mod priority;
mod role;
mod session;

pub use alert::{EnrichedAlert, RawAlert, SearchContext, derive_alert_id};
pub use priority::Priority;
pub use role::ResponderRole;
pub use session::{AlertSession, SessionStatus};
