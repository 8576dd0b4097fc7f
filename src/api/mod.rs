//! API layer
//!
//! HTTP handlers for:
//! - ActivityPub (for federation)
//! - NodeInfo discovery
//! - Metrics (Prometheus) and health
//! - Request logging middleware

mod activitypub;
mod ops;
mod request_log;
mod wellknown;

pub use activitypub::federation_router;
pub use ops::ops_router;
pub use request_log::{RequestLogFilter, record_request};
pub use wellknown::{NodeInfo, wellknown_router};
