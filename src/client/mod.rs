//! Resilient client connector for the realtime stream
//!
//! Used by observer processes (see the `hookwatch-tail` binary) to follow the
//! broadcast hub through network failures.

mod backoff;
mod connector;
mod outbox;

pub use backoff::Backoff;
pub use connector::{ConnectionState, Connector, ConnectorConfig, ConnectorError};
pub use outbox::{Outbox, Pending};
