//! Real-time fan-out: wire protocol, session sinks and the connection registry.

pub mod protocol;
pub mod registry;
pub mod sink;

pub use protocol::{ClientMessage, ServerMessage, parse_timestamp};
pub use registry::ConnectionRegistry;
pub use sink::{ChannelSink, SessionSink, SinkFuture};
