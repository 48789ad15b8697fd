//! Price Feed WebSocket Integration
//!
//! Client side of the upstream price feed: wire messages, JSON codec,
//! reconnect policy, the shared link handle and the connection supervisor.

pub mod codec;
pub mod link;
pub mod messages;
pub mod reconnect;
pub mod supervisor;

pub use codec::{CodecError, JsonCodec};
pub use link::{FeedLink, FeedStatus};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use supervisor::{ConnectionSupervisor, FeedEvent, SupervisorConfig, SupervisorError};
