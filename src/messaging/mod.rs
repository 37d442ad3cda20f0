//! Message protocol between processes.
//!
//! A service declared once as a [`ServiceDefinition`] can run in three modes:
//!   - [`RemoteServiceHost`]: serves the definition over a [`Channel`]
//!   - [`RemoteServiceClient`]: proxies it from another process
//!   - [`LocalService`]: runs it in-process with no channel at all
//!
//! All three implement [`Service`](crate::service::Service), so the
//! backbone binds whichever one the deployment calls for.
//! [`MemoryNetwork`] provides an in-process [`Channel`] for tests and
//! single-binary deployments.

mod channel;
mod client;
mod definition;
mod host;
mod local;
mod memory;
mod protocol;

pub use channel::{
    Channel, ChannelHandler, ChannelIdentity, ConnectionEvent, ConnectionHandler, Target,
};
pub use client::{PendingReply, RemoteServiceClient};
pub use definition::{MessageHandler, ServiceDefinition, ServiceHandle};
pub use host::RemoteServiceHost;
pub use local::LocalService;
pub use memory::{MemoryChannel, MemoryNetwork};
pub use protocol::{
    normalize_args, topic, CallRequest, CallResponse, ErrorResponse, EventEnvelope, Fault,
};
