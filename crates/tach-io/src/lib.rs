pub mod metrics;
pub mod protocol;
pub mod server;

pub use metrics::{init_metrics, serve_metrics, MetricsUpdater};
pub use protocol::{respond, ErrorKind, ProtocolVersion, Request, Response};
pub use server::{ReadServer, ServerConfig, ServerError, MAX_REQUEST_LINE};
