//! Streaming reverse proxy.
//!
//! ```text
//! axum route ──► handler (buffer body, extract model, pick adapter)
//!                   │
//!                   ▼
//!     recover ► auth ► rate limit ► policies ► metrics ► upstream ──► provider
//!                                 (usage tap)             │
//!   client ◄── streaming (write deadline) ◄───────────────┘
//! ```

pub mod handler;
pub mod middleware;
pub mod prometheus;
mod request;
pub mod server;
mod streaming;
pub mod upstream;

pub use handler::{extract_model, index_of_segment, ProxyCore};
pub use middleware::{PolicyEngine, Transport, TransportError};
pub use prometheus::PrometheusRecorder;
pub use request::ProxyRequest;
pub use server::{build_router, serve, ServerDependencies, DEFAULT_SUFFIXES};
pub use upstream::{build_http_client, UpstreamTransport};
