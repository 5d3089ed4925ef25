//! volley - rate-limited bulk HTTP dispatch
//!
//! Pushes a large backlog of outbound requests through one or more
//! connection pools under a per-group rate ceiling, delivering every
//! outcome to registered callbacks:
//! - Ticket-based rate limiting, one budget per pool group
//! - Direct, HTTP-proxy and SOCKS-proxy pools over one transport trait
//! - Least-loaded dispatch inside a group, bounded in-flight per pool
//! - Shared store, live RPS gauges, and retry/exit hooks in every callback
//!
//! # Architecture
//!
//! ```text
//! submit ──> request queue ──┬─> controller (group 0) ──> pools ──> transport
//!                            └─> controller (group 1) ──> pools ──> transport
//!         ticket clock ──permits──^        │
//!         rps counter <──completions───────┤
//!         callbacks (response | error) <───┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use volley::{Client, PoolSpec, Request};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), volley::ClientError> {
//!     let mut client = Client::new(50.0, vec![PoolSpec::direct()]);
//!
//!     for i in 0..100 {
//!         client.submit(Request::get("https://httpbin.org/get").with_id(i))?;
//!     }
//!     client.on_response(|response, ctx| {
//!         println!("{:?} -> {} (rps1 {})", response.id, response.status, ctx.rps1());
//!     });
//!     client.on_error(|failure, _ctx| {
//!         eprintln!("{:?} failed: {}", failure.id, failure.error);
//!     });
//!
//!     client.run().await
//! }
//! ```

pub mod auth;
pub mod client;
pub mod context;
pub mod error;
pub mod pool;
pub mod request;
pub mod response;
pub mod rps;
pub mod transport;

mod controller;
mod queue;
mod store;
mod ticket;

// Re-export the main types for convenience
pub use auth::{AuthConfig, AuthStrategy};
pub use client::{Client, Config};
pub use context::Context;
pub use error::{ClientError, DispatchError};
pub use pool::PoolSpec;
pub use request::{Method, Request};
pub use response::{Failure, Response};
pub use rps::RpsSnapshot;
pub use store::StoreMap;
pub use transport::{HttpTransport, MockTransport, Transport, TransportError};
