//! prefork-proxy library
//!
//! A master process accepts TCP connections and passes each descriptor to
//! one of N worker processes over a Unix control channel. Each worker
//! multiplexes its connections on a single thread and forwards one HTTP/1.1
//! request per connection to an upstream.

// Core subsystems
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod http;
pub mod net;
pub mod worker;

// Traffic management
pub mod load_balancer;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::ProxyConfig;
pub use dispatch::{Dispatcher, WorkerSet};
pub use lifecycle::Shutdown;
pub use worker::WorkerRuntime;
