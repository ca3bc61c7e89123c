//! # cqrpc
//!
//! Unary and streaming RPC call state machines driven by a shared completion queue.

pub mod client;
pub mod mem;
pub mod queue;
pub mod server;
pub mod status;
pub mod transport;

mod dispatch;
mod registry;

pub use client::Client;
pub use client::ClientConfig;
pub use queue::CompletionQueue;
pub use queue::Event;
pub use queue::Notifier;
pub use queue::Tag;
pub use registry::Kind;
pub use server::Server;
pub use server::ServerBuilder;
pub use server::ServerConfig;
pub use status::Code;
pub use status::Status;
