//! # Server Dispatcher
//!
//! Owns a bound service, its completion queue and the live method handlers.
//!
//! ## Philosophy
//!
//! - **Always Listening**: `register` arms exactly one handler per method. Every handler
//!   arms its own successor the moment a call arrives, before running user code, so a
//!   method never stops accepting calls.
//! - **Ordered Shutdown**: the listener stops accepting (failing parked accepts and
//!   cancelling live calls) and the registry stops arming handlers before the queue is
//!   shut down, so every handler still gets to run its terminal step.

mod bidi;
mod client_streaming;
mod server_streaming;
mod unary;

use std::fmt;
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::dispatch;
use crate::queue::CompletionQueue;
use crate::registry::Registry;
use crate::status::Status;
use crate::transport;
use crate::transport::Bind;
use crate::transport::BidiStreamingAccept;
use crate::transport::ClientStreamingAccept;
use crate::transport::Listener;
use crate::transport::ServerStreamingAccept;
use crate::transport::UnaryAccept;

#[derive(Debug)]
pub enum Error {
    /// No listen address was configured.
    MissingListenAddr,
    /// The transport refused to bind the listen address.
    Bind(transport::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingListenAddr => write!(f, "No listen address configured"),
            Self::Bind(e) => write!(f, "Bind error: {}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<transport::Error> for Error {
    fn from(e: transport::Error) -> Self {
        Self::Bind(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Server tunables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    /// Number of dispatch loops started by `Server::spawn_workers`.
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
            workers: 1,
        }
    }
}

/// Fluent builder for a listening server.
#[derive(Debug, Default)]
pub struct ServerBuilder {
    config: ServerConfig,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listen(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.workers = workers.max(1);
        self
    }

    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Binds the listen address through `binder` and starts accepting calls.
    pub fn build<S, B>(self, binder: B) -> Result<Server<S>>
    where
        S: Send + Sync + 'static,
        B: Bind<S>,
    {
        if self.config.listen_addr.is_empty() {
            return Err(Error::MissingListenAddr);
        }
        let (service, listener) = binder.bind(&self.config.listen_addr)?;
        tracing::debug!(addr = listener.local_addr(), workers = self.config.workers, "server listening");

        Ok(Server {
            shared: Arc::new(Shared {
                service,
                queue: CompletionQueue::new(),
                registry: Registry::new(),
            }),
            listener,
            config: self.config,
        })
    }
}

/// State every method handler of one server holds on to.
pub(crate) struct Shared<S> {
    pub(crate) service: S,
    pub(crate) queue: CompletionQueue,
    pub(crate) registry: Registry,
}

/// The binding of one method, shared by every handler spawned for it.
pub(crate) struct Registration<E, H> {
    pub(crate) entry: E,
    pub(crate) handler: H,
}

/// An interaction pattern bound to a generated accept entry point.
///
/// `H` is the user's request handler; its shape depends on the pattern.
pub trait Method<S, H>: Send + Sync + 'static {
    /// Arms the first listening handler. Returns `false` once the server is shut down.
    #[doc(hidden)]
    fn register(self, server: &Server<S>, handler: H) -> bool;
}

/// Handler shape: `Fn(&Req) -> Result<Resp, Status>`.
pub struct Unary<S, Req, Resp>(pub UnaryAccept<S, Req, Resp>);

/// Handler shape: `Fn(&Req) -> Result<Vec<Resp>, Status>`.
pub struct ServerStreaming<S, Req, Resp>(pub ServerStreamingAccept<S, Req, Resp>);

/// Handler shape: `Fn(&[Req]) -> Result<Resp, Status>`.
pub struct ClientStreaming<S, Req, Resp>(pub ClientStreamingAccept<S, Req, Resp>);

/// Handler shape: `Fn(&[Req]) -> Result<Vec<Resp>, Status>`.
pub struct BidiStreaming<S, Req, Resp>(pub BidiStreamingAccept<S, Req, Resp>);

impl<S, Req, Resp, H> Method<S, H> for Unary<S, Req, Resp>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> std::result::Result<Resp, Status> + Send + Sync + 'static,
{
    fn register(self, server: &Server<S>, handler: H) -> bool {
        let registration = Arc::new(Registration { entry: self.0, handler });
        unary::listen(&server.shared, &registration)
    }
}

impl<S, Req, Resp, H> Method<S, H> for ServerStreaming<S, Req, Resp>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> std::result::Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    fn register(self, server: &Server<S>, handler: H) -> bool {
        let registration = Arc::new(Registration { entry: self.0, handler });
        server_streaming::listen(&server.shared, &registration)
    }
}

impl<S, Req, Resp, H> Method<S, H> for ClientStreaming<S, Req, Resp>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> std::result::Result<Resp, Status> + Send + Sync + 'static,
{
    fn register(self, server: &Server<S>, handler: H) -> bool {
        let registration = Arc::new(Registration { entry: self.0, handler });
        client_streaming::listen(&server.shared, &registration)
    }
}

impl<S, Req, Resp, H> Method<S, H> for BidiStreaming<S, Req, Resp>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> std::result::Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    fn register(self, server: &Server<S>, handler: H) -> bool {
        let registration = Arc::new(Registration { entry: self.0, handler });
        bidi::listen(&server.shared, &registration)
    }
}

/// Serving side dispatcher.
pub struct Server<S> {
    shared: Arc<Shared<S>>,
    listener: Box<dyn Listener>,
    config: ServerConfig,
}

impl<S> Server<S>
where
    S: Send + Sync + 'static,
{
    pub fn service(&self) -> &S {
        &self.shared.service
    }

    pub fn local_addr(&self) -> &str {
        self.listener.local_addr()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of live handlers: one listener per registered method plus one per call
    /// still being served.
    pub fn live_handlers(&self) -> usize {
        self.shared.registry.len()
    }

    /// Binds `handler` to a method and arms its first listening handler.
    ///
    /// Returns `false` when the server has already been shut down.
    pub fn register<M, H>(&self, method: M, handler: H) -> bool
    where
        M: Method<S, H>,
    {
        let armed = method.register(self, handler);
        if !armed {
            tracing::warn!("register on a server that has been shut down");
        }
        armed
    }

    /// Runs the dispatch loop until the server is shut down and every handler is done.
    pub async fn run(&self) {
        dispatch::run_until(&self.shared.queue, &self.shared.registry, || false).await;
    }

    /// Runs the dispatch loop until `stop` returns true after an event.
    pub async fn run_until<F>(&self, stop: F)
    where
        F: Fn() -> bool,
    {
        dispatch::run_until(&self.shared.queue, &self.shared.registry, stop).await;
    }

    /// Spawns `ServerConfig::workers` dispatch loops sharing this server's queue.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.config.workers.max(1))
            .map(|_| {
                let server = Arc::clone(self);
                tokio::spawn(async move { server.run().await })
            })
            .collect()
    }

    /// Stops accepting calls, then shuts the queue down.
    ///
    /// Dispatch loops keep running until every handler has reached its terminal step.
    pub fn shutdown(&self) {
        if self.shared.queue.is_shutdown() {
            return;
        }
        tracing::debug!(addr = self.listener.local_addr(), "server shutting down");
        self.listener.shutdown();
        self.shared.registry.close();
        self.shared.queue.shutdown();
    }
}

impl<S> Drop for Server<S> {
    fn drop(&mut self) {
        if !self.shared.queue.is_shutdown() {
            self.listener.shutdown();
            self.shared.registry.close();
            self.shared.queue.shutdown();
        }
        // Handlers hold the shared state; dropping them breaks the cycle.
        self.shared.registry.clear();
    }
}
