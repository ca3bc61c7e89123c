//! # Client Dispatcher
//!
//! Issues calls through a generated stub and drives them to completion.
//!
//! `invoke` is fire-and-forget: it builds the call state matching the entry point's
//! shape, arms its first step and returns. The outcome reaches the caller through the
//! callbacks, on whichever task runs a dispatch loop (`run`, `run_until` or
//! `spawn_workers`) over this client's completion queue.

mod bidi;
mod client_streaming;
mod server_streaming;
mod unary;

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::dispatch;
use crate::queue::CompletionQueue;
use crate::queue::Notifier;
use crate::registry::Registry;
use crate::status::Status;
use crate::transport::BidiStreamingStart;
use crate::transport::ClientStreamingStart;
use crate::transport::ServerStreamingStart;
use crate::transport::Stub;
use crate::transport::UnaryStart;

/// Receives the response(s) of a successful call.
pub type OnResponse<T> = Box<dyn FnOnce(T) + Send>;

/// Receives the final status of a failed call.
pub type OnError = Box<dyn FnOnce(Status) + Send>;

/// The error callback used when the caller does not supply one.
pub fn log_status(status: Status) {
    tracing::warn!(code = %status.code(), message = status.message(), "RPC request failed");
}

/// Client tunables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// How long `Client::connect` waits for the target to start listening.
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// An interaction pattern bound to a generated entry point.
///
/// Implemented by the wrappers `Unary`, `ServerStreaming`, `ClientStreaming` and
/// `BidiStreaming`, so the call state to build is picked at compile time.
pub trait Method<S>: Send + 'static {
    /// A single request, or the whole outbound sequence for client-side streams.
    type Input: Send + 'static;
    /// A single response, or the fully accumulated inbound sequence.
    type Output: Send + 'static;

    /// Arms the call state. Returns `false` when the client no longer accepts calls.
    #[doc(hidden)]
    fn begin(
        self,
        client: &Client<S>,
        input: Self::Input,
        on_response: OnResponse<Self::Output>,
        on_error: OnError,
    ) -> bool;
}

/// One request, one response.
pub struct Unary<S, Req, Resp>(pub UnaryStart<S, Req, Resp>);

/// One request, a stream of responses delivered as one sequence.
pub struct ServerStreaming<S, Req, Resp>(pub ServerStreamingStart<S, Req, Resp>);

/// A stream of requests, one response.
pub struct ClientStreaming<S, Req, Resp>(pub ClientStreamingStart<S, Req, Resp>);

/// A stream of requests, a stream of responses delivered as one sequence.
pub struct BidiStreaming<S, Req, Resp>(pub BidiStreamingStart<S, Req, Resp>);

impl<S, Req, Resp> Method<S> for Unary<S, Req, Resp>
where
    S: 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Input = Req;
    type Output = Resp;

    fn begin(self, client: &Client<S>, input: Req, on_response: OnResponse<Resp>, on_error: OnError) -> bool {
        let notifier = client.queue.notifier();
        client.registry.arm(|tag| {
            let rpc = (self.0)(&client.stub, input, &notifier);
            unary::UnaryCall::start(tag, rpc, on_response, on_error)
        })
        .is_some()
    }
}

impl<S, Req, Resp> Method<S> for ServerStreaming<S, Req, Resp>
where
    S: 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Input = Req;
    type Output = Vec<Resp>;

    fn begin(self, client: &Client<S>, input: Req, on_response: OnResponse<Vec<Resp>>, on_error: OnError) -> bool {
        let notifier = client.queue.notifier();
        client.registry.arm(|tag| {
            let rpc = (self.0)(&client.stub, input, &notifier);
            server_streaming::ServerStreamingCall::start(
                tag,
                rpc,
                server_streaming::Delivery::Batch { responses: Vec::new(), on_response },
                on_error,
            )
        })
        .is_some()
    }
}

impl<S, Req, Resp> Method<S> for ClientStreaming<S, Req, Resp>
where
    S: 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Input = Vec<Req>;
    type Output = Resp;

    fn begin(self, client: &Client<S>, input: Vec<Req>, on_response: OnResponse<Resp>, on_error: OnError) -> bool {
        let notifier = client.queue.notifier();
        client.registry.arm(|tag| {
            let rpc = (self.0)(&client.stub, &notifier);
            client_streaming::ClientStreamingCall::start(tag, rpc, input, on_response, on_error)
        })
        .is_some()
    }
}

impl<S, Req, Resp> Method<S> for BidiStreaming<S, Req, Resp>
where
    S: 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
{
    type Input = Vec<Req>;
    type Output = Vec<Resp>;

    fn begin(self, client: &Client<S>, input: Vec<Req>, on_response: OnResponse<Vec<Resp>>, on_error: OnError) -> bool {
        let notifier = client.queue.notifier();
        client.registry.arm(|tag| {
            let rpc = (self.0)(&client.stub, &notifier);
            bidi::BidiCall::start(tag, rpc, input, on_response, on_error)
        })
        .is_some()
    }
}

/// Calling side dispatcher: one stub, one completion queue.
pub struct Client<S> {
    stub: S,
    queue: CompletionQueue,
    registry: Registry,
    config: ClientConfig,
}

impl<S> Client<S>
where
    S: Send + Sync + 'static,
{
    pub fn new(stub: S) -> Self {
        Self::with_config(stub, ClientConfig::default())
    }

    pub fn with_config(stub: S, config: ClientConfig) -> Self {
        Self {
            stub,
            queue: CompletionQueue::new(),
            registry: Registry::new(),
            config,
        }
    }

    pub fn stub(&self) -> &S {
        &self.stub
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Handle transports use to post completions for this client's calls.
    pub fn notifier(&self) -> Notifier {
        self.queue.notifier()
    }

    /// Number of calls that have not reached their terminal step yet.
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Starts a call; failures are logged by `log_status`.
    ///
    /// Returns `false` without starting anything when the client has been shut down.
    pub fn invoke<M, F>(&self, method: M, input: M::Input, on_response: F) -> bool
    where
        M: Method<S>,
        F: FnOnce(M::Output) + Send + 'static,
    {
        self.invoke_with_error(method, input, on_response, log_status)
    }

    /// Starts a call with an explicit error callback.
    ///
    /// Exactly one of `on_response` and `on_error` runs once the call completes.
    pub fn invoke_with_error<M, F, E>(&self, method: M, input: M::Input, on_response: F, on_error: E) -> bool
    where
        M: Method<S>,
        F: FnOnce(M::Output) + Send + 'static,
        E: FnOnce(Status) + Send + 'static,
    {
        let armed = method.begin(self, input, Box::new(on_response), Box::new(on_error));
        if !armed {
            tracing::warn!("invoke on a client that has been shut down");
        }
        armed
    }

    /// Starts a server-streaming call whose responses are pushed one at a time.
    ///
    /// `on_message` runs for every response as it arrives; `on_error` runs only if the
    /// stream ends with a non-ok status.
    pub fn subscribe<Req, Resp, F, E>(
        &self,
        entry: ServerStreamingStart<S, Req, Resp>,
        request: Req,
        on_message: F,
        on_error: E,
    ) -> bool
    where
        Req: Send + 'static,
        Resp: Send + 'static,
        F: FnMut(Resp) + Send + 'static,
        E: FnOnce(Status) + Send + 'static,
    {
        let notifier = self.queue.notifier();
        let armed = self.registry.arm(|tag| {
            let rpc = entry(&self.stub, request, &notifier);
            server_streaming::ServerStreamingCall::start(
                tag,
                rpc,
                server_streaming::Delivery::Push(Box::new(on_message)),
                Box::new(on_error),
            )
        });
        if armed.is_none() {
            tracing::warn!("subscribe on a client that has been shut down");
        }
        armed.is_some()
    }

    /// Runs the dispatch loop until the client is shut down and all calls are done.
    pub async fn run(&self) {
        dispatch::run_until(&self.queue, &self.registry, || false).await;
    }

    /// Runs the dispatch loop until `stop` returns true after an event.
    pub async fn run_until<F>(&self, stop: F)
    where
        F: Fn() -> bool,
    {
        dispatch::run_until(&self.queue, &self.registry, stop).await;
    }

    /// Spawns `workers` dispatch loops sharing this client's queue.
    pub fn spawn_workers(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|_| {
                let client = Arc::clone(self);
                tokio::spawn(async move { client.run().await })
            })
            .collect()
    }

    /// Refuses new calls and lets the dispatch loops return once in-flight calls are done.
    pub fn shutdown(&self) {
        self.registry.close();
        self.queue.shutdown();
    }
}

impl<S> Client<S>
where
    S: Stub,
{
    /// Waits up to `ClientConfig::connect_timeout` for the stub's target to be reachable.
    pub async fn connect(&self) -> bool {
        let connected = self
            .stub
            .channel()
            .wait_for_connected(self.config.connect_timeout)
            .await;
        if !connected {
            tracing::debug!(timeout = ?self.config.connect_timeout, "connection attempt timed out");
        }
        connected
    }
}

impl<S> Drop for Client<S> {
    fn drop(&mut self) {
        self.registry.close();
        self.queue.shutdown();
        if !self.registry.is_empty() {
            tracing::debug!(live = self.registry.len(), "client dropped with calls in flight");
        }
        self.registry.clear();
    }
}
