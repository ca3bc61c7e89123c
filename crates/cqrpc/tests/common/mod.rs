//! A calculator service over the in-memory transport, written the way generated
//! stub and service code would look, plus shared test helpers.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::oneshot;

use cqrpc::Client;
use cqrpc::Code;
use cqrpc::Notifier;
use cqrpc::Server;
use cqrpc::ServerBuilder;
use cqrpc::Status;
use cqrpc::Tag;
use cqrpc::client::Method;
use cqrpc::mem::MemChannel;
use cqrpc::mem::MemNetwork;
use cqrpc::mem::MemServer;
use cqrpc::server;
use cqrpc::transport::Channel;
use cqrpc::transport::ClientReader;
use cqrpc::transport::ClientReaderWriter;
use cqrpc::transport::ClientUnary;
use cqrpc::transport::ClientWriter;
use cqrpc::transport::ServerReader;
use cqrpc::transport::ServerReaderWriter;
use cqrpc::transport::ServerUnary;
use cqrpc::transport::ServerWriter;
use cqrpc::transport::Stub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Number(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub count: usize,
    pub total: i64,
}

pub const METHODS: &[&str] = &["Double", "Range", "Tally", "Scale"];

// --- Generated client stub ---

pub struct CalculatorStub {
    channel: MemChannel,
}

impl CalculatorStub {
    pub fn new(channel: MemChannel) -> Self {
        Self { channel }
    }

    pub fn double(&self, request: Number, notifier: &Notifier) -> Box<dyn ClientUnary<Number>> {
        self.channel.unary("Double", request, notifier)
    }

    pub fn range(&self, request: Number, notifier: &Notifier) -> Box<dyn ClientReader<Number>> {
        self.channel.server_streaming("Range", request, notifier)
    }

    pub fn tally(&self, notifier: &Notifier) -> Box<dyn ClientWriter<Number, Summary>> {
        self.channel.client_streaming("Tally", notifier)
    }

    pub fn scale(&self, notifier: &Notifier) -> Box<dyn ClientReaderWriter<Number, Number>> {
        self.channel.bidi_streaming("Scale", notifier)
    }

    /// A method the service does not declare.
    pub fn square(&self, request: Number, notifier: &Notifier) -> Box<dyn ClientUnary<Number>> {
        self.channel.unary("Square", request, notifier)
    }
}

impl Stub for CalculatorStub {
    fn channel(&self) -> &dyn Channel {
        &self.channel
    }
}

// --- Generated service ---

pub struct CalculatorService {
    server: MemServer,
}

impl CalculatorService {
    pub fn new(server: MemServer) -> Self {
        Self { server }
    }

    pub fn request_double(&self, notifier: &Notifier, tag: Tag) -> Box<dyn ServerUnary<Number, Number>> {
        self.server.accept_unary("Double", notifier, tag)
    }

    pub fn request_range(&self, notifier: &Notifier, tag: Tag) -> Box<dyn ServerWriter<Number, Number>> {
        self.server.accept_server_streaming("Range", notifier, tag)
    }

    pub fn request_tally(&self, notifier: &Notifier, tag: Tag) -> Box<dyn ServerReader<Number, Summary>> {
        self.server.accept_client_streaming("Tally", notifier, tag)
    }

    pub fn request_scale(&self, notifier: &Notifier, tag: Tag) -> Box<dyn ServerReaderWriter<Number, Number>> {
        self.server.accept_bidi_streaming("Scale", notifier, tag)
    }
}

// --- Handlers ---

pub fn double(request: &Number) -> Result<Number, Status> {
    if request.0 < 0 {
        return Err(Status::invalid_argument("negative input"));
    }
    Ok(Number(request.0 * 2))
}

pub fn range(request: &Number) -> Result<Vec<Number>, Status> {
    if request.0 < 0 {
        return Err(Status::new(Code::OutOfRange, "negative length"));
    }
    Ok((1..=request.0).map(Number).collect())
}

pub fn tally(requests: &[Number]) -> Result<Summary, Status> {
    Ok(Summary {
        count: requests.len(),
        total: requests.iter().map(|n| n.0).sum(),
    })
}

pub fn scale(requests: &[Number]) -> Result<Vec<Number>, Status> {
    Ok(requests.iter().map(|n| Number(n.0 * 10)).collect())
}

// --- Helpers ---

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Builds a calculator server on `addr` without registering any method.
pub fn bind(network: &MemNetwork, addr: &str, workers: usize) -> Arc<Server<CalculatorService>> {
    let server = ServerBuilder::new()
        .listen(addr)
        .workers(workers)
        .build(network.serve(METHODS, CalculatorService::new))
        .expect("Failed to bind calculator server");
    Arc::new(server)
}

/// Registers the four calculator methods.
pub fn register_all(server: &Server<CalculatorService>) {
    assert!(server.register(server::Unary(CalculatorService::request_double), double));
    assert!(server.register(server::ServerStreaming(CalculatorService::request_range), range));
    assert!(server.register(server::ClientStreaming(CalculatorService::request_tally), tally));
    assert!(server.register(server::BidiStreaming(CalculatorService::request_scale), scale));
}

/// Binds, registers and starts the server's dispatch loops.
pub fn start_server(network: &MemNetwork, addr: &str, workers: usize) -> Arc<Server<CalculatorService>> {
    let server = bind(network, addr, workers);
    register_all(&server);
    server.spawn_workers();
    server
}

/// A client for `addr` with `workers` dispatch loops running.
pub fn start_client(network: &MemNetwork, addr: &str, workers: usize) -> Arc<Client<CalculatorStub>> {
    let client = Arc::new(Client::new(CalculatorStub::new(network.channel(addr))));
    client.spawn_workers(workers);
    client
}

/// Invokes `method` and waits for whichever callback runs.
pub async fn call<M>(client: &Client<CalculatorStub>, method: M, input: M::Input) -> Result<M::Output, Status>
where
    M: Method<CalculatorStub>,
{
    let (tx, rx) = oneshot::channel();
    let on_response_tx = Arc::new(Mutex::new(Some(tx)));
    let on_error_tx = Arc::clone(&on_response_tx);

    let accepted = client.invoke_with_error(
        method,
        input,
        move |output| {
            if let Some(tx) = on_response_tx.lock().unwrap().take() {
                let _ = tx.send(Ok(output));
            }
        },
        move |status| {
            if let Some(tx) = on_error_tx.lock().unwrap().take() {
                let _ = tx.send(Err(status));
            }
        },
    );
    assert!(accepted, "client refused the call");

    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("Call did not complete in time")
        .expect("Call state dropped without a callback")
}

/// Polls `condition` until it holds or two seconds pass.
pub async fn wait_until<F>(condition: F) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}
