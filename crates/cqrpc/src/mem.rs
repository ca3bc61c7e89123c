//! # In-Memory Transport
//!
//! A process-local transport with the call semantics of a real RPC stack, used to run
//! clients and servers against each other without sockets.
//!
//! ## Philosophy
//!
//! - **Same Contract**: Every call object implements the traits in `transport`, posts
//!   its completions through the `Notifier` it was created with and never blocks.
//! - **Addressed**: A `MemNetwork` maps listen addresses to servers. Calling an address
//!   nobody listens on yields `Unavailable`, calling a method the service does not
//!   declare yields `Unimplemented`.
//! - **Queued Accepts**: Calls to a declared method wait in the server until a handler
//!   asks for one, and a parked accept is handed the next call that arrives.
//! - **Nothing Hangs**: Shutting a server down fails its parked accepts, rejects
//!   queued calls and cancels live ones, so every armed step still completes.

use std::any::Any;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::sync::Weak;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::Notify;

use crate::queue::Notifier;
use crate::queue::Tag;
use crate::status::Status;
use crate::transport;
use crate::transport::Channel;
use crate::transport::ClientReader;
use crate::transport::ClientReaderWriter;
use crate::transport::ClientUnary;
use crate::transport::ClientWriter;
use crate::transport::Listener;
use crate::transport::ServerReader;
use crate::transport::ServerReaderWriter;
use crate::transport::ServerUnary;
use crate::transport::ServerWriter;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
//  CALL PIPES
// ============================================================================

/// One direction of a call.
struct Half<T> {
    queue: VecDeque<T>,
    closed: bool,
    /// A read that found the queue empty, waiting for the next message.
    reader: Option<(Notifier, Tag)>,
    /// Message handed over by the last successful read.
    delivered: Option<T>,
}

impl<T> Half<T> {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            closed: false,
            reader: None,
            delivered: None,
        }
    }

    fn push(&mut self, message: T) -> bool {
        if self.closed {
            return false;
        }
        match self.reader.take() {
            Some((notifier, tag)) => {
                self.delivered = Some(message);
                notifier.post(tag, true);
            }
            None => self.queue.push_back(message),
        }
        true
    }

    fn read(&mut self, notifier: &Notifier, tag: Tag) {
        if let Some(message) = self.queue.pop_front() {
            self.delivered = Some(message);
            notifier.post(tag, true);
        } else if self.closed {
            notifier.post(tag, false);
        } else {
            self.reader = Some((notifier.clone(), tag));
        }
    }

    fn close(&mut self) {
        self.closed = true;
        if let Some((notifier, tag)) = self.reader.take() {
            notifier.post(tag, false);
        }
    }
}

/// State shared by the client and server halves of one call.
struct Pipe<Req, Resp> {
    request: Option<Req>,
    requests: Half<Req>,
    responses: Half<Resp>,
    response: Option<Resp>,
    status: Option<Status>,
    /// The client's finish step, waiting for the final status.
    finisher: Option<(Notifier, Tag)>,
}

type SharedPipe<Req, Resp> = Arc<Mutex<Pipe<Req, Resp>>>;

impl<Req, Resp> Pipe<Req, Resp> {
    fn new(request: Option<Req>) -> Self {
        Self {
            request,
            requests: Half::new(),
            responses: Half::new(),
            response: None,
            status: None,
            finisher: None,
        }
    }

    fn failed(status: Status) -> SharedPipe<Req, Resp> {
        let mut pipe = Self::new(None);
        pipe.settle(status);
        Arc::new(Mutex::new(pipe))
    }

    /// Records the final status and closes both directions.
    fn settle(&mut self, status: Status) {
        self.status = Some(status);
        self.requests.close();
        self.responses.close();
        if let Some((notifier, tag)) = self.finisher.take() {
            notifier.post(tag, true);
        }
    }

    /// Server side finish. Fails when the call has already ended.
    fn complete(&mut self, response: Option<Resp>, status: Status) -> bool {
        if self.status.is_some() {
            return false;
        }
        self.response = if status.is_ok() { response } else { None };
        self.settle(status);
        true
    }

    fn await_status(&mut self, notifier: &Notifier, tag: Tag) {
        if self.status.is_some() {
            notifier.post(tag, true);
        } else {
            self.finisher = Some((notifier.clone(), tag));
        }
    }
}

/// Type-erased handle used to end a call from the server's bookkeeping.
trait Cancel: Send + Sync {
    fn cancel(&self, status: Status);
}

impl<Req: Send, Resp: Send> Cancel for Mutex<Pipe<Req, Resp>> {
    fn cancel(&self, status: Status) {
        let mut pipe = lock(self);
        if pipe.status.is_none() {
            pipe.settle(status);
        }
    }
}

// ============================================================================
//  ACCEPT QUEUES
// ============================================================================

/// A call that reached the server and waits for a handler.
struct IncomingCall {
    pipe: Box<dyn Any + Send>,
    cancel: Arc<dyn Cancel>,
}

enum Offer {
    Taken,
    /// The waiting handler is gone.
    Vacant(IncomingCall),
    /// The handler was generated for other message types.
    Mismatch(Box<dyn Waiter>, IncomingCall),
}

/// A parked accept.
trait Waiter: Send {
    fn offer(self: Box<Self>, call: IncomingCall) -> Offer;
    fn reject(self: Box<Self>);
}

struct TypedWaiter<Req, Resp> {
    cell: Weak<Mutex<Option<SharedPipe<Req, Resp>>>>,
    notifier: Notifier,
    tag: Tag,
}

impl<Req, Resp> Waiter for TypedWaiter<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn offer(self: Box<Self>, call: IncomingCall) -> Offer {
        let Some(cell) = self.cell.upgrade() else {
            return Offer::Vacant(call);
        };
        match call.pipe.downcast::<SharedPipe<Req, Resp>>() {
            Ok(pipe) => {
                *lock(&cell) = Some(*pipe);
                self.notifier.post(self.tag, true);
                Offer::Taken
            }
            Err(pipe) => Offer::Mismatch(self, IncomingCall { pipe, cancel: call.cancel }),
        }
    }

    fn reject(self: Box<Self>) {
        if self.cell.strong_count() > 0 {
            self.notifier.post(self.tag, false);
        }
    }
}

#[derive(Default)]
struct MethodQueue {
    waiters: VecDeque<Box<dyn Waiter>>,
    incoming: VecDeque<IncomingCall>,
}

fn reject_mismatch(call: IncomingCall) {
    tracing::error!("accepted call does not match the handler's message types");
    call.cancel.cancel(Status::internal("message type mismatch"));
}

// ============================================================================
//  NETWORK
// ============================================================================

type Servers = DashMap<String, MemServer>;

/// Registry of in-memory servers, keyed by listen address.
#[derive(Clone, Default)]
pub struct MemNetwork {
    servers: Arc<Servers>,
    bound: Arc<Notify>,
}

impl MemNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts listening on `addr` for calls to `methods`.
    pub fn bind(&self, addr: &str, methods: &[&'static str]) -> transport::Result<MemServer> {
        if addr.trim().is_empty() {
            return Err(transport::Error::InvalidAddr(addr.to_string()));
        }

        let server = MemServer {
            inner: Arc::new(ServerInner {
                addr: addr.to_string(),
                methods: methods.iter().map(|name| (*name, Mutex::new(MethodQueue::default()))).collect(),
                live: Mutex::new(Vec::new()),
                shutdown: AtomicBool::new(false),
                network: Arc::downgrade(&self.servers),
            }),
        };

        match self.servers.entry(addr.to_string()) {
            Entry::Occupied(_) => return Err(transport::Error::AddrInUse(addr.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(server.clone());
            }
        }
        self.bound.notify_waiters();
        tracing::debug!(addr, methods = methods.len(), "mem server bound");
        Ok(server)
    }

    /// Returns a binder for `ServerBuilder::build` that wraps the bound server with `make`.
    pub fn serve<S, F>(
        &self,
        methods: &'static [&'static str],
        make: F,
    ) -> impl FnOnce(&str) -> transport::Result<(S, Box<dyn Listener>)> + use<S, F>
    where
        F: FnOnce(MemServer) -> S,
    {
        let network = self.clone();
        move |addr: &str| {
            let server = network.bind(addr, methods)?;
            let listener: Box<dyn Listener> = Box::new(server.clone());
            Ok((make(server), listener))
        }
    }

    /// A client channel targeting `addr`. The server does not need to exist yet.
    pub fn channel(&self, addr: &str) -> MemChannel {
        MemChannel {
            network: self.clone(),
            target: addr.to_string(),
        }
    }

    fn lookup(&self, addr: &str) -> Option<MemServer> {
        self.servers.get(addr).map(|entry| entry.value().clone())
    }
}

// ============================================================================
//  SERVER SIDE
// ============================================================================

struct ServerInner {
    addr: String,
    methods: HashMap<&'static str, Mutex<MethodQueue>>,
    live: Mutex<Vec<Weak<dyn Cancel>>>,
    shutdown: AtomicBool,
    network: Weak<Servers>,
}

/// The listening end of one address.
#[derive(Clone)]
pub struct MemServer {
    inner: Arc<ServerInner>,
}

impl MemServer {
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    pub fn accept_unary<Req, Resp>(
        &self,
        method: &'static str,
        notifier: &Notifier,
        tag: Tag,
    ) -> Box<dyn ServerUnary<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.accept(method, notifier, tag))
    }

    pub fn accept_server_streaming<Req, Resp>(
        &self,
        method: &'static str,
        notifier: &Notifier,
        tag: Tag,
    ) -> Box<dyn ServerWriter<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.accept(method, notifier, tag))
    }

    pub fn accept_client_streaming<Req, Resp>(
        &self,
        method: &'static str,
        notifier: &Notifier,
        tag: Tag,
    ) -> Box<dyn ServerReader<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.accept(method, notifier, tag))
    }

    pub fn accept_bidi_streaming<Req, Resp>(
        &self,
        method: &'static str,
        notifier: &Notifier,
        tag: Tag,
    ) -> Box<dyn ServerReaderWriter<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.accept(method, notifier, tag))
    }

    /// Asks for the next call of `method`; `tag` completes once one is handed over.
    fn accept<Req, Resp>(&self, method: &'static str, notifier: &Notifier, tag: Tag) -> ServerCall<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let cell = Arc::new(Mutex::new(None));
        let call = ServerCall {
            cell: Arc::clone(&cell),
            notifier: notifier.clone(),
            finished: false,
        };

        let Some(queue) = self.inner.methods.get(method) else {
            tracing::warn!(method, "accept for a method this service does not declare");
            notifier.post(tag, false);
            return call;
        };

        let mut waiter: Box<dyn Waiter> = Box::new(TypedWaiter {
            cell: Arc::downgrade(&cell),
            notifier: notifier.clone(),
            tag,
        });

        let mut queue = lock(queue);
        if self.is_shutdown() {
            waiter.reject();
            return call;
        }
        while let Some(incoming) = queue.incoming.pop_front() {
            match waiter.offer(incoming) {
                Offer::Taken => return call,
                Offer::Vacant(incoming) => {
                    queue.incoming.push_front(incoming);
                    return call;
                }
                Offer::Mismatch(rejected, incoming) => {
                    reject_mismatch(incoming);
                    waiter = rejected;
                }
            }
        }
        queue.waiters.push_back(waiter);
        call
    }

    /// Routes a new client call to a parked accept, or queues it.
    fn open<Req, Resp>(&self, method: &'static str, request: Option<Req>) -> SharedPipe<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        let Some(queue) = self.inner.methods.get(method) else {
            return Pipe::failed(Status::unimplemented(format!("unknown method {}", method)));
        };

        let pipe: SharedPipe<Req, Resp> = Arc::new(Mutex::new(Pipe::new(request)));
        let cancel: Arc<dyn Cancel> = pipe.clone();

        let mut queue = lock(queue);
        if self.is_shutdown() {
            return Pipe::failed(Status::unavailable(format!("{} is shutting down", self.inner.addr)));
        }
        self.track(&cancel);

        let mut incoming = IncomingCall {
            pipe: Box::new(Arc::clone(&pipe)),
            cancel,
        };
        while let Some(waiter) = queue.waiters.pop_front() {
            match waiter.offer(incoming) {
                Offer::Taken => return pipe,
                Offer::Vacant(call) => incoming = call,
                Offer::Mismatch(waiter, call) => {
                    queue.waiters.push_front(waiter);
                    reject_mismatch(call);
                    return pipe;
                }
            }
        }
        queue.incoming.push_back(incoming);
        pipe
    }

    fn track(&self, call: &Arc<dyn Cancel>) {
        let mut live = lock(&self.inner.live);
        live.retain(|weak| weak.strong_count() > 0);
        live.push(Arc::downgrade(call));
    }
}

impl Listener for MemServer {
    fn local_addr(&self) -> &str {
        &self.inner.addr
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }

        if let Some(servers) = self.inner.network.upgrade() {
            servers.remove_if(&self.inner.addr, |_, server| Arc::ptr_eq(&server.inner, &self.inner));
        }

        for queue in self.inner.methods.values() {
            let mut queue = lock(queue);
            for waiter in queue.waiters.drain(..) {
                waiter.reject();
            }
            for incoming in queue.incoming.drain(..) {
                incoming.cancel.cancel(Status::unavailable("server shut down before accepting the call"));
            }
        }

        let live: Vec<_> = lock(&self.inner.live).drain(..).collect();
        for call in live.iter().filter_map(Weak::upgrade) {
            call.cancel(Status::cancelled("server shut down"));
        }
        tracing::debug!(addr = %self.inner.addr, "mem server shut down");
    }
}

/// Server half of one call, created before the call arrives.
struct ServerCall<Req, Resp> {
    cell: Arc<Mutex<Option<SharedPipe<Req, Resp>>>>,
    notifier: Notifier,
    finished: bool,
}

impl<Req, Resp> ServerCall<Req, Resp> {
    fn pipe(&self) -> Option<SharedPipe<Req, Resp>> {
        lock(&self.cell).clone()
    }

    fn read_request(&mut self, tag: Tag) {
        match self.pipe() {
            Some(pipe) => lock(&pipe).requests.read(&self.notifier, tag),
            None => self.not_accepted(tag),
        }
    }

    fn take_message(&mut self) -> Option<Req> {
        self.pipe().and_then(|pipe| lock(&pipe).requests.delivered.take())
    }

    fn take_request(&mut self) -> Option<Req> {
        self.pipe().and_then(|pipe| lock(&pipe).request.take())
    }

    /// The server only settles a call by finishing it, so a status seen while still
    /// reading was put there by the client or by listener shutdown.
    fn is_cancelled(&self) -> bool {
        self.pipe().is_none_or(|pipe| lock(&pipe).status.is_some())
    }

    fn write_response(&mut self, message: Resp, tag: Tag) {
        match self.pipe() {
            Some(pipe) => {
                let ok = lock(&pipe).responses.push(message);
                self.notifier.post(tag, ok);
            }
            None => self.not_accepted(tag),
        }
    }

    fn complete(&mut self, response: Option<Resp>, status: Status, tag: Tag) {
        self.finished = true;
        match self.pipe() {
            Some(pipe) => {
                let ok = lock(&pipe).complete(response, status);
                self.notifier.post(tag, ok);
            }
            None => self.not_accepted(tag),
        }
    }

    fn not_accepted(&self, tag: Tag) {
        tracing::error!(%tag, "step armed on a call that was never accepted");
        self.notifier.post(tag, false);
    }
}

impl<Req, Resp> Drop for ServerCall<Req, Resp> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Some(pipe) = lock(&self.cell).take() {
            let mut pipe = lock(&pipe);
            if pipe.status.is_none() {
                pipe.settle(Status::internal("call dropped before it finished"));
            }
        }
    }
}

impl<Req: Send, Resp: Send> ServerUnary<Req, Resp> for ServerCall<Req, Resp> {
    fn take_request(&mut self) -> Option<Req> {
        ServerCall::take_request(self)
    }

    fn finish(&mut self, response: Option<Resp>, status: Status, tag: Tag) {
        self.complete(response, status, tag);
    }
}

impl<Req: Send, Resp: Send> ServerWriter<Req, Resp> for ServerCall<Req, Resp> {
    fn take_request(&mut self) -> Option<Req> {
        ServerCall::take_request(self)
    }

    fn write(&mut self, message: Resp, tag: Tag) {
        self.write_response(message, tag);
    }

    fn finish(&mut self, status: Status, tag: Tag) {
        self.complete(None, status, tag);
    }
}

impl<Req: Send, Resp: Send> ServerReader<Req, Resp> for ServerCall<Req, Resp> {
    fn read(&mut self, tag: Tag) {
        self.read_request(tag);
    }

    fn take_message(&mut self) -> Option<Req> {
        ServerCall::take_message(self)
    }

    fn is_cancelled(&self) -> bool {
        ServerCall::is_cancelled(self)
    }

    fn finish(&mut self, response: Option<Resp>, status: Status, tag: Tag) {
        self.complete(response, status, tag);
    }
}

impl<Req: Send, Resp: Send> ServerReaderWriter<Req, Resp> for ServerCall<Req, Resp> {
    fn read(&mut self, tag: Tag) {
        self.read_request(tag);
    }

    fn take_message(&mut self) -> Option<Req> {
        ServerCall::take_message(self)
    }

    fn is_cancelled(&self) -> bool {
        ServerCall::is_cancelled(self)
    }

    fn write(&mut self, message: Resp, tag: Tag) {
        self.write_response(message, tag);
    }

    fn finish(&mut self, status: Status, tag: Tag) {
        self.complete(None, status, tag);
    }
}

// ============================================================================
//  CLIENT SIDE
// ============================================================================

/// A client's view of one target address.
#[derive(Clone)]
pub struct MemChannel {
    network: MemNetwork,
    target: String,
}

impl MemChannel {
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn unary<Req, Resp>(&self, method: &'static str, request: Req, notifier: &Notifier) -> Box<dyn ClientUnary<Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.call::<Req, Resp>(method, Some(request), notifier))
    }

    pub fn server_streaming<Req, Resp>(
        &self,
        method: &'static str,
        request: Req,
        notifier: &Notifier,
    ) -> Box<dyn ClientReader<Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.call::<Req, Resp>(method, Some(request), notifier))
    }

    pub fn client_streaming<Req, Resp>(&self, method: &'static str, notifier: &Notifier) -> Box<dyn ClientWriter<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.call::<Req, Resp>(method, None, notifier))
    }

    pub fn bidi_streaming<Req, Resp>(
        &self,
        method: &'static str,
        notifier: &Notifier,
    ) -> Box<dyn ClientReaderWriter<Req, Resp>>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        Box::new(self.call::<Req, Resp>(method, None, notifier))
    }

    fn call<Req, Resp>(&self, method: &'static str, request: Option<Req>, notifier: &Notifier) -> ClientCall<Req, Resp> {
        ClientCall {
            channel: self.clone(),
            method,
            notifier: notifier.clone(),
            request,
            pipe: None,
        }
    }

    fn open<Req, Resp>(&self, method: &'static str, request: Option<Req>) -> SharedPipe<Req, Resp>
    where
        Req: Send + 'static,
        Resp: Send + 'static,
    {
        match self.network.lookup(&self.target) {
            Some(server) => server.open(method, request),
            None => Pipe::failed(Status::unavailable(format!("nothing listening at {}", self.target))),
        }
    }
}

#[async_trait::async_trait]
impl Channel for MemChannel {
    fn is_connected(&self) -> bool {
        self.network.lookup(&self.target).is_some_and(|server| !server.is_shutdown())
    }

    async fn wait_for_connected(&self, timeout: Duration) -> bool {
        let wait = async {
            loop {
                let bound = self.network.bound.notified();
                if self.is_connected() {
                    return;
                }
                bound.await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

/// Client half of one call. The call reaches the server on `start_call`.
struct ClientCall<Req, Resp> {
    channel: MemChannel,
    method: &'static str,
    notifier: Notifier,
    request: Option<Req>,
    pipe: Option<SharedPipe<Req, Resp>>,
}

impl<Req, Resp> ClientCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn connect(&mut self) -> SharedPipe<Req, Resp> {
        if let Some(pipe) = &self.pipe {
            return Arc::clone(pipe);
        }
        let pipe = self.channel.open(self.method, self.request.take());
        self.pipe = Some(Arc::clone(&pipe));
        pipe
    }

    fn start_stream(&mut self, tag: Tag) {
        let pipe = self.connect();
        let ok = lock(&pipe).status.is_none();
        self.notifier.post(tag, ok);
    }

    fn write_request(&mut self, message: Req, tag: Tag) {
        let pipe = self.connect();
        let ok = lock(&pipe).requests.push(message);
        self.notifier.post(tag, ok);
    }

    fn close_requests(&mut self, tag: Tag) {
        let pipe = self.connect();
        let mut pipe = lock(&pipe);
        let ok = pipe.status.is_none();
        pipe.requests.close();
        self.notifier.post(tag, ok);
    }

    fn read_response(&mut self, tag: Tag) {
        let pipe = self.connect();
        lock(&pipe).responses.read(&self.notifier, tag);
    }

    fn take_response(&mut self) -> Option<Resp> {
        let pipe = self.connect();
        lock(&pipe).responses.delivered.take()
    }

    fn await_status(&mut self, tag: Tag) {
        let pipe = self.connect();
        lock(&pipe).await_status(&self.notifier, tag);
    }

    fn status(&mut self) -> Status {
        let pipe = self.connect();
        let pipe = lock(&pipe);
        pipe.status.clone().unwrap_or_else(|| Status::internal("status taken before the call finished"))
    }

    fn outcome(&mut self) -> Result<Resp, Status> {
        let pipe = self.connect();
        let mut pipe = lock(&pipe);
        match pipe.status.clone() {
            Some(status) if status.is_ok() => pipe
                .response
                .take()
                .ok_or_else(|| Status::internal("server finished without a response")),
            Some(status) => Err(status),
            None => Err(Status::internal("outcome taken before the call finished")),
        }
    }
}

impl<Req, Resp> Drop for ClientCall<Req, Resp> {
    fn drop(&mut self) {
        if let Some(pipe) = self.pipe.take() {
            let mut pipe = lock(&pipe);
            if pipe.status.is_none() {
                pipe.settle(Status::cancelled("client dropped the call"));
            }
        }
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> ClientUnary<Resp> for ClientCall<Req, Resp> {
    fn start_call(&mut self) {
        self.connect();
    }

    fn finish(&mut self, tag: Tag) {
        self.await_status(tag);
    }

    fn take_outcome(&mut self) -> Result<Resp, Status> {
        self.outcome()
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> ClientReader<Resp> for ClientCall<Req, Resp> {
    fn start_call(&mut self, tag: Tag) {
        self.start_stream(tag);
    }

    fn read(&mut self, tag: Tag) {
        self.read_response(tag);
    }

    fn take_message(&mut self) -> Option<Resp> {
        self.take_response()
    }

    fn finish(&mut self, tag: Tag) {
        self.await_status(tag);
    }

    fn take_status(&mut self) -> Status {
        self.status()
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> ClientWriter<Req, Resp> for ClientCall<Req, Resp> {
    fn start_call(&mut self, tag: Tag) {
        self.start_stream(tag);
    }

    fn write(&mut self, message: Req, tag: Tag) {
        self.write_request(message, tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.close_requests(tag);
    }

    fn finish(&mut self, tag: Tag) {
        self.await_status(tag);
    }

    fn take_outcome(&mut self) -> Result<Resp, Status> {
        self.outcome()
    }
}

impl<Req: Send + 'static, Resp: Send + 'static> ClientReaderWriter<Req, Resp> for ClientCall<Req, Resp> {
    fn start_call(&mut self, tag: Tag) {
        self.start_stream(tag);
    }

    fn write(&mut self, message: Req, tag: Tag) {
        self.write_request(message, tag);
    }

    fn writes_done(&mut self, tag: Tag) {
        self.close_requests(tag);
    }

    fn read(&mut self, tag: Tag) {
        self.read_response(tag);
    }

    fn take_message(&mut self) -> Option<Resp> {
        self.take_response()
    }

    fn finish(&mut self, tag: Tag) {
        self.await_status(tag);
    }

    fn take_status(&mut self) -> Status {
        self.status()
    }
}
