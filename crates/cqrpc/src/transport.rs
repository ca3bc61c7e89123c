//! # Transport Boundary
//!
//! The interfaces this crate consumes from a transport and from generated service code.
//!
//! ## Philosophy
//!
//! - **Arm, then Collect**: Every asynchronous primitive takes a `Tag` and returns
//!   immediately. Completion is reported later through the `Notifier` the call object
//!   was created with. Data produced by a step (a read message, a final status) is kept
//!   by the call object until the state machine takes it after the completion event.
//! - **Typed Entry Points**: Generated code exposes one plain function per method.
//!   The function's shape (request in, stream out, ...) decides the interaction pattern.
//! - **No Framing Here**: Serialization, connection management and security live in the
//!   transport implementation, never in this crate.

use std::fmt;
use std::time::Duration;

use crate::queue::Notifier;
use crate::queue::Tag;
use crate::status::Status;

/// Errors raised synchronously by a transport while setting up a server or channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Another listener already owns the address.
    AddrInUse(String),
    /// The address could not be parsed or is not served by this transport.
    InvalidAddr(String),
    /// The transport was shut down.
    Closed,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddrInUse(addr) => write!(f, "Address already in use: {}", addr),
            Self::InvalidAddr(addr) => write!(f, "Invalid address: {}", addr),
            Self::Closed => write!(f, "Transport closed"),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

// ============================================================================
//  CLIENT SIDE CALL OBJECTS
// ============================================================================

/// Client half of a unary call.
pub trait ClientUnary<Resp>: Send {
    /// Sends the request. Does not complete through the queue.
    fn start_call(&mut self);
    /// Arms the single step that completes once the response and status are in.
    fn finish(&mut self, tag: Tag);
    /// After `finish` completed: the response when the status is ok, the status otherwise.
    fn take_outcome(&mut self) -> std::result::Result<Resp, Status>;
}

/// Client half of a server-streaming call.
pub trait ClientReader<Resp>: Send {
    fn start_call(&mut self, tag: Tag);
    /// Completes `ok` with one message available, or `!ok` once the stream has ended.
    fn read(&mut self, tag: Tag);
    /// The message delivered by the last successful `read`.
    fn take_message(&mut self) -> Option<Resp>;
    fn finish(&mut self, tag: Tag);
    /// After `finish` completed: the final status sent by the server.
    fn take_status(&mut self) -> Status;
}

/// Client half of a client-streaming call.
pub trait ClientWriter<Req, Resp>: Send {
    fn start_call(&mut self, tag: Tag);
    /// Completes `!ok` when the stream is already closed on the server side.
    fn write(&mut self, message: Req, tag: Tag);
    fn writes_done(&mut self, tag: Tag);
    fn finish(&mut self, tag: Tag);
    fn take_outcome(&mut self) -> std::result::Result<Resp, Status>;
}

/// Client half of a bidirectional-streaming call.
pub trait ClientReaderWriter<Req, Resp>: Send {
    fn start_call(&mut self, tag: Tag);
    fn write(&mut self, message: Req, tag: Tag);
    fn writes_done(&mut self, tag: Tag);
    fn read(&mut self, tag: Tag);
    fn take_message(&mut self) -> Option<Resp>;
    fn finish(&mut self, tag: Tag);
    fn take_status(&mut self) -> Status;
}

// ============================================================================
//  SERVER SIDE CALL OBJECTS
// ============================================================================

/// Server half of a unary call, armed before a call has arrived.
pub trait ServerUnary<Req, Resp>: Send {
    /// The request of the accepted call. `None` before the accept step completed.
    fn take_request(&mut self) -> Option<Req>;
    /// Sends the response (omitted for a non-ok status) and the final status.
    fn finish(&mut self, response: Option<Resp>, status: Status, tag: Tag);
}

/// Server half of a server-streaming call.
pub trait ServerWriter<Req, Resp>: Send {
    fn take_request(&mut self) -> Option<Req>;
    /// Completes `!ok` when the client is gone.
    fn write(&mut self, message: Resp, tag: Tag);
    fn finish(&mut self, status: Status, tag: Tag);
}

/// Server half of a client-streaming call.
pub trait ServerReader<Req, Resp>: Send {
    /// Completes `!ok` once the client signalled writes-done, or once the call was cancelled.
    fn read(&mut self, tag: Tag);
    fn take_message(&mut self) -> Option<Req>;
    /// True when the call ended before the client signalled writes-done.
    fn is_cancelled(&self) -> bool;
    fn finish(&mut self, response: Option<Resp>, status: Status, tag: Tag);
}

/// Server half of a bidirectional-streaming call.
pub trait ServerReaderWriter<Req, Resp>: Send {
    fn read(&mut self, tag: Tag);
    fn take_message(&mut self) -> Option<Req>;
    fn is_cancelled(&self) -> bool;
    fn write(&mut self, message: Resp, tag: Tag);
    fn finish(&mut self, status: Status, tag: Tag);
}

// ============================================================================
//  GENERATED ENTRY POINTS
// ============================================================================

/// Starts a unary call on a stub.
pub type UnaryStart<S, Req, Resp> = fn(&S, Req, &Notifier) -> Box<dyn ClientUnary<Resp>>;
/// Prepares a server-streaming call on a stub. The request is sent by `start_call`.
pub type ServerStreamingStart<S, Req, Resp> = fn(&S, Req, &Notifier) -> Box<dyn ClientReader<Resp>>;
/// Prepares a client-streaming call on a stub.
pub type ClientStreamingStart<S, Req, Resp> = fn(&S, &Notifier) -> Box<dyn ClientWriter<Req, Resp>>;
/// Prepares a bidirectional-streaming call on a stub.
pub type BidiStreamingStart<S, Req, Resp> = fn(&S, &Notifier) -> Box<dyn ClientReaderWriter<Req, Resp>>;

/// Asks a service to accept the next unary call; completes `tag` when one arrives.
pub type UnaryAccept<S, Req, Resp> = fn(&S, &Notifier, Tag) -> Box<dyn ServerUnary<Req, Resp>>;
pub type ServerStreamingAccept<S, Req, Resp> = fn(&S, &Notifier, Tag) -> Box<dyn ServerWriter<Req, Resp>>;
pub type ClientStreamingAccept<S, Req, Resp> = fn(&S, &Notifier, Tag) -> Box<dyn ServerReader<Req, Resp>>;
pub type BidiStreamingAccept<S, Req, Resp> = fn(&S, &Notifier, Tag) -> Box<dyn ServerReaderWriter<Req, Resp>>;

// ============================================================================
//  CONNECTIONS AND LISTENERS
// ============================================================================

/// Connectivity of a client-side channel.
#[async_trait::async_trait]
pub trait Channel: Send + Sync {
    /// Whether a server is listening at the channel's target right now.
    fn is_connected(&self) -> bool;

    /// Waits until the target is reachable or `timeout` elapses.
    async fn wait_for_connected(&self, timeout: Duration) -> bool;
}

/// A generated client stub that exposes the channel it calls through.
pub trait Stub: Send + Sync + 'static {
    fn channel(&self) -> &dyn Channel;
}

/// The listening side of a server transport.
pub trait Listener: Send + Sync {
    fn local_addr(&self) -> &str;

    /// Stops accepting calls.
    ///
    /// Pending accepts must complete with `ok == false` and live calls must be
    /// cancelled, so every armed step still produces a completion.
    fn shutdown(&self);
}

/// Binds a listen address and produces the generated service object.
pub trait Bind<S> {
    fn bind(self, addr: &str) -> Result<(S, Box<dyn Listener>)>;
}

impl<S, F> Bind<S> for F
where
    F: FnOnce(&str) -> Result<(S, Box<dyn Listener>)>,
{
    fn bind(self, addr: &str) -> Result<(S, Box<dyn Listener>)> {
        self(addr)
    }
}
