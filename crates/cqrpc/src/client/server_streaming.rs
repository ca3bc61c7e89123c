use crate::client::OnError;
use crate::client::OnResponse;
use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::status::Status;
use crate::transport::ClientReader;

/// How responses reach the caller.
pub(super) enum Delivery<Resp> {
    /// Accumulate every response, hand the full sequence over once the stream is done.
    Batch {
        responses: Vec<Resp>,
        on_response: OnResponse<Vec<Resp>>,
    },
    /// Hand each response over as soon as it is read.
    Push(Box<dyn FnMut(Resp) + Send>),
}

impl<Resp> Delivery<Resp> {
    fn accept(&mut self, response: Resp) {
        match self {
            Self::Batch { responses, .. } => responses.push(response),
            Self::Push(on_message) => on_message(response),
        }
    }
}

#[derive(Clone, Copy)]
enum Phase {
    Starting,
    Reading,
    Finishing,
}

/// Client side of a server-streaming call.
///
/// ```text
/// Starting --ok--> Reading --ok--> Reading
///    |                |
///    +------!ok-------+--!ok--> Finishing --> done
/// ```
pub(super) struct ServerStreamingCall<Resp> {
    tag: Tag,
    rpc: Box<dyn ClientReader<Resp>>,
    phase: Phase,
    delivery: Delivery<Resp>,
    on_error: OnError,
}

impl<Resp> ServerStreamingCall<Resp>
where
    Resp: Send + 'static,
{
    pub(super) fn start(
        tag: Tag,
        mut rpc: Box<dyn ClientReader<Resp>>,
        delivery: Delivery<Resp>,
        on_error: OnError,
    ) -> Box<dyn CallState> {
        rpc.start_call(tag);
        Box::new(Self {
            tag,
            rpc,
            phase: Phase::Starting,
            delivery,
            on_error,
        })
    }

    fn finish(mut self: Box<Self>) -> Step {
        self.rpc.finish(self.tag);
        self.phase = Phase::Finishing;
        Step::Pending(self)
    }

    fn deliver(mut self: Box<Self>, ok: bool) -> Step {
        let status = if ok {
            self.rpc.take_status()
        } else {
            tracing::error!(tag = %self.tag, "finish step failed in the transport");
            Status::internal("transport failed to report the final status")
        };

        if !status.is_ok() {
            tracing::debug!(tag = %self.tag, %status, "response stream ended with an error");
            (self.on_error)(status);
            return Step::Done;
        }

        if let Delivery::Batch { responses, on_response } = self.delivery {
            on_response(responses);
        }
        Step::Done
    }
}

impl<Resp> CallState for ServerStreamingCall<Resp>
where
    Resp: Send + 'static,
{
    fn kind(&self) -> Kind {
        Kind::ServerStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Starting if ok => {
                self.rpc.read(self.tag);
                self.phase = Phase::Reading;
                Step::Pending(self)
            }
            Phase::Reading if ok => {
                match self.rpc.take_message() {
                    Some(response) => self.delivery.accept(response),
                    None => tracing::warn!(tag = %self.tag, "read completed without a message"),
                }
                self.rpc.read(self.tag);
                Step::Pending(self)
            }
            Phase::Starting | Phase::Reading => self.finish(),
            Phase::Finishing => self.deliver(ok),
        }
    }
}
