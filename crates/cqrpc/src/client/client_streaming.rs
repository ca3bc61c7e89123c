use crate::client::OnError;
use crate::client::OnResponse;
use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::status::Status;
use crate::transport::ClientWriter;

#[derive(Clone, Copy)]
enum Phase {
    /// Each completion (start, then every write) sends the next pending request.
    Writing,
    /// Writes-done is in flight.
    AwaitingFinish,
    Finishing,
}

/// Client side of a client-streaming call.
pub(super) struct ClientStreamingCall<Req, Resp> {
    tag: Tag,
    rpc: Box<dyn ClientWriter<Req, Resp>>,
    phase: Phase,
    /// Write cursor over the outbound sequence. Only ever moves forward.
    pending: std::vec::IntoIter<Req>,
    on_response: OnResponse<Resp>,
    on_error: OnError,
}

impl<Req, Resp> ClientStreamingCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(super) fn start(
        tag: Tag,
        mut rpc: Box<dyn ClientWriter<Req, Resp>>,
        requests: Vec<Req>,
        on_response: OnResponse<Resp>,
        on_error: OnError,
    ) -> Box<dyn CallState> {
        rpc.start_call(tag);
        Box::new(Self {
            tag,
            rpc,
            phase: Phase::Writing,
            pending: requests.into_iter(),
            on_response,
            on_error,
        })
    }
}

impl<Req, Resp> CallState for ClientStreamingCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn kind(&self) -> Kind {
        Kind::ClientStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Writing if ok => {
                match self.pending.next() {
                    Some(request) => self.rpc.write(request, self.tag),
                    None => {
                        self.rpc.writes_done(self.tag);
                        self.phase = Phase::AwaitingFinish;
                    }
                }
                Step::Pending(self)
            }
            Phase::Writing | Phase::AwaitingFinish => {
                if !ok {
                    tracing::debug!(tag = %self.tag, "request stream closed early, collecting status");
                }
                self.rpc.finish(self.tag);
                self.phase = Phase::Finishing;
                Step::Pending(self)
            }
            Phase::Finishing => {
                let outcome = if ok {
                    self.rpc.take_outcome()
                } else {
                    tracing::error!(tag = %self.tag, "finish step failed in the transport");
                    Err(Status::internal("transport failed to report the final status"))
                };
                match outcome {
                    Ok(response) => (self.on_response)(response),
                    Err(status) => (self.on_error)(status),
                }
                Step::Done
            }
        }
    }
}
