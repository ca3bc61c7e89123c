use crate::client::OnError;
use crate::client::OnResponse;
use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::status::Status;
use crate::transport::ClientReaderWriter;

#[derive(Clone, Copy)]
enum Phase {
    Writing,
    /// Writes-done is in flight; its completion arms the first read.
    ClosingWrites,
    Reading,
    Finishing,
}

/// Client side of a bidirectional-streaming call.
///
/// Writes the whole outbound sequence first, then reads until the server ends its
/// stream, like a server-streaming call.
pub(super) struct BidiCall<Req, Resp> {
    tag: Tag,
    rpc: Box<dyn ClientReaderWriter<Req, Resp>>,
    phase: Phase,
    pending: std::vec::IntoIter<Req>,
    responses: Vec<Resp>,
    on_response: OnResponse<Vec<Resp>>,
    on_error: OnError,
}

impl<Req, Resp> BidiCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    pub(super) fn start(
        tag: Tag,
        mut rpc: Box<dyn ClientReaderWriter<Req, Resp>>,
        requests: Vec<Req>,
        on_response: OnResponse<Vec<Resp>>,
        on_error: OnError,
    ) -> Box<dyn CallState> {
        rpc.start_call(tag);
        Box::new(Self {
            tag,
            rpc,
            phase: Phase::Writing,
            pending: requests.into_iter(),
            responses: Vec::new(),
            on_response,
            on_error,
        })
    }

    fn read_next(mut self: Box<Self>) -> Step {
        self.rpc.read(self.tag);
        self.phase = Phase::Reading;
        Step::Pending(self)
    }

    fn finish(mut self: Box<Self>) -> Step {
        self.rpc.finish(self.tag);
        self.phase = Phase::Finishing;
        Step::Pending(self)
    }
}

impl<Req, Resp> CallState for BidiCall<Req, Resp>
where
    Req: Send + 'static,
    Resp: Send + 'static,
{
    fn kind(&self) -> Kind {
        Kind::BidiStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Writing if ok => {
                match self.pending.next() {
                    Some(request) => self.rpc.write(request, self.tag),
                    None => {
                        self.rpc.writes_done(self.tag);
                        self.phase = Phase::ClosingWrites;
                    }
                }
                Step::Pending(self)
            }
            // Responses may already be waiting even if closing our half failed.
            Phase::ClosingWrites => self.read_next(),
            Phase::Reading if ok => {
                match self.rpc.take_message() {
                    Some(response) => self.responses.push(response),
                    None => tracing::warn!(tag = %self.tag, "read completed without a message"),
                }
                self.read_next()
            }
            Phase::Writing | Phase::Reading => self.finish(),
            Phase::Finishing => {
                let status = if ok {
                    self.rpc.take_status()
                } else {
                    tracing::error!(tag = %self.tag, "finish step failed in the transport");
                    Status::internal("transport failed to report the final status")
                };
                if status.is_ok() {
                    (self.on_response)(self.responses);
                } else {
                    tracing::debug!(tag = %self.tag, %status, "bidi stream ended with an error");
                    (self.on_error)(status);
                }
                Step::Done
            }
        }
    }
}
