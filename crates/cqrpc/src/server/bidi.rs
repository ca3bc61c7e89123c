use std::sync::Arc;

use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::server::Registration;
use crate::server::Shared;
use crate::status::Status;
use crate::transport::BidiStreamingAccept;
use crate::transport::ServerReaderWriter;

type Binding<S, Req, Resp, H> = Registration<BidiStreamingAccept<S, Req, Resp>, H>;

#[derive(Clone, Copy)]
enum Phase {
    Listening,
    Reading,
    Writing,
    Finishing,
}

/// Serves one bidirectional-streaming call.
///
/// ```text
/// Listening --ok--> [arm successor] Reading --ok--> Reading
///                                      |
///                                     !ok --> handler --> Writing ... --> Finishing --> done
/// ```
pub(super) struct BidiHandler<S, Req, Resp, H> {
    tag: Tag,
    shared: Arc<Shared<S>>,
    binding: Arc<Binding<S, Req, Resp, H>>,
    rpc: Box<dyn ServerReaderWriter<Req, Resp>>,
    phase: Phase,
    requests: Vec<Req>,
    outgoing: std::vec::IntoIter<Resp>,
}

pub(super) fn listen<S, Req, Resp, H>(shared: &Arc<Shared<S>>, binding: &Arc<Binding<S, Req, Resp, H>>) -> bool
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    let notifier = shared.queue.notifier();
    let armed = shared.registry.arm(|tag| {
        let rpc = (binding.entry)(&shared.service, &notifier, tag);
        Box::new(BidiHandler {
            tag,
            shared: Arc::clone(shared),
            binding: Arc::clone(binding),
            rpc,
            phase: Phase::Listening,
            requests: Vec::new(),
            outgoing: Vec::new().into_iter(),
        })
    });
    armed.is_some()
}

impl<S, Req, Resp, H> BidiHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    fn write_next(mut self: Box<Self>) -> Step {
        match self.outgoing.next() {
            Some(response) => {
                self.rpc.write(response, self.tag);
                self.phase = Phase::Writing;
                Step::Pending(self)
            }
            None => self.finish(Status::ok()),
        }
    }

    fn finish(mut self: Box<Self>, status: Status) -> Step {
        self.rpc.finish(status, self.tag);
        self.phase = Phase::Finishing;
        Step::Pending(self)
    }
}

impl<S, Req, Resp, H> CallState for BidiHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    fn kind(&self) -> Kind {
        Kind::BidiStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Listening if !ok => {
                tracing::debug!(tag = %self.tag, "bidi accept cancelled");
                Step::Done
            }
            Phase::Listening => {
                listen(&self.shared, &self.binding);
                self.rpc.read(self.tag);
                self.phase = Phase::Reading;
                Step::Pending(self)
            }
            Phase::Reading if ok => {
                match self.rpc.take_message() {
                    Some(request) => self.requests.push(request),
                    None => tracing::warn!(tag = %self.tag, "read completed without a message"),
                }
                self.rpc.read(self.tag);
                Step::Pending(self)
            }
            Phase::Reading if self.rpc.is_cancelled() => {
                tracing::debug!(tag = %self.tag, read = self.requests.len(), "call cancelled mid-stream, handler skipped");
                self.finish(Status::cancelled("call cancelled before the request stream ended"))
            }
            Phase::Reading => {
                let outcome = (self.binding.handler)(&self.requests);
                match outcome {
                    Ok(responses) => {
                        self.outgoing = responses.into_iter();
                        self.write_next()
                    }
                    Err(status) => self.finish(status),
                }
            }
            Phase::Writing if ok => self.write_next(),
            Phase::Writing => {
                tracing::debug!(tag = %self.tag, remaining = self.outgoing.len(), "client stopped reading");
                self.finish(Status::cancelled("client stopped reading"))
            }
            Phase::Finishing => Step::Done,
        }
    }
}
