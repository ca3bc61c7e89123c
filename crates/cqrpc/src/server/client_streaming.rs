use std::sync::Arc;

use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::server::Registration;
use crate::server::Shared;
use crate::status::Status;
use crate::transport::ClientStreamingAccept;
use crate::transport::ServerReader;

type Binding<S, Req, Resp, H> = Registration<ClientStreamingAccept<S, Req, Resp>, H>;

#[derive(Clone, Copy)]
enum Phase {
    Listening,
    Reading,
    Finishing,
}

/// Serves one client-streaming call. The handler sees the whole request sequence once
/// the client has signalled writes-done.
pub(super) struct ClientStreamingHandler<S, Req, Resp, H> {
    tag: Tag,
    shared: Arc<Shared<S>>,
    binding: Arc<Binding<S, Req, Resp, H>>,
    rpc: Box<dyn ServerReader<Req, Resp>>,
    phase: Phase,
    requests: Vec<Req>,
}

pub(super) fn listen<S, Req, Resp, H>(shared: &Arc<Shared<S>>, binding: &Arc<Binding<S, Req, Resp, H>>) -> bool
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> Result<Resp, Status> + Send + Sync + 'static,
{
    let notifier = shared.queue.notifier();
    let armed = shared.registry.arm(|tag| {
        let rpc = (binding.entry)(&shared.service, &notifier, tag);
        Box::new(ClientStreamingHandler {
            tag,
            shared: Arc::clone(shared),
            binding: Arc::clone(binding),
            rpc,
            phase: Phase::Listening,
            requests: Vec::new(),
        })
    });
    armed.is_some()
}

impl<S, Req, Resp, H> CallState for ClientStreamingHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&[Req]) -> Result<Resp, Status> + Send + Sync + 'static,
{
    fn kind(&self) -> Kind {
        Kind::ClientStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Listening if !ok => {
                tracing::debug!(tag = %self.tag, "client-streaming accept cancelled");
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
                self.rpc.finish(None, Status::cancelled("call cancelled before the request stream ended"), self.tag);
                self.phase = Phase::Finishing;
                Step::Pending(self)
            }
            Phase::Reading => {
                tracing::trace!(tag = %self.tag, count = self.requests.len(), "request stream complete");
                let (response, status) = match (self.binding.handler)(&self.requests) {
                    Ok(response) => (Some(response), Status::ok()),
                    Err(status) => (None, status),
                };
                self.rpc.finish(response, status, self.tag);
                self.phase = Phase::Finishing;
                Step::Pending(self)
            }
            Phase::Finishing => Step::Done,
        }
    }
}
