use std::sync::Arc;

use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::server::Registration;
use crate::server::Shared;
use crate::status::Status;
use crate::transport::ServerStreamingAccept;
use crate::transport::ServerWriter;

type Binding<S, Req, Resp, H> = Registration<ServerStreamingAccept<S, Req, Resp>, H>;

#[derive(Clone, Copy)]
enum Phase {
    Listening,
    Writing,
    Finishing,
}

/// Serves one server-streaming call: the handler produces every response up front,
/// then they are written one completion at a time.
pub(super) struct ServerStreamingHandler<S, Req, Resp, H> {
    tag: Tag,
    shared: Arc<Shared<S>>,
    binding: Arc<Binding<S, Req, Resp, H>>,
    rpc: Box<dyn ServerWriter<Req, Resp>>,
    phase: Phase,
    outgoing: std::vec::IntoIter<Resp>,
}

pub(super) fn listen<S, Req, Resp, H>(shared: &Arc<Shared<S>>, binding: &Arc<Binding<S, Req, Resp, H>>) -> bool
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    let notifier = shared.queue.notifier();
    let armed = shared.registry.arm(|tag| {
        let rpc = (binding.entry)(&shared.service, &notifier, tag);
        Box::new(ServerStreamingHandler {
            tag,
            shared: Arc::clone(shared),
            binding: Arc::clone(binding),
            rpc,
            phase: Phase::Listening,
            outgoing: Vec::new().into_iter(),
        })
    });
    armed.is_some()
}

impl<S, Req, Resp, H> ServerStreamingHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
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

impl<S, Req, Resp, H> CallState for ServerStreamingHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> Result<Vec<Resp>, Status> + Send + Sync + 'static,
{
    fn kind(&self) -> Kind {
        Kind::ServerStreaming
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Listening if !ok => {
                tracing::debug!(tag = %self.tag, "server-streaming accept cancelled");
                Step::Done
            }
            Phase::Listening => {
                listen(&self.shared, &self.binding);

                let Some(request) = self.rpc.take_request() else {
                    tracing::error!(tag = %self.tag, "accepted server-streaming call carried no request");
                    return self.finish(Status::internal("request missing"));
                };
                let outcome = (self.binding.handler)(&request);
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
