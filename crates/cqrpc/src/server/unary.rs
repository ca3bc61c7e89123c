use std::sync::Arc;

use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::server::Registration;
use crate::server::Shared;
use crate::status::Status;
use crate::transport::ServerUnary;
use crate::transport::UnaryAccept;

type Binding<S, Req, Resp, H> = Registration<UnaryAccept<S, Req, Resp>, H>;

#[derive(Clone, Copy)]
enum Phase {
    Listening,
    Finishing,
}

/// Serves one unary call.
///
/// ```text
/// Listening --ok--> [arm successor] handler --> Finishing --> done
///     |
///     +--!ok--> done (listener shut down)
/// ```
pub(super) struct UnaryHandler<S, Req, Resp, H> {
    tag: Tag,
    shared: Arc<Shared<S>>,
    binding: Arc<Binding<S, Req, Resp, H>>,
    rpc: Box<dyn ServerUnary<Req, Resp>>,
    phase: Phase,
}

/// Arms a handler waiting for the next call of this method.
pub(super) fn listen<S, Req, Resp, H>(shared: &Arc<Shared<S>>, binding: &Arc<Binding<S, Req, Resp, H>>) -> bool
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> Result<Resp, Status> + Send + Sync + 'static,
{
    let notifier = shared.queue.notifier();
    let armed = shared.registry.arm(|tag| {
        let rpc = (binding.entry)(&shared.service, &notifier, tag);
        Box::new(UnaryHandler {
            tag,
            shared: Arc::clone(shared),
            binding: Arc::clone(binding),
            rpc,
            phase: Phase::Listening,
        })
    });
    armed.is_some()
}

impl<S, Req, Resp, H> CallState for UnaryHandler<S, Req, Resp, H>
where
    S: Send + Sync + 'static,
    Req: Send + 'static,
    Resp: Send + 'static,
    H: Fn(&Req) -> Result<Resp, Status> + Send + Sync + 'static,
{
    fn kind(&self) -> Kind {
        Kind::Unary
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        match self.phase {
            Phase::Listening if !ok => {
                tracing::debug!(tag = %self.tag, "unary accept cancelled");
                Step::Done
            }
            Phase::Listening => {
                listen(&self.shared, &self.binding);

                let (response, status) = match self.rpc.take_request() {
                    Some(request) => match (self.binding.handler)(&request) {
                        Ok(response) => (Some(response), Status::ok()),
                        Err(status) => (None, status),
                    },
                    None => {
                        tracing::error!(tag = %self.tag, "accepted unary call carried no request");
                        (None, Status::internal("request missing"))
                    }
                };
                self.rpc.finish(response, status, self.tag);
                self.phase = Phase::Finishing;
                Step::Pending(self)
            }
            Phase::Finishing => {
                if !ok {
                    tracing::debug!(tag = %self.tag, "client left before the response was sent");
                }
                Step::Done
            }
        }
    }
}
