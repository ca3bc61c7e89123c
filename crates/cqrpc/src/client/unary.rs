use crate::client::OnError;
use crate::client::OnResponse;
use crate::queue::Tag;
use crate::registry::CallState;
use crate::registry::Kind;
use crate::registry::Step;
use crate::status::Status;
use crate::transport::ClientUnary;

/// Client side of a unary call. Expects exactly one completion: the finish step.
pub(super) struct UnaryCall<Resp> {
    tag: Tag,
    rpc: Box<dyn ClientUnary<Resp>>,
    on_response: OnResponse<Resp>,
    on_error: OnError,
}

impl<Resp> UnaryCall<Resp>
where
    Resp: Send + 'static,
{
    pub(super) fn start(
        tag: Tag,
        mut rpc: Box<dyn ClientUnary<Resp>>,
        on_response: OnResponse<Resp>,
        on_error: OnError,
    ) -> Box<dyn CallState> {
        rpc.start_call();
        rpc.finish(tag);
        Box::new(Self { tag, rpc, on_response, on_error })
    }
}

impl<Resp> CallState for UnaryCall<Resp>
where
    Resp: Send + 'static,
{
    fn kind(&self) -> Kind {
        Kind::Unary
    }

    fn advance(mut self: Box<Self>, ok: bool) -> Step {
        if !ok {
            tracing::error!(tag = %self.tag, "unary finish step failed in the transport");
            (self.on_error)(Status::internal("transport failed to complete the call"));
            return Step::Done;
        }

        match self.rpc.take_outcome() {
            Ok(response) => (self.on_response)(response),
            Err(status) => {
                tracing::debug!(tag = %self.tag, %status, "unary call finished with an error");
                (self.on_error)(status)
            }
        }
        Step::Done
    }
}
