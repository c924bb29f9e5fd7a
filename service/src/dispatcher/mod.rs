mod dispatcher;
pub use dispatcher::{Dispatcher, HandlerOutcome};

mod handler_context;
pub use handler_context::HandlerContext;

mod responder;
pub(crate) use responder::DeferredReply;
pub use responder::Responder;
pub(crate) use dispatcher::error_reply;
