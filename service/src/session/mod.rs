mod pending;
pub use pending::RelayTarget;

mod response_future;
pub use response_future::ResponseFuture;

mod session;
pub use session::{Incoming, Session};
