use std::fmt;

/// The small error vocabulary every failure is normalized into before it
/// reaches a Session, a dispatcher or the remote caller.
///
/// Codes are stable on the wire. Values below 100_000 belong to the
/// application and travel as [`ErrorCode::Custom`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Transport-fatal
    PeerDisconnect,
    SocketCantSend,
    SocketCantReceive,
    ConnectFailed,
    ConnectTimeout,
    AcceptTimeout,
    NotFoundChannel,
    Timeout,
    MessageTooLarge,
    // Framing
    MalformedFrame,
    // Session / dispatch
    ChannelClosed,
    Canceled,
    HandlerFailed,
    HandlerPanicked,
    UnknownOpcode,
    ActorNotFound,
    ServiceDisposed,
    /// Application-defined code
    Custom(i32),
}

impl ErrorCode {
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::PeerDisconnect => 100_001,
            ErrorCode::SocketCantSend => 100_002,
            ErrorCode::SocketCantReceive => 100_003,
            ErrorCode::ConnectFailed => 100_004,
            ErrorCode::ConnectTimeout => 100_005,
            ErrorCode::AcceptTimeout => 100_006,
            ErrorCode::NotFoundChannel => 100_007,
            ErrorCode::Timeout => 100_008,
            ErrorCode::MessageTooLarge => 100_009,
            ErrorCode::MalformedFrame => 100_101,
            ErrorCode::ChannelClosed => 200_001,
            ErrorCode::Canceled => 200_002,
            ErrorCode::HandlerFailed => 200_003,
            ErrorCode::HandlerPanicked => 200_004,
            ErrorCode::UnknownOpcode => 200_005,
            ErrorCode::ActorNotFound => 200_006,
            ErrorCode::ServiceDisposed => 200_007,
            ErrorCode::Custom(code) => *code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            100_001 => ErrorCode::PeerDisconnect,
            100_002 => ErrorCode::SocketCantSend,
            100_003 => ErrorCode::SocketCantReceive,
            100_004 => ErrorCode::ConnectFailed,
            100_005 => ErrorCode::ConnectTimeout,
            100_006 => ErrorCode::AcceptTimeout,
            100_007 => ErrorCode::NotFoundChannel,
            100_008 => ErrorCode::Timeout,
            100_009 => ErrorCode::MessageTooLarge,
            100_101 => ErrorCode::MalformedFrame,
            200_001 => ErrorCode::ChannelClosed,
            200_002 => ErrorCode::Canceled,
            200_003 => ErrorCode::HandlerFailed,
            200_004 => ErrorCode::HandlerPanicked,
            200_005 => ErrorCode::UnknownOpcode,
            200_006 => ErrorCode::ActorNotFound,
            200_007 => ErrorCode::ServiceDisposed,
            other => ErrorCode::Custom(other),
        }
    }

    /// Whether this code terminates the Channel that produced it
    pub fn is_transport_fatal(&self) -> bool {
        let code = self.code();
        (100_000..200_000).contains(&code)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::Custom(code) => write!(f, "Custom({})", code),
            other => write!(f, "{:?}({})", other, other.code()),
        }
    }
}
