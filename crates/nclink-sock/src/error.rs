use nclink_dev::DevError;
use nclink_proto::ProtoError;

/// Errors surfaced by the socket layer.
///
/// Non-blocking conditions are errors here, not states: an empty receive
/// buffer is `WouldBlock`, a connect in flight is `InProgress`, a DNS
/// query still outstanding is `DnsPending`. Callers retry after the next
/// poll.
#[derive(Debug, thiserror::Error)]
pub enum SockError {
    /// No data or space available right now.
    #[error("operation would block")]
    WouldBlock,

    /// The connection attempt was issued and completes via an event.
    #[error("connection in progress")]
    InProgress,

    /// Datagram larger than the family payload limit.
    #[error("message too long")]
    MessageSize,

    #[error("socket is not connected")]
    NotConnected,

    /// A datagram send needs a destination and none is set.
    #[error("destination address required")]
    DestinationRequired,

    /// The handle does not refer to an in-use socket.
    #[error("bad socket handle")]
    BadHandle,

    /// The device has not yet assigned the socket an id.
    #[error("socket not yet open")]
    NotOpen,

    #[error("no free sockets")]
    NoFreeSockets,

    /// Slab arena could not satisfy a buffer allocation.
    #[error("no buffer space available")]
    NoBufferSpace,

    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// The DNS query is still outstanding; poll and retry.
    #[error("name resolution in progress")]
    DnsPending,

    #[error("name resolution failed")]
    DnsFailed,

    #[error("invalid host name")]
    DnsName,

    #[error(transparent)]
    Dev(#[from] DevError),

    #[error(transparent)]
    Proto(#[from] ProtoError),
}

pub type Result<T> = std::result::Result<T, SockError>;
