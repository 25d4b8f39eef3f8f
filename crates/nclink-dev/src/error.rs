use nclink_bus::BusError;
use nclink_proto::ProtoError;

/// Errors from the device engine.
#[derive(Debug, thiserror::Error)]
pub enum DevError {
    #[error(transparent)]
    Bus(#[from] BusError),

    #[error(transparent)]
    Proto(#[from] ProtoError),

    /// A bus fault was latched; the engine refuses further work until
    /// [`crate::Device::reset`].
    #[error("bus fault latched")]
    Faulted,

    /// The device posted an event word the engine does not understand.
    #[error("unknown event word {0:#010x}")]
    BadEvent(u32),

    /// The fixed event-listener table has no free slot.
    #[error("event listener table full")]
    ListenerTableFull,
}

pub type Result<T> = std::result::Result<T, DevError>;
