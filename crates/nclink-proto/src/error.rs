use nclink_codec::CodecError;

/// Errors from burst construction and message header handling.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    /// The burst already holds its maximum number of commands.
    #[error("burst full ({max} commands)")]
    BurstFull { max: usize },

    /// The arena cannot hold the next header or parameter.
    #[error("burst arena exhausted (need {need} bytes, {have} free)")]
    ArenaExhausted { need: usize, have: usize },

    /// A command is being built; the previous one was not committed.
    #[error("command already in progress")]
    CommandInProgress,

    /// No command is being built.
    #[error("no command in progress")]
    NoCommand,

    /// The burst was already sealed for transmission.
    #[error("burst already sealed")]
    Sealed,

    /// The command index does not exist in this burst.
    #[error("no command at index {0}")]
    BadCommandIndex(usize),

    /// A status was applied to a command that already completed.
    #[error("command {0} already has a status")]
    AlreadyComplete(usize),

    /// A command argument is outside the range the device accepts.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The message is too short or carries an unknown kind byte.
    #[error("malformed message header: {0}")]
    BadHeader(&'static str),

    /// A TLV parameter failed to encode or decode.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

pub type Result<T> = std::result::Result<T, ProtoError>;
