/// Errors from the bus transport.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// The SPI port failed to move bytes.
    #[error("spi transfer failed: {0}")]
    Spi(String),

    /// A command drew an unexpected R1/R5 response.
    #[error("CMD{cmd} failed (response {response:#04x})")]
    CmdFailed { cmd: u8, response: u8 },

    /// A block write drew a data-response token other than "accepted".
    #[error("data rejected (token {token:#04x})")]
    DataRejected { token: u8 },

    /// A block read produced a token other than the start-block marker.
    #[error("bad start token {token:#04x}")]
    BadToken { token: u8 },

    /// The device never raised data-ready / never released busy.
    #[error("device busy timeout")]
    Timeout,

    /// Card abort at the start of initialisation failed.
    #[error("card abort failed")]
    AbortFailed,

    /// The reset command never brought the card to idle.
    #[error("card reset failed")]
    ResetFailed,

    /// The operating-condition exchange failed.
    #[error("operating condition negotiation failed")]
    OpFailed,

    /// Register configuration or its read-back verification failed.
    #[error("device configuration failed")]
    ConfigFailed,

    /// The bus is not in the running state.
    #[error("bus not initialised")]
    NotReady,
}

pub type Result<T> = std::result::Result<T, BusError>;
