//! Socket lifecycle state as named flags.

/// How the device delivers received data for a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Host polls for data explicitly.
    Polled,
    /// Device pushes data without acknowledgement.
    AsyncSimple,
    /// Device announces data, host requests it and acknowledges.
    #[default]
    AsyncAck,
}

impl ReadMode {
    pub fn wire(self) -> u32 {
        match self {
            ReadMode::Polled => 1,
            ReadMode::AsyncSimple => 2,
            ReadMode::AsyncAck => 3,
        }
    }
}

/// Lifecycle flags for one socket slot.
///
/// `in_use` gates everything; the rest describe the slot's progress
/// through open, listen/connect and teardown. `new_recv_data` is a
/// latch set when a read response lands and cleared when the next read
/// request is issued.
#[derive(Debug, Clone, Copy, Default)]
pub struct SocketState {
    in_use: bool,
    listening: bool,
    connected: bool,
    accepted: bool,
    new_recv_data: bool,
}

impl SocketState {
    pub fn opening() -> Self {
        SocketState {
            in_use: true,
            ..SocketState::default()
        }
    }

    /// A server-side child created by an incoming connection indication.
    pub fn accepted_child() -> Self {
        SocketState {
            in_use: true,
            connected: true,
            ..SocketState::default()
        }
    }

    pub fn is_in_use(&self) -> bool {
        self.in_use
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted
    }

    pub fn has_new_recv_data(&self) -> bool {
        self.new_recv_data
    }

    pub fn set_listening(&mut self) {
        debug_assert!(self.in_use);
        self.listening = true;
    }

    pub fn set_connected(&mut self, connected: bool) {
        debug_assert!(self.in_use);
        self.connected = connected;
    }

    pub fn mark_accepted(&mut self) {
        debug_assert!(self.in_use && !self.listening);
        self.accepted = true;
    }

    pub fn set_new_recv_data(&mut self, latched: bool) {
        self.new_recv_data = latched;
    }

    pub fn close(&mut self) {
        *self = SocketState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepted_child_is_connected() {
        let s = SocketState::accepted_child();
        assert!(s.is_in_use() && s.is_connected());
        assert!(!s.is_accepted() && !s.is_listening());
    }

    #[test]
    fn test_close_clears_all_flags() {
        let mut s = SocketState::opening();
        s.set_listening();
        s.set_new_recv_data(true);
        s.close();
        assert!(!s.is_in_use() && !s.is_listening() && !s.has_new_recv_data());
    }
}
