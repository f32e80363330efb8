//! Read buffer shared by the state machines of one connection.

/// Last message read from the server.
pub struct BufferSet {
    /// Payload of the last message, without type byte and length
    pub read_buffer: Vec<u8>,
    /// Type byte of the last message read
    pub type_byte: u8,
}

impl BufferSet {
    pub fn new() -> Self {
        Self {
            read_buffer: Vec::with_capacity(8192),
            type_byte: 0,
        }
    }

    /// Replace the current message, as a transport would after a read.
    pub fn load(&mut self, type_byte: u8, payload: &[u8]) {
        self.type_byte = type_byte;
        self.read_buffer.clear();
        self.read_buffer.extend_from_slice(payload);
    }
}

impl Default for BufferSet {
    fn default() -> Self {
        Self::new()
    }
}
