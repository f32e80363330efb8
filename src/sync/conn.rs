//! Synchronous PostgreSQL connection.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::TransactionStatus;
use crate::result::ResultSet;
use crate::session::{NoticeHandler, Session};
use crate::state::action::{Action, AsyncMessage};
use crate::state::connection::ConnectionStateMachine;
use crate::state::extended::ExtendedQueryStateMachine;
use crate::statement::BoundParam;

use super::stream::Stream;

/// Read a message from the stream into the buffer set.
fn read_message_into(stream: &mut Stream, buffer_set: &mut BufferSet) -> Result<()> {
    let mut type_byte = [0u8; 1];
    stream.read_exact(&mut type_byte)?;
    buffer_set.type_byte = type_byte[0];

    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes)?;
    let length = u32::from_be_bytes(length_bytes);

    if length < 4 {
        return Err(Error::Protocol(format!(
            "Invalid message length: {}",
            length
        )));
    }

    let payload_len = (length - 4) as usize;
    buffer_set.read_buffer.clear();
    buffer_set.read_buffer.resize(payload_len, 0);
    stream.read_exact(&mut buffer_set.read_buffer)?;

    Ok(())
}

/// Deliver an asynchronous message outside of the state machines.
fn dispatch_async(
    msg: AsyncMessage,
    notices: &mut NoticeHandler,
    server_params: &mut Vec<(String, String)>,
) {
    match msg {
        AsyncMessage::Notice(fields) => notices(&fields),
        AsyncMessage::ParameterChanged { name, value } => {
            match server_params.iter_mut().find(|(n, _)| *n == name) {
                Some(entry) => entry.1 = value,
                None => server_params.push((name, value)),
            }
        }
        AsyncMessage::Notification { pid, channel } => {
            tracing::debug!(pid, channel = %channel, "ignoring notification");
        }
    }
}

/// Synchronous PostgreSQL connection.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    write_buffer: Vec<u8>,
    notices: NoticeHandler,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    is_broken: bool,
}

impl Conn {
    /// Connect to the server `opts` describes and authenticate.
    pub fn new(opts: &Opts, notices: NoticeHandler) -> Result<Self> {
        let stream = Stream::connect(opts)?;
        Self::new_with_stream(stream, opts, notices)
    }

    /// Run startup and authentication over an existing stream.
    pub fn new_with_stream(
        mut stream: Stream,
        options: &Opts,
        mut notices: NoticeHandler,
    ) -> Result<Self> {
        let mut buffer_set = BufferSet::new();
        let mut server_params = Vec::new();
        let mut state_machine = ConnectionStateMachine::new(options.clone())?;

        match state_machine.start() {
            Action::WritePacket(data) => {
                stream.write_all(data)?;
                stream.flush()?;
            }
            _ => return Err(Error::Protocol("Unexpected initial action".into())),
        }

        loop {
            read_message_into(&mut stream, &mut buffer_set)?;

            match state_machine.step(&buffer_set)? {
                Action::NeedPacket => {}
                Action::WritePacket(data) => {
                    stream.write_all(data)?;
                    stream.flush()?;
                }
                Action::AsyncMessage(msg) => {
                    dispatch_async(msg, &mut notices, &mut server_params);
                }
                Action::Finished => break,
            }
        }

        if let Some(key) = state_machine.backend_key() {
            tracing::debug!(pid = key.process_id(), "session ready");
        }

        Ok(Self {
            stream,
            buffer_set,
            write_buffer: Vec::with_capacity(64),
            notices,
            server_params,
            transaction_status: state_machine.transaction_status(),
            is_broken: false,
        })
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Run one parameterized statement and collect its rows.
    pub fn exec_params(&mut self, sql: &str, params: &[BoundParam]) -> Result<ResultSet> {
        let result = self.exec_inner(sql, params);
        if let Err(ref e) = result {
            // A server error leaves the stream at ReadyForQuery; anything
            // else may have left it mid-message.
            if e.is_connection_broken() || !matches!(e, Error::Server(_)) {
                self.is_broken = true;
            }
        }
        result
    }

    fn exec_inner(&mut self, sql: &str, params: &[BoundParam]) -> Result<ResultSet> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }

        let mut result = ResultSet::default();
        let mut state_machine = ExtendedQueryStateMachine::new(&mut result);

        match state_machine.start(sql, params) {
            Action::WritePacket(data) => {
                self.stream.write_all(data)?;
                self.stream.flush()?;
            }
            _ => return Err(Error::Protocol("Unexpected execute action".into())),
        }

        loop {
            read_message_into(&mut self.stream, &mut self.buffer_set)?;

            match state_machine.step(&self.buffer_set) {
                Ok(Action::NeedPacket) => {}
                Ok(Action::WritePacket(data)) => {
                    self.stream.write_all(data)?;
                    self.stream.flush()?;
                }
                Ok(Action::AsyncMessage(msg)) => {
                    dispatch_async(msg, &mut self.notices, &mut self.server_params);
                }
                Ok(Action::Finished) => break,
                Err(e) => {
                    self.transaction_status = state_machine.transaction_status();
                    return Err(e);
                }
            }
        }

        self.transaction_status = state_machine.transaction_status();
        Ok(result)
    }
}

impl Session for Conn {
    fn exec_params(&mut self, sql: &str, params: &[BoundParam]) -> Result<ResultSet> {
        Conn::exec_params(self, sql, params)
    }

    fn is_broken(&self) -> bool {
        self.is_broken
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        // Try to send Terminate message, ignore errors
        self.write_buffer.clear();
        write_terminate(&mut self.write_buffer);
        let _ = self.stream.write_all(&self.write_buffer);
        let _ = self.stream.flush();
    }
}
