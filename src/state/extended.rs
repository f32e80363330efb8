//! Extended query protocol state machine for one parameterized statement.
//!
//! A cycle is `Parse + Bind + Describe(portal) + Execute + Sync` on the
//! unnamed statement and portal. The server answers with ReadyForQuery even
//! after an ErrorResponse, so an error is held until then: the connection is
//! back in sync when the caller sees it. FATAL and PANIC are the exception:
//! the backend closes the socket instead, so they are returned at once.

use crate::buffer_set::BufferSet;
use crate::error::{Error, ErrorFields, Result};
use crate::handler::ResultHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ErrorResponse, ReadyForQuery, RowDescription, is_async_type,
    msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_describe_portal, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, TransactionStatus};
use crate::statement::BoundParam;

use super::action::{Action, AsyncMessage};

/// Extended query state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingParse,
    WaitingBind,
    WaitingRowDesc,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Extended query protocol state machine.
pub struct ExtendedQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    write_buffer: Vec<u8>,
    column_buffer: Vec<u8>,
    transaction_status: TransactionStatus,
    error: Option<ErrorFields>,
}

impl<'a, H: ResultHandler> ExtendedQueryStateMachine<'a, H> {
    /// Create a new extended query state machine.
    pub fn new(handler: &'a mut H) -> Self {
        Self {
            state: State::Initial,
            handler,
            write_buffer: Vec::new(),
            column_buffer: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            error: None,
        }
    }

    /// Get the transaction status from the final ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Send `sql` with its bound parameters, asking for binary results.
    pub fn start(&mut self, sql: &str, params: &[BoundParam]) -> Action<'_> {
        let param_oids: Vec<_> = params.iter().map(BoundParam::oid).collect();

        self.write_buffer.clear();
        write_parse(&mut self.write_buffer, "", sql, &param_oids);
        write_bind(&mut self.write_buffer, "", "", params, FormatCode::Binary);
        write_describe_portal(&mut self.write_buffer, "");
        write_execute(&mut self.write_buffer, "", 0);
        write_sync(&mut self.write_buffer);

        self.state = State::WaitingParse;
        Action::WritePacket(&self.write_buffer)
    }

    /// Process a message from the server.
    pub fn step(&mut self, buffer_set: &BufferSet) -> Result<Action<'_>> {
        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();

        if is_async_type(type_byte) {
            return Ok(Action::AsyncMessage(AsyncMessage::parse(type_byte, payload)?));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(payload)?;
            if error.0.is_fatal() {
                self.state = State::Finished;
                return Err(Error::Server(error.0));
            }
            // The rest of the cycle is skipped up to ReadyForQuery
            self.error = Some(error.0);
            self.state = State::WaitingReady;
            return Ok(Action::NeedPacket);
        }

        match self.state {
            State::WaitingParse => {
                self.expect(type_byte, msg_type::PARSE_COMPLETE, State::WaitingBind)
            }
            State::WaitingBind => {
                self.expect(type_byte, msg_type::BIND_COMPLETE, State::WaitingRowDesc)
            }
            State::WaitingRowDesc => self.handle_row_desc(type_byte, payload),
            State::ProcessingRows => self.handle_rows(type_byte, payload),
            State::WaitingReady => self.handle_ready(type_byte, payload),
            _ => Err(Error::Protocol(format!(
                "Unexpected message '{}' in state {:?}",
                type_byte as char, self.state
            ))),
        }
    }

    fn expect(&mut self, type_byte: u8, expected: u8, next: State) -> Result<Action<'_>> {
        if type_byte != expected {
            return Err(Error::Protocol(format!(
                "Expected '{}', got '{}'",
                expected as char, type_byte as char
            )));
        }
        self.state = next;
        Ok(Action::NeedPacket)
    }

    fn handle_row_desc(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action<'_>> {
        match type_byte {
            msg_type::ROW_DESCRIPTION => {
                self.column_buffer.clear();
                self.column_buffer.extend_from_slice(payload);
                let cols = RowDescription::parse(&self.column_buffer)?;
                self.handler.result_start(cols)?;
                self.state = State::ProcessingRows;
                Ok(Action::NeedPacket)
            }
            msg_type::NO_DATA => {
                self.column_buffer.clear();
                self.state = State::ProcessingRows;
                Ok(Action::NeedPacket)
            }
            _ => Err(Error::Protocol(format!(
                "Expected RowDescription or NoData, got '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_rows(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action<'_>> {
        match type_byte {
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&self.column_buffer)?;
                let row = DataRow::parse(payload)?;
                self.handler.row(&cols, row)?;
                Ok(Action::NeedPacket)
            }
            msg_type::COMMAND_COMPLETE => {
                let complete = CommandComplete::parse(payload)?;
                self.handler.result_end(complete)?;
                self.state = State::WaitingReady;
                Ok(Action::NeedPacket)
            }
            msg_type::EMPTY_QUERY_RESPONSE => {
                self.state = State::WaitingReady;
                Ok(Action::NeedPacket)
            }
            msg_type::PORTAL_SUSPENDED => Err(Error::Protocol(
                "Portal suspended on an unlimited Execute".into(),
            )),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in row processing: '{}'",
                type_byte as char
            ))),
        }
    }

    fn handle_ready(&mut self, type_byte: u8, payload: &[u8]) -> Result<Action<'_>> {
        if type_byte != msg_type::READY_FOR_QUERY {
            // Messages between an error and ReadyForQuery are discarded
            if self.error.is_some() {
                return Ok(Action::NeedPacket);
            }
            return Err(Error::Protocol(format!(
                "Expected ReadyForQuery, got '{}'",
                type_byte as char
            )));
        }

        let ready = ReadyForQuery::parse(payload)?;
        self.transaction_status = ready.transaction_status();
        self.state = State::Finished;

        match self.error.take() {
            Some(fields) => Err(Error::Server(fields)),
            None => Ok(Action::Finished),
        }
    }
}
