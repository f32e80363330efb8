//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::Opts;
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ErrorResponse, ReadyForQuery, is_async_type, msg_type,
};
use crate::protocol::frontend::auth::{SCRAM_SHA_256, ScramClient, md5_password};
use crate::protocol::frontend::{
    write_password, write_sasl_initial_response, write_sasl_response, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::action::{Action, AsyncMessage};

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// What a handler wants next; turned into an [`Action`] by `step`.
enum Next {
    Write,
    Read,
    Done,
}

/// Connection startup state machine.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    user: String,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
    write_buffer: Vec<u8>,
}

/// User name for the startup packet; an empty option means the OS user.
fn resolve_user(options: &Opts) -> Result<String> {
    if !options.user.is_empty() {
        return Ok(options.user.clone());
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("LOGNAME"))
        .map_err(|_| Error::InvalidUsage("user is empty and no OS user is known".into()))
}

impl ConnectionStateMachine {
    /// Create a new connection state machine.
    pub fn new(options: Opts) -> Result<Self> {
        let user = resolve_user(&options)?;
        Ok(Self {
            state: ConnectionState::Initial,
            options,
            user,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
            write_buffer: Vec::new(),
        })
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Get the backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Start the connection process.
    ///
    /// Returns the startup packet to write.
    pub fn start(&mut self) -> Action<'_> {
        self.write_buffer.clear();
        self.write_startup_message();
        self.state = ConnectionState::WaitingAuth;
        Action::WritePacket(&self.write_buffer)
    }

    /// Process a message from the server.
    ///
    /// The caller should fill buffer_set.read_buffer with the message payload
    /// and set buffer_set.type_byte to the message type.
    pub fn step(&mut self, buffer_set: &BufferSet) -> Result<Action<'_>> {
        let type_byte = buffer_set.type_byte;
        let payload = buffer_set.read_buffer.as_slice();

        // ParameterStatus is routine during startup; it is recorded and passed on.
        if is_async_type(type_byte) {
            let msg = AsyncMessage::parse(type_byte, payload)?;
            if let AsyncMessage::ParameterChanged { name, value } = &msg {
                match self.server_params.iter_mut().find(|(n, _)| n == name) {
                    Some(entry) => entry.1 = value.clone(),
                    None => self.server_params.push((name.clone(), value.clone())),
                }
            }
            return Ok(Action::AsyncMessage(msg));
        }

        if type_byte == msg_type::ERROR_RESPONSE {
            let error = ErrorResponse::parse(payload)?;
            self.state = ConnectionState::Failed;
            return Err(error.into_error());
        }

        let next = match self.state {
            ConnectionState::WaitingAuth => self.handle_auth_message(type_byte, payload),
            ConnectionState::SaslInProgress => self.handle_sasl_message(type_byte, payload),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(type_byte, payload),
            ConnectionState::WaitingReady => self.handle_ready_message(type_byte, payload),
            _ => Err(Error::Protocol(format!(
                "Unexpected message in state {:?}",
                self.state
            ))),
        };

        match next {
            Ok(Next::Write) => Ok(Action::WritePacket(&self.write_buffer)),
            Ok(Next::Read) => Ok(Action::NeedPacket),
            Ok(Next::Done) => Ok(Action::Finished),
            Err(e) => {
                self.state = ConnectionState::Failed;
                Err(e)
            }
        }
    }

    fn write_startup_message(&mut self) {
        let mut params: Vec<(&str, &str)> =
            vec![("user", &self.user), ("client_encoding", "UTF8")];

        if let Some(ref db) = self.options.database {
            params.push(("database", db));
        }

        if let Some(ref app) = self.options.application_name {
            params.push(("application_name", app));
        }

        for (name, value) in &self.options.params {
            params.push((name, value));
        }

        write_startup(&mut self.write_buffer, &params);
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn expect_auth(type_byte: u8) -> Result<()> {
        if type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                type_byte as char
            )));
        }
        Ok(())
    }

    fn handle_auth_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Next> {
        Self::expect_auth(type_byte)?;

        match AuthenticationMessage::parse(payload)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Next::Read)
            }
            AuthenticationMessage::CleartextPassword => {
                let password = self.password()?.to_string();
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &password);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Next::Write)
            }
            AuthenticationMessage::Md5Password { salt } => {
                let hashed = md5_password(&self.user, self.password()?, &salt);
                self.write_buffer.clear();
                write_password(&mut self.write_buffer, &hashed);
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Next::Write)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {:?}",
                        mechanisms
                    )));
                }

                let scram = ScramClient::new(self.password()?);
                self.write_buffer.clear();
                write_sasl_initial_response(
                    &mut self.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                );

                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                Ok(Next::Write)
            }
            other => Err(Error::Unsupported(format!(
                "Unsupported authentication method: {:?}",
                other
            ))),
        }
    }

    fn handle_sasl_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Next> {
        Self::expect_auth(type_byte)?;

        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;

        match AuthenticationMessage::parse(payload)? {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {}", e)))?;

                let client_final = scram
                    .process_server_first(server_first)
                    .map_err(Error::Auth)?;

                self.write_buffer.clear();
                write_sasl_response(&mut self.write_buffer, client_final.as_bytes());
                Ok(Next::Write)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {}", e)))?;

                scram
                    .verify_server_final(server_final)
                    .map_err(Error::Auth)?;

                self.state = ConnectionState::WaitingAuthResult;
                Ok(Next::Read)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected SASL message: {:?}",
                other
            ))),
        }
    }

    fn handle_auth_result(&mut self, type_byte: u8, payload: &[u8]) -> Result<Next> {
        Self::expect_auth(type_byte)?;

        match AuthenticationMessage::parse(payload)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Next::Read)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {:?}", other))),
        }
    }

    fn handle_ready_message(&mut self, type_byte: u8, payload: &[u8]) -> Result<Next> {
        match type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some(*key);
                Ok(Next::Read)
            }
            msg_type::READY_FOR_QUERY => {
                let ready = ReadyForQuery::parse(payload)?;
                self.transaction_status = ready.transaction_status();
                self.state = ConnectionState::Ready;
                Ok(Next::Done)
            }
            msg_type::NEGOTIATE_PROTOCOL_VERSION => {
                tracing::debug!("server negotiated protocol version down, staying on 3.0");
                Ok(Next::Read)
            }
            _ => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                type_byte as char
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(password: Option<&str>) -> ConnectionStateMachine {
        let opts = Opts {
            user: "defiance".into(),
            database: Some("defiance".into()),
            password: password.map(Into::into),
            ..Opts::default()
        };
        ConnectionStateMachine::new(opts).unwrap()
    }

    fn feed(sm: &mut ConnectionStateMachine, type_byte: u8, payload: &[u8]) -> Result<Vec<u8>> {
        let mut buffers = BufferSet::new();
        buffers.load(type_byte, payload);
        Ok(match sm.step(&buffers)? {
            Action::WritePacket(data) => data.to_vec(),
            _ => Vec::new(),
        })
    }

    #[test]
    fn test_trust_startup() {
        let mut sm = machine(None);
        match sm.start() {
            Action::WritePacket(data) => {
                assert!(data.windows(9).any(|w| w == b"defiance\0"));
            }
            other => panic!("unexpected {:?}", other),
        }

        feed(&mut sm, b'R', &[0, 0, 0, 0]).unwrap();
        feed(&mut sm, b'S', b"server_version\x0016.4\0").unwrap();
        feed(&mut sm, b'K', &[0, 0, 0, 42, 0, 0, 0, 7]).unwrap();
        let mut buffers = BufferSet::new();
        buffers.load(b'Z', b"I");
        assert!(matches!(sm.step(&buffers).unwrap(), Action::Finished));

        assert_eq!(sm.state(), ConnectionState::Ready);
        assert_eq!(sm.backend_key().map(|k| k.process_id()), Some(42));
        assert_eq!(
            sm.server_params(),
            &[("server_version".to_string(), "16.4".to_string())]
        );
    }

    #[test]
    fn test_md5_requires_password() {
        let mut sm = machine(None);
        let _ = sm.start();
        let err = feed(&mut sm, b'R', &[0, 0, 0, 5, 1, 2, 3, 4]).unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
        assert_eq!(sm.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_md5_response() {
        let mut sm = machine(Some("secret"));
        let _ = sm.start();
        let packet = feed(&mut sm, b'R', &[0, 0, 0, 5, 1, 2, 3, 4]).unwrap();
        assert_eq!(packet[0], b'p');
        assert!(packet[5..].starts_with(b"md5"));
        assert_eq!(sm.state(), ConnectionState::WaitingAuthResult);
    }

    #[test]
    fn test_startup_error() {
        let mut sm = machine(None);
        let _ = sm.start();
        let err = feed(
            &mut sm,
            b'E',
            b"SFATAL\0VFATAL\0C3D000\0Mdatabase \"defiance\" does not exist\0\0",
        )
        .unwrap_err();
        assert_eq!(err.sqlstate(), Some("3D000"));
        assert!(err.is_connection_broken());
    }

    #[test]
    fn test_unsupported_auth() {
        let mut sm = machine(None);
        let _ = sm.start();
        let err = feed(&mut sm, b'R', &[0, 0, 0, 7]).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }
}
