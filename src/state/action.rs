//! Action types for state machine I/O requests.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::backend::{NoticeResponse, NotificationResponse, ParameterStatus, msg_type};

/// Action requested by a state machine.
///
/// The caller should perform the requested I/O and then call the
/// state machine's `step()` method again.
#[derive(Debug)]
pub enum Action<'a> {
    /// Write the bytes to the server and flush.
    WritePacket(&'a [u8]),

    /// Read the next PostgreSQL message into the buffer set.
    NeedPacket,

    /// An asynchronous message was received.
    ///
    /// The caller should handle the message, read the next message,
    /// then call `step()` again.
    AsyncMessage(AsyncMessage),

    /// The state machine has finished successfully.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time during query execution.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },
}

impl AsyncMessage {
    /// Parse a message for which `backend::is_async_type` holds.
    pub fn parse(type_byte: u8, payload: &[u8]) -> Result<Self> {
        match type_byte {
            msg_type::NOTICE_RESPONSE => {
                let notice = NoticeResponse::parse(payload)?;
                Ok(AsyncMessage::Notice(notice.0))
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(payload)?;
                Ok(AsyncMessage::ParameterChanged {
                    name: param.name.to_string(),
                    value: param.value.to_string(),
                })
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let notification = NotificationResponse::parse(payload)?;
                Ok(AsyncMessage::Notification {
                    pid: notification.pid,
                    channel: notification.channel.to_string(),
                })
            }
            _ => Err(Error::Protocol(format!(
                "Unknown async message type: '{}'",
                type_byte as char
            ))),
        }
    }
}
