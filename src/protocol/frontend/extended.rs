//! Extended query protocol messages.

use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};
use crate::statement::BoundParam;

/// Write a Parse message.
///
/// - `name`: statement name (empty string for the unnamed statement)
/// - `query`: SQL with `$1`, `$2`, ... placeholders
/// - `param_oids`: parameter wire types, in placeholder order
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_i16(param_oids.len() as i16);
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish();
}

/// Write a Bind message.
///
/// Each parameter carries its own format code; every result column is
/// requested in `result_format`.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &[BoundParam],
    result_format: FormatCode,
) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    msg.write_i16(params.len() as i16);
    for param in params {
        msg.write_i16(param.format() as i16);
    }

    msg.write_i16(params.len() as i16);
    for param in params {
        let value = param.value();
        msg.write_i32(value.len() as i32);
        msg.write_bytes(value);
    }

    // A single format code applies to all result columns
    msg.write_i16(1);
    msg.write_i16(result_format as i16);

    msg.finish();
}

/// Write a Describe message for a portal.
pub fn write_describe_portal(buf: &mut Vec<u8>, name: &str) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'P');
    msg.write_cstr(name);
    msg.finish();
}

/// Write an Execute message (`max_rows` 0 = unlimited).
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish();
}

/// Write a Sync message.
///
/// Ends the extended query sequence; the server answers with ReadyForQuery,
/// also after an error.
pub fn write_sync(buf: &mut Vec<u8>) {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish();
}
