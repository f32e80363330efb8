//! Compiled statements and their bound parameters.

use crate::protocol::types::{FormatCode, Oid, oid};

/// Default ceiling for the rewritten statement text, in bytes.
pub const DEFAULT_STATEMENT_CAPACITY: usize = 8192;

/// Default ceiling for bound parameters per statement.
pub const DEFAULT_MAX_PARAMS: usize = 16;

/// One positional parameter, already encoded for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    oid: Oid,
    format: FormatCode,
    value: Vec<u8>,
}

impl BoundParam {
    /// 4-byte integer, big-endian binary.
    pub fn int4(value: u32) -> Self {
        Self {
            oid: oid::INT4,
            format: FormatCode::Binary,
            value: value.to_be_bytes().to_vec(),
        }
    }

    /// 8-byte integer, big-endian binary.
    pub fn int8(value: u64) -> Self {
        Self {
            oid: oid::INT8,
            format: FormatCode::Binary,
            value: value.to_be_bytes().to_vec(),
        }
    }

    /// Text-format value the server parses according to `oid`.
    pub fn text(oid: Oid, value: &str) -> Self {
        Self {
            oid,
            format: FormatCode::Text,
            value: value.as_bytes().to_vec(),
        }
    }

    /// Wire type of the parameter.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    pub fn format(&self) -> FormatCode {
        self.format
    }

    /// Encoded bytes; text values carry no terminator, the frame has the length.
    pub fn value(&self) -> &[u8] {
        &self.value
    }
}

/// Statement text with `$N` markers plus the parameters they refer to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Statement {
    sql: String,
    params: Vec<BoundParam>,
}

impl Statement {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[BoundParam] {
        &self.params
    }

    /// Wire types in placeholder order, as sent in Parse.
    pub fn param_oids(&self) -> Vec<Oid> {
        self.params.iter().map(BoundParam::oid).collect()
    }
}

/// Growable scratch buffer a statement is compiled into.
///
/// The buffer never truncates: a push that would cross the capacity or
/// parameter ceiling is refused and leaves the buffer unchanged.
#[derive(Debug, Clone)]
pub struct StatementBuffer {
    stmt: Statement,
    capacity: usize,
    max_params: usize,
}

impl StatementBuffer {
    pub fn new(capacity: usize, max_params: usize) -> Self {
        Self {
            stmt: Statement::default(),
            capacity,
            max_params,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_params(&self) -> usize {
        self.max_params
    }

    /// Append raw statement text. Returns false when it would not fit.
    pub(crate) fn push_str(&mut self, s: &str) -> bool {
        if self.stmt.sql.len() + s.len() > self.capacity {
            return false;
        }
        self.stmt.sql.push_str(s);
        true
    }

    /// Number the parameter `$N` and append the marker.
    ///
    /// Returns false when the marker does not fit; the parameter is then
    /// not recorded either.
    pub(crate) fn push_param(&mut self, param: BoundParam) -> bool {
        let marker = format!("${}", self.stmt.params.len() + 1);
        if !self.push_str(&marker) {
            return false;
        }
        self.stmt.params.push(param);
        true
    }

    pub fn param_count(&self) -> usize {
        self.stmt.params.len()
    }

    pub fn statement(&self) -> &Statement {
        &self.stmt
    }

    /// Hand out the compiled statement, leaving the buffer empty.
    pub fn take(&mut self) -> Statement {
        std::mem::take(&mut self.stmt)
    }

    /// Clear text and parameters for the next cycle, keeping the allocation.
    pub fn reset(&mut self) {
        self.stmt.sql.clear();
        self.stmt.params.clear();
    }
}

impl Default for StatementBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_STATEMENT_CAPACITY, DEFAULT_MAX_PARAMS)
    }
}
