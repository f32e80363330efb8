//! Error types for pgquery.

use thiserror::Error;

use crate::protocol::types::Oid;

/// Result type for pgquery operations.
pub type Result<T> = core::result::Result<T, Error>;

/// SQLSTATE reported for a unique-constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// FATAL and PANIC mean the backend is going away.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity(), Some("FATAL") | Some("PANIC"))
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}:  ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL:  {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT:  {}", hint)?;
        }
        Ok(())
    }
}

/// Why a query template failed to compile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    /// `%` followed by a character that is not a directive
    #[error("unknown variable type %{0}")]
    UnknownDirective(char),

    /// `%` as the last character of the template
    #[error("variable at the end of the line")]
    DanglingDirective,

    /// More bound parameters than a statement can carry
    #[error("too many variable arguments (max {max})")]
    TooManyParams { max: usize },

    /// Rewritten statement would not fit the statement buffer
    #[error("statement does not fit in {capacity} bytes")]
    StatementTooLong { capacity: usize },

    /// A directive has no argument left to consume
    #[error("no argument for %{directive}")]
    MissingArgument { directive: char },

    /// A directive was given an argument of another kind
    #[error("%{directive} given a {got} argument")]
    ArgumentMismatch { directive: char, got: &'static str },

    /// A string argument contains a NUL byte, which the wire protocol
    /// cannot carry in text
    #[error("%{directive} argument contains a NUL byte")]
    NulInArgument { directive: char },

    /// Arguments left over after the template was consumed
    #[error("{count} unused argument(s)")]
    UnusedArguments { count: usize },
}

/// Why a typed accessor could not produce a value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// No column with this name in the result
    #[error("{0} field missing, check the SQL")]
    FieldMissing(String),

    /// Column exists but its wire type does not fit the accessor
    #[error("column {column} is not {expected} (type oid {oid})")]
    WrongType {
        column: usize,
        expected: &'static str,
        oid: Oid,
    },

    /// Value is NULL
    #[error("NULL at row {row}, column {column}")]
    Null { row: usize, column: usize },

    /// Row or column index outside the result
    #[error("no value at row {row}, column {column}")]
    OutOfRange { row: usize, column: usize },

    /// Payload does not match the declared wire type
    #[error("malformed value: {0}")]
    Malformed(String),
}

/// Error type for pgquery.
#[derive(Debug, Error)]
pub enum Error {
    /// Server error response
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Connection is broken and cannot be reused
    #[error("Connection is broken")]
    ConnectionBroken,

    /// Invalid usage or configuration
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// Unsupported feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Query template could not be compiled
    #[error("{caller}: {kind} in SQL query: {template}")]
    Compile {
        caller: String,
        template: String,
        kind: CompileErrorKind,
    },

    /// Connection could not be established within the retry policy
    #[error("Connection failed after {attempts} attempt(s): {source}")]
    Connect {
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// Typed accessor failure
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken => true,
            Error::Server(fields) => fields.is_fatal(),
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Returns true for a unique-constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        self.sqlstate() == Some(UNIQUE_VIOLATION)
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}
