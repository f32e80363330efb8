//! Seams between a database handle and the native connection behind it.

use crate::error::{ErrorFields, Result};
use crate::opts::Opts;
use crate::result::ResultSet;
use crate::statement::BoundParam;
use crate::sync::Conn;

/// Receives every NoticeResponse the server sends on a session.
pub type NoticeHandler = Box<dyn FnMut(&ErrorFields) + Send>;

/// A live connection able to run one parameterized statement at a time.
pub trait Session: Send {
    /// Run `sql` with `params` bound to `$1..$N` and collect the binary result.
    ///
    /// A server-reported failure is `Err(Error::Server(..))` with the
    /// session still usable; transport failures leave it broken.
    fn exec_params(&mut self, sql: &str, params: &[BoundParam]) -> Result<ResultSet>;

    /// Whether an earlier failure left the session unusable.
    fn is_broken(&self) -> bool;
}

/// Opens sessions for a handle.
pub trait Connector: Send {
    fn connect(&mut self, opts: &Opts, notices: NoticeHandler) -> Result<Box<dyn Session>>;
}

/// Connector speaking the PostgreSQL wire protocol over a blocking socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct PgConnector;

impl Connector for PgConnector {
    fn connect(&mut self, opts: &Opts, notices: NoticeHandler) -> Result<Box<dyn Session>> {
        Ok(Box::new(Conn::new(opts, notices)?))
    }
}
