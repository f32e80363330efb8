//! Typed query templates and retrying execution for PostgreSQL.
//!
//! # Features
//!
//! - **Query templates**: `%`-directives compile to `$N` placeholders with
//!   binary int4/int8 and text inet/cidr parameters
//! - **Managed sessions**: connect on demand, reconnect once on a broken
//!   link, bounded or unbounded connect retry with backoff
//! - **Checked results**: row accessors verify the column's wire type
//! - **Sans-I/O state machines**: protocol logic is separated from I/O
//!
//! # Example
//!
//! ```no_run
//! use pgquery::{Arg, DbConn, Opts, QueryResult, ReplyCode};
//!
//! fn main() -> pgquery::Result<()> {
//!     let db = DbConn::new(Opts::from_names(Some("defiance"), Some("defiance")));
//!
//!     let mut res = QueryResult::new();
//!     let reply = db.query(
//!         &mut res,
//!         "node_state",
//!         "SELECT state FROM nodes WHERE id = %u",
//!         &[Arg::u32(7)],
//!     )?;
//!     if reply == ReplyCode::Ok {
//!         if let Some(rows) = res.rows() {
//!             for row in 0..rows.num_rows() {
//!                 println!("{}", rows.field_enum("node_state", row, "state")?);
//!             }
//!         }
//!     }
//!     res.finish();
//!     Ok(())
//! }
//! ```

pub mod buffer_set;
pub mod error;
pub mod handle;
pub mod handler;
pub mod lifecycle;
pub mod opts;
pub mod protocol;
pub mod result;
pub mod session;
pub mod state;
pub mod statement;
pub mod sync;
pub mod template;

pub use buffer_set::BufferSet;
pub use error::{CompileErrorKind, DecodeError, Error, ErrorFields, Result};
pub use handle::{DbConn, OpenResultViolation, QueryResult, ReplyCode};
pub use handler::{DropHandler, ResultHandler};
pub use lifecycle::{Backoff, RunToken};
pub use opts::Opts;
pub use protocol::types::{FormatCode, Oid, TransactionStatus};
pub use result::{Column, ResultSet};
pub use session::{Connector, NoticeHandler, PgConnector, Session};
pub use statement::{BoundParam, Statement, StatementBuffer};
pub use template::{Arg, compile};
