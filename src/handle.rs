//! Database handle: one query lifecycle at a time over a managed session.
//!
//! A cycle is `execute` (or `query`) → row access → `finish`. The handle's
//! lock is taken by `execute` and travels inside the [`QueryResult`] until
//! `finish` or drop, on every path. Other threads block on it; the thread
//! that already holds it gets an [`OpenResultViolation`] panic instead of a
//! deadlock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};

use crate::error::{Error, Result};
use crate::lifecycle::{self, Backoff, RunToken};
use crate::opts::Opts;
use crate::result::ResultSet;
use crate::session::{Connector, PgConnector, Session};
use crate::statement::{Statement, StatementBuffer};
use crate::template::{self, Arg};

/// Transmission attempts per statement; the second one follows a reconnect.
const MAX_ATTEMPTS: u32 = 2;

/// Outcome of one executed statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyCode {
    Ok,
    Error,
    /// Unique-constraint violation (SQLSTATE 23505)
    DuplicateKey,
}

/// Panic payload raised when a handle is asked to execute while one of its
/// results is still open.
///
/// This is a caller bug, so it is not returned as an error.
/// Tests can catch it with `catch_unwind` and downcast the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenResultViolation {
    pub caller: String,
    pub reason: &'static str,
}

impl std::fmt::Display for OpenResultViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.caller, self.reason)
    }
}

fn violation(caller: &str, reason: &'static str) -> ! {
    tracing::error!(caller, "{}", reason);
    std::panic::panic_any(OpenResultViolation {
        caller: caller.to_string(),
        reason,
    })
}

struct Inner {
    opts: Opts,
    connector: Box<dyn Connector>,
    backoff: Backoff,
    session: Option<Box<dyn Session>>,
    statement: StatementBuffer,
}

/// A database handle.
///
/// Independent handles share nothing; one handle may be shared by threads,
/// which then take turns one query cycle at a time.
pub struct DbConn {
    inner: Mutex<Inner>,
    holder: Mutex<Option<ThreadId>>,
    token: RunToken,
    suppress_notices: AtomicBool,
    keep_trying: AtomicBool,
}

impl DbConn {
    /// Handle connecting with the wire-protocol client. Nothing is opened
    /// until the first statement runs.
    pub fn new(opts: Opts) -> Self {
        Self::with_token(opts, RunToken::new())
    }

    /// Like [`new`](Self::new), stopping reconnect loops when `token` stops.
    pub fn with_token(opts: Opts, token: RunToken) -> Self {
        Self::with_connector(opts, token, Box::new(PgConnector), Backoff::new())
    }

    /// Handle with its own way of opening sessions and of waiting between
    /// connection attempts.
    pub fn with_connector(
        opts: Opts,
        token: RunToken,
        connector: Box<dyn Connector>,
        backoff: Backoff,
    ) -> Self {
        let statement = StatementBuffer::new(opts.statement_capacity, opts.max_params);
        Self {
            suppress_notices: AtomicBool::new(opts.suppress_notices),
            keep_trying: AtomicBool::new(opts.keep_trying),
            inner: Mutex::new(Inner {
                opts,
                connector,
                backoff,
                session: None,
                statement,
            }),
            holder: Mutex::new(None),
            token,
        }
    }

    pub fn token(&self) -> &RunToken {
        &self.token
    }

    /// Forward `NOTICE:` lines to the log. Takes effect on the next
    /// connection.
    pub fn set_notices(&self, notices: bool) {
        self.suppress_notices.store(!notices, Ordering::Relaxed);
    }

    /// Retry connecting without bound. Returns the previous setting.
    pub fn set_keep_trying(&self, keep_trying: bool) -> bool {
        self.keep_trying.swap(keep_trying, Ordering::Relaxed)
    }

    /// Drop the current session, if any. The next statement reconnects.
    pub fn disconnect(&self) {
        let mut inner = self.lock("disconnect");
        if inner.session.take().is_some() {
            tracing::debug!("disconnected");
        }
        *self.holder_slot() = None;
    }

    pub fn is_connected(&self) -> bool {
        let inner = self.lock("is_connected");
        let connected = inner.session.is_some();
        *self.holder_slot() = None;
        connected
    }

    fn holder_slot(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.holder.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Take the handle lock for the current thread.
    fn lock(&self, caller: &str) -> MutexGuard<'_, Inner> {
        let me = thread::current().id();
        if *self.holder_slot() == Some(me) {
            violation(caller, "handle used while its previous result is still open");
        }

        let guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        *self.holder_slot() = Some(me);
        guard
    }

    fn acquire<'h>(&'h self, res: &QueryResult<'h>, caller: &str) -> OpenResult<'h> {
        if res.is_open() {
            violation(caller, "execute called with an unfinished result");
        }
        OpenResult {
            guard: self.lock(caller),
            holder: &self.holder,
            reply: ReplyCode::Error,
            rows: None,
            failure: None,
        }
    }

    /// Compile `template` with `args` and execute it.
    ///
    /// A compile failure is returned as `Err` with nothing sent and `res`
    /// left closed. Otherwise `res` is open and must be finished.
    pub fn query<'h>(
        &'h self,
        res: &mut QueryResult<'h>,
        caller: &str,
        template: &str,
        args: &[Arg<'_>],
    ) -> Result<ReplyCode> {
        let mut open = self.acquire(res, caller);
        template::compile_into(&mut open.guard.statement, caller, template, args)?;
        let stmt = open.guard.statement.take();
        self.run(&mut open, caller, &stmt);
        let reply = open.reply;
        res.open = Some(open);
        Ok(reply)
    }

    /// Execute a compiled statement, reconnecting first when there is no
    /// session.
    ///
    /// `res` must not hold an unfinished result; it is open afterwards
    /// whatever the reply code, and must be finished.
    pub fn execute<'h>(
        &'h self,
        res: &mut QueryResult<'h>,
        caller: &str,
        stmt: &Statement,
    ) -> ReplyCode {
        let mut open = self.acquire(res, caller);
        self.run(&mut open, caller, stmt);
        let reply = open.reply;
        res.open = Some(open);
        reply
    }

    /// Release what `execute` acquired. A no-op for a closed result.
    pub fn finish(&self, res: &mut QueryResult<'_>) {
        res.finish();
    }

    fn connect(&self, inner: &mut Inner) -> Result<Box<dyn Session>> {
        let opts = Opts {
            suppress_notices: self.suppress_notices.load(Ordering::Relaxed),
            keep_trying: self.keep_trying.load(Ordering::Relaxed),
            ..inner.opts.clone()
        };
        lifecycle::connect(&mut *inner.connector, &opts, &self.token, &mut inner.backoff)
    }

    fn run(&self, open: &mut OpenResult<'_>, caller: &str, stmt: &Statement) {
        let inner = &mut *open.guard;
        let mut last_failure = None;

        for attempt in 1..=MAX_ATTEMPTS {
            let session = match inner.session.take() {
                Some(session) => session,
                None => match self.connect(inner) {
                    Ok(session) => session,
                    Err(e) => {
                        tracing::error!(caller, "no database connection: {}", e);
                        open.failure = Some(e);
                        return;
                    }
                },
            };
            let session = inner.session.insert(session);

            match session.exec_params(stmt.sql(), stmt.params()) {
                Ok(rows) => {
                    tracing::debug!(caller, tag = rows.command_tag(), "statement done");
                    open.reply = ReplyCode::Ok;
                    open.rows = Some(rows);
                    return;
                }
                Err(Error::Server(fields)) if fields.code.is_some() => {
                    if fields.is_fatal() || session.is_broken() {
                        inner.session = None;
                    }
                    let err = Error::Server(fields);
                    if err.is_duplicate_key() {
                        tracing::warn!(caller, statement = stmt.sql(), "{}", err);
                        open.reply = ReplyCode::DuplicateKey;
                    } else if let Error::Server(fields) = &err {
                        tracing::error!(
                            caller,
                            severity = fields.severity(),
                            sqlstate = fields.code.as_deref(),
                            message = fields.message.as_deref(),
                            detail = fields.detail.as_deref(),
                            hint = fields.hint.as_deref(),
                            statement = stmt.sql(),
                            "statement failed"
                        );
                    }
                    open.failure = Some(err);
                    return;
                }
                // No SQLSTATE or no server answer at all: the link is gone
                Err(e) => {
                    tracing::warn!(
                        caller,
                        attempt,
                        "connection lost while executing, reconnecting: {}",
                        e
                    );
                    inner.session = None;
                    last_failure = Some(e);
                }
            }
        }

        tracing::error!(caller, statement = stmt.sql(), "statement failed after reconnecting");
        open.failure = last_failure;
    }
}

impl std::fmt::Debug for DbConn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConn")
            .field("keep_trying", &self.keep_trying)
            .field("suppress_notices", &self.suppress_notices)
            .finish_non_exhaustive()
    }
}

/// What an executed statement holds until it is finished.
struct OpenResult<'h> {
    guard: MutexGuard<'h, Inner>,
    holder: &'h Mutex<Option<ThreadId>>,
    reply: ReplyCode,
    rows: Option<ResultSet>,
    failure: Option<Error>,
}

impl Drop for OpenResult<'_> {
    fn drop(&mut self) {
        self.guard.statement.reset();
        *self.holder.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Result slot filled by [`DbConn::execute`] and released by `finish`.
///
/// While open it holds the handle's lock. Dropping an open result
/// finishes it.
#[derive(Default)]
pub struct QueryResult<'h> {
    open: Option<OpenResult<'h>>,
}

impl<'h> QueryResult<'h> {
    pub fn new() -> Self {
        Self { open: None }
    }

    /// Whether the slot holds an unfinished result.
    pub fn is_open(&self) -> bool {
        self.open.is_some()
    }

    pub fn reply(&self) -> Option<ReplyCode> {
        self.open.as_ref().map(|o| o.reply)
    }

    /// Rows of a successful statement.
    pub fn rows(&self) -> Option<&ResultSet> {
        self.open.as_ref()?.rows.as_ref()
    }

    /// Why the statement did not succeed, with full server diagnostics.
    pub fn failure(&self) -> Option<&Error> {
        self.open.as_ref()?.failure.as_ref()
    }

    pub fn num_rows(&self) -> usize {
        self.rows().map_or(0, ResultSet::num_rows)
    }

    pub fn rows_affected(&self) -> Option<u64> {
        self.rows()?.rows_affected()
    }

    /// Release the result, reset the statement buffer and unlock the handle.
    pub fn finish(&mut self) {
        self.open = None;
    }
}

impl std::fmt::Debug for QueryResult<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryResult")
            .field("reply", &self.reply())
            .field("rows", &self.rows())
            .field("failure", &self.failure())
            .finish()
    }
}
