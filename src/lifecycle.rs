//! Establishing sessions with retry and backoff.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{Error, ErrorFields, Result};
use crate::opts::Opts;
use crate::session::{Connector, NoticeHandler, Session};

/// Cooperative keep-running signal, checked between connection attempts.
///
/// Clones share the flag; stopping one stops all of them.
#[derive(Debug, Clone)]
pub struct RunToken(Arc<AtomicBool>);

impl RunToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(true)))
    }

    pub fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Ask every holder to stop at its next check.
    pub fn stop(&self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Performs the wait between two connection attempts.
pub type Sleeper = Box<dyn FnMut(Duration) + Send>;

/// Pause between failed connection attempts: 2 seconds growing by one per
/// attempt up to 29, then wrapping back to 2.
pub struct Backoff {
    sleeper: Sleeper,
}

impl Backoff {
    /// Backoff sleeping on the current thread.
    pub fn new() -> Self {
        Self::with_sleeper(Box::new(std::thread::sleep))
    }

    pub fn with_sleeper(sleeper: Sleeper) -> Self {
        Self { sleeper }
    }

    /// Interval after the failed attempt with zero-based index `attempt`.
    pub fn interval(attempt: u32) -> Duration {
        Duration::from_secs(u64::from(attempt % 28) + 2)
    }

    pub fn wait(&mut self, attempt: u32) {
        (self.sleeper)(Self::interval(attempt));
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Backoff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backoff").finish_non_exhaustive()
    }
}

/// Render a notice the way the server log does: `SEVERITY:  message`.
pub fn notice_line(fields: &ErrorFields) -> String {
    format!(
        "{}:  {}",
        fields.severity().unwrap_or("NOTICE"),
        fields.message.as_deref().unwrap_or_default()
    )
}

/// Whether a rendered notice line is forwarded to the log.
pub fn forwards_notice(line: &str, suppress_notices: bool) -> bool {
    let is_notice = line
        .get(..7)
        .is_some_and(|head| head.eq_ignore_ascii_case("NOTICE:"));
    !(suppress_notices && is_notice)
}

/// Notice callback for a new session. The suppression flag is fixed when
/// the session is established.
pub fn notice_forwarder(suppress_notices: bool) -> NoticeHandler {
    Box::new(move |fields: &ErrorFields| {
        let line = notice_line(fields);
        if forwards_notice(&line, suppress_notices) {
            tracing::info!(target: "PSQL", "{}", line);
        }
    })
}

/// Open a session, retrying per `opts`.
///
/// Bounded to `opts.max_connect_attempts` unless `opts.keep_trying` is set.
/// After a failed attempt the token is checked, the backoff waits, and the
/// token is checked again; a stopped token ends the loop with the last
/// failure. There is no wait after the final bounded attempt.
pub fn connect(
    connector: &mut dyn Connector,
    opts: &Opts,
    token: &RunToken,
    backoff: &mut Backoff,
) -> Result<Box<dyn Session>> {
    if !opts.has_target() {
        tracing::error!("No connection information available, thus can't connect");
        return Err(Error::InvalidUsage(
            "no connection information available".into(),
        ));
    }

    let conninfo = opts.conninfo();
    if opts.keep_trying {
        tracing::debug!(conninfo = %conninfo, "connecting (keep trying)");
    } else {
        tracing::debug!(
            conninfo = %conninfo,
            max_attempts = opts.max_connect_attempts,
            "connecting"
        );
    }

    let mut attempt: u32 = 0;
    loop {
        let err = match connector.connect(opts, notice_forwarder(opts.suppress_notices)) {
            Ok(session) => {
                tracing::debug!(conninfo = %conninfo, attempt = attempt + 1, "connected");
                return Ok(session);
            }
            Err(e) => e,
        };
        attempt = attempt.saturating_add(1);

        let give_up = |err: Error| Error::Connect {
            attempts: attempt,
            source: Box::new(err),
        };

        if !opts.keep_trying && attempt >= opts.max_connect_attempts {
            tracing::error!(
                conninfo = %conninfo,
                attempts = attempt,
                "Connection to database failed: {}",
                err
            );
            return Err(give_up(err));
        }

        if !token.is_running() {
            tracing::debug!("Stop running");
            return Err(give_up(err));
        }

        tracing::warn!(
            attempt,
            max_attempts = opts.max_connect_attempts,
            keep_trying = opts.keep_trying,
            "Connection attempt failed, trying again: {}",
            err
        );
        backoff.wait(attempt - 1);

        if !token.is_running() {
            tracing::debug!("Stop running");
            return Err(give_up(err));
        }
    }
}
