//! Query templates.
//!
//! A template is SQL text with `%`-directives, each consuming one [`Arg`]:
//!
//! | directive | argument | result |
//! |---|---|---|
//! | `%u` | [`Arg::u32`] | `$N`, int4, big-endian binary |
//! | `%U` | [`Arg::u64`] | `$N`, int8, big-endian binary |
//! | `%S` | [`Arg::text`] | `$N`, text |
//! | `%a` | [`Arg::addr`] | `$N`, inet (v4/v6, optional prefix length) |
//! | `%b` | [`Arg::block`] | `$N`, cidr |
//! | `%s` | [`Arg::raw`] | copied into the statement as-is |
//! | `%t` | [`Arg::quoted`] | copied into the statement inside single quotes |
//!
//! `%s` and `%t` are not escaped. Only pass values the program controls.
//!
//! ```
//! use pgquery::template::{compile, Arg};
//!
//! let stmt = compile(
//!     "add_netblock",
//!     "INSERT INTO t (a,b,c) VALUES(%u, %a, %S)",
//!     &[Arg::u32(1), Arg::addr("192.0.2.0/24"), Arg::text("idle")],
//! )?;
//! assert_eq!(stmt.sql(), "INSERT INTO t (a,b,c) VALUES($1, $2, $3)");
//! # Ok::<(), pgquery::Error>(())
//! ```

use crate::error::{CompileErrorKind, Error, Result};
use crate::protocol::types::oid;
use crate::statement::{BoundParam, Statement, StatementBuffer};

/// One template argument. Build with the constructor matching the directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arg<'a> {
    U32(u32),
    U64(u64),
    Text(&'a str),
    Addr(&'a str),
    Block(&'a str),
    Raw(&'a str),
    Quoted(&'a str),
}

impl<'a> Arg<'a> {
    /// For `%u`.
    pub fn u32(value: u32) -> Self {
        Arg::U32(value)
    }

    /// For `%U`.
    pub fn u64(value: u64) -> Self {
        Arg::U64(value)
    }

    /// For `%S`.
    pub fn text(value: &'a str) -> Self {
        Arg::Text(value)
    }

    /// For `%a`.
    pub fn addr(value: &'a str) -> Self {
        Arg::Addr(value)
    }

    /// For `%b`.
    pub fn block(value: &'a str) -> Self {
        Arg::Block(value)
    }

    /// For `%s`.
    pub fn raw(value: &'a str) -> Self {
        Arg::Raw(value)
    }

    /// For `%t`.
    pub fn quoted(value: &'a str) -> Self {
        Arg::Quoted(value)
    }

    fn as_str(&self) -> Option<&'a str> {
        match *self {
            Arg::U32(_) | Arg::U64(_) => None,
            Arg::Text(s) | Arg::Addr(s) | Arg::Block(s) | Arg::Raw(s) | Arg::Quoted(s) => Some(s),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Arg::U32(_) => "u32",
            Arg::U64(_) => "u64",
            Arg::Text(_) => "text",
            Arg::Addr(_) => "address",
            Arg::Block(_) => "block",
            Arg::Raw(_) => "raw",
            Arg::Quoted(_) => "quoted",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Directive {
    U32,
    U64,
    Text,
    Addr,
    Block,
    Raw,
    Quoted,
}

impl Directive {
    fn from_char(c: char) -> Option<Self> {
        Some(match c {
            'u' => Directive::U32,
            'U' => Directive::U64,
            'S' => Directive::Text,
            'a' => Directive::Addr,
            'b' => Directive::Block,
            's' => Directive::Raw,
            't' => Directive::Quoted,
            _ => return None,
        })
    }

    fn as_char(self) -> char {
        match self {
            Directive::U32 => 'u',
            Directive::U64 => 'U',
            Directive::Text => 'S',
            Directive::Addr => 'a',
            Directive::Block => 'b',
            Directive::Raw => 's',
            Directive::Quoted => 't',
        }
    }

    fn accepts(self, arg: &Arg<'_>) -> bool {
        matches!(
            (self, arg),
            (Directive::U32, Arg::U32(_))
                | (Directive::U64, Arg::U64(_))
                | (Directive::Text, Arg::Text(_))
                | (Directive::Addr, Arg::Addr(_))
                | (Directive::Block, Arg::Block(_))
                | (Directive::Raw, Arg::Raw(_))
                | (Directive::Quoted, Arg::Quoted(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Piece<'t> {
    Literal(&'t str),
    Directive(Directive),
}

/// Split a template into literal runs and directives.
fn parse(template: &str) -> core::result::Result<Vec<Piece<'_>>, CompileErrorKind> {
    let mut pieces = Vec::new();
    let mut rest = template;

    while let Some(pos) = rest.find('%') {
        if pos > 0 {
            pieces.push(Piece::Literal(&rest[..pos]));
        }
        let mut after = rest[pos + 1..].chars();
        let c = after.next().ok_or(CompileErrorKind::DanglingDirective)?;
        let directive = Directive::from_char(c).ok_or(CompileErrorKind::UnknownDirective(c))?;
        pieces.push(Piece::Directive(directive));
        rest = after.as_str();
    }
    if !rest.is_empty() {
        pieces.push(Piece::Literal(rest));
    }

    Ok(pieces)
}

/// Pair every directive with its argument, checking kinds and count.
fn bind<'a>(
    pieces: &[Piece<'_>],
    args: &[Arg<'a>],
) -> core::result::Result<Vec<Arg<'a>>, CompileErrorKind> {
    let mut args = args.iter();
    let mut bound = Vec::new();

    for piece in pieces {
        let Piece::Directive(directive) = *piece else {
            continue;
        };
        let arg = args.next().ok_or(CompileErrorKind::MissingArgument {
            directive: directive.as_char(),
        })?;
        if !directive.accepts(arg) {
            return Err(CompileErrorKind::ArgumentMismatch {
                directive: directive.as_char(),
                got: arg.kind(),
            });
        }
        if arg.as_str().is_some_and(|s| s.contains('\0')) {
            return Err(CompileErrorKind::NulInArgument {
                directive: directive.as_char(),
            });
        }
        bound.push(*arg);
    }

    match args.len() {
        0 => Ok(bound),
        count => Err(CompileErrorKind::UnusedArguments { count }),
    }
}

/// Write literals and validated arguments into the buffer.
fn emit(
    buf: &mut StatementBuffer,
    pieces: &[Piece<'_>],
    bound: &[Arg<'_>],
) -> core::result::Result<(), CompileErrorKind> {
    let too_long = CompileErrorKind::StatementTooLong {
        capacity: buf.capacity(),
    };
    let mut bound = bound.iter();

    for piece in pieces {
        let arg = match piece {
            Piece::Literal(text) => {
                if !buf.push_str(text) {
                    return Err(too_long);
                }
                continue;
            }
            Piece::Directive(_) => match bound.next() {
                Some(arg) => arg,
                None => continue,
            },
        };

        let param = match *arg {
            Arg::U32(v) => BoundParam::int4(v),
            Arg::U64(v) => BoundParam::int8(v),
            Arg::Text(s) => BoundParam::text(oid::TEXT, s),
            Arg::Addr(s) => BoundParam::text(oid::INET, s),
            Arg::Block(s) => BoundParam::text(oid::CIDR, s),
            Arg::Raw(s) => {
                if !buf.push_str(s) {
                    return Err(too_long);
                }
                continue;
            }
            Arg::Quoted(s) => {
                if !buf.push_str(&format!("'{}'", s)) {
                    return Err(too_long);
                }
                continue;
            }
        };

        if buf.param_count() >= buf.max_params() {
            return Err(CompileErrorKind::TooManyParams {
                max: buf.max_params(),
            });
        }
        if !buf.push_param(param) {
            return Err(too_long);
        }
    }

    Ok(())
}

/// Compile `template` into `buf`, which is reset first.
///
/// On failure the buffer is left empty and the failure is logged with
/// `caller` and the template.
pub fn compile_into(
    buf: &mut StatementBuffer,
    caller: &str,
    template: &str,
    args: &[Arg<'_>],
) -> Result<()> {
    buf.reset();

    let outcome = parse(template).and_then(|pieces| {
        let bound = bind(&pieces, args)?;
        emit(buf, &pieces, &bound)
    });

    outcome.map_err(|kind| {
        buf.reset();
        tracing::error!(caller, template, "{}; string setup failed", kind);
        Error::Compile {
            caller: caller.to_string(),
            template: template.to_string(),
            kind,
        }
    })
}

/// Compile `template` with the default statement limits.
pub fn compile(caller: &str, template: &str, args: &[Arg<'_>]) -> Result<Statement> {
    let mut buf = StatementBuffer::default();
    compile_into(&mut buf, caller, template, args)?;
    Ok(buf.take())
}
