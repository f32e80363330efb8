//! Blocking connection over TCP or a Unix socket.

mod conn;
mod stream;

pub use conn::Conn;
pub use stream::Stream;
