//! Listening socket setup
//!
//! The master binds exactly one socket; workers inherit the descriptor
//! across fork and accept from it concurrently. Address and port reuse are
//! enabled so the kernel distributes incoming connections among the
//! accepting processes.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use socket2::{Domain, Protocol, Socket, Type};

/// Kernel accept backlog.
pub const LISTEN_BACKLOG: i32 = 128;

/// Binds a blocking listener on `port` with `SO_REUSEADDR` and
/// `SO_REUSEPORT` set. Port 0 asks the kernel for an ephemeral port (used by
/// the test suite).
pub fn bind(port: u16) -> io::Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_reuse_port(true)?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
