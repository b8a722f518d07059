use std::io;
use std::net::{Ipv4Addr, TcpListener};
use tracing::debug;

/// Reserve an ephemeral TCP port for a test script.
///
/// The listener is closed before returning, so the port is only known to be
/// free at the moment of the call. Concurrent callers rely on the OS not
/// handing the same just-released port out twice in quick succession; this is
/// best effort, not a guarantee.
pub fn allocate_port() -> io::Result<u16> {
    let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    debug!(port, "allocated free port");
    Ok(port)
}
