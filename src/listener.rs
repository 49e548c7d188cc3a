//! Port fallback: bind the first free address out of an ordered candidate list.

use std::io;
use std::net::SocketAddr;

use tokio::net::TcpListener;
use tracing::{error, warn};

/// Bind the first candidate that is not already taken. A busy port moves on to
/// the next candidate; any other bind error is fatal.
pub async fn bind_first_free(candidates: &[SocketAddr]) -> io::Result<TcpListener> {
  for addr in candidates {
    match TcpListener::bind(addr).await {
      Ok(listener) => return Ok(listener),
      Err(e) if e.kind() == io::ErrorKind::AddrInUse => {
        warn!(target: "edutest", %addr, "Port is busy, trying another one");
      }
      Err(e) => {
        error!(target: "edutest", %addr, error = %e, "Failed to bind");
        return Err(e);
      }
    }
  }
  error!(target: "edutest", tried = candidates.len(), "No available ports found");
  Err(io::Error::new(io::ErrorKind::AddrInUse, "no available ports found"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn skips_busy_ports() {
    let taken = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let busy = taken.local_addr().expect("addr");
    let free: SocketAddr = "127.0.0.1:0".parse().expect("addr");

    let listener = bind_first_free(&[busy, free]).await.expect("fallback");
    assert_ne!(listener.local_addr().expect("addr").port(), busy.port());
  }

  #[tokio::test]
  async fn all_busy_is_an_error() {
    let taken = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let busy = taken.local_addr().expect("addr");

    let err = bind_first_free(&[busy, busy]).await.expect_err("no free port");
    assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
    let err = bind_first_free(&[]).await.expect_err("empty list");
    assert_eq!(err.kind(), io::ErrorKind::AddrInUse);
  }
}
