//! Addressability probe.
//!
//! A member is addressable once its stable network name resolves and the
//! data port accepts a TCP connection.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Resolve `address` and open a TCP connection within `timeout`.
pub async fn tcp_probe(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "probe connection failed");
            false
        }
        Err(_) => {
            debug!(%address, "probe timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_port_is_addressable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        assert!(tcp_probe(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_is_not_addressable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);
        assert!(!tcp_probe(&addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn unresolvable_name_is_not_addressable() {
        assert!(!tcp_probe("mongo-9.invalid:27017", Duration::from_secs(2)).await);
    }
}
