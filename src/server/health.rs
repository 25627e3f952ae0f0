//! Liveness endpoint for the webhook server, and a client for it.

use std::net::Ipv4Addr;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

/// Time allowed for [`ping_local`] to get its answer.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);

const PING_REQUEST: &[u8] = b"GET /ping HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";

/// Ping handler.
///
/// Returns `pong` while the server accepts connections. Used by the remote
/// source to check the webhook URL is reachable.
pub async fn ping_handler() -> &'static str {
    "pong"
}

/// Requests `GET /ping` from the server on local `port`.
///
/// True only for a `200` answer of `pong` within `timeout`.
pub async fn ping_local(port: u16, timeout: Duration) -> bool {
    let exchange = async {
        let mut stream = TcpStream::connect((Ipv4Addr::LOCALHOST, port)).await?;
        stream.write_all(PING_REQUEST).await?;
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await?;
        std::io::Result::Ok(response)
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(response)) => {
            let response = String::from_utf8_lossy(&response);
            response.starts_with("HTTP/1.1 200") && response.trim_end().ends_with("pong")
        }
        Ok(Err(e)) => {
            debug!(port, error = %e, "Ping failed");
            false
        }
        Err(_) => {
            debug!(port, "Ping timed out");
            false
        }
    }
}
