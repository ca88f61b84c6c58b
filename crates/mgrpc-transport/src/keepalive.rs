use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::TcpStream;

/// Keep-alive idle time and interval for WebSocket and TCP connections.
pub const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(3 * 60);

/// Enable TCP keep-alive on `stream`, idle time and interval both
/// set to `period` where the platform lets the interval be tuned.
pub fn enable_keepalive(stream: &TcpStream, period: Duration) -> std::io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(period);
    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        windows
    ))]
    let keepalive = keepalive.with_interval(period);

    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn keepalive_enabled_on_connected_stream() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.unwrap() });

        let stream = TcpStream::connect(addr).await.unwrap();
        enable_keepalive(&stream, TCP_KEEPALIVE_INTERVAL).unwrap();

        let socket = SockRef::from(&stream);
        assert!(socket.keepalive().unwrap());
        #[cfg(target_os = "linux")]
        {
            assert_eq!(socket.keepalive_time().unwrap(), TCP_KEEPALIVE_INTERVAL);
            assert_eq!(socket.keepalive_interval().unwrap(), TCP_KEEPALIVE_INTERVAL);
        }

        accept.await.unwrap();
    }
}
