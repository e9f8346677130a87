//! HTTP `CONNECT` handshake with an upstream proxy.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, error};

use crate::config::HostPort;
use crate::error::{Error, HandshakePhase, Result};
use crate::timeout::Watchdog;

/// Time allowed for each write attempt and for reading the response header.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(20);

/// Maximum size of the proxy response header block.
const RESPONSE_HEADER_CAP: usize = 2048;

const HEADER_DELIMITER: &[u8] = b"\r\n\r\n";

/// Ask the proxy on `server` to open a tunnel to `target`.
///
/// Writes the `CONNECT` request, reads the response header block, and
/// requires a `200` status. Bytes the proxy sends past the header block are
/// discarded; the tunnel has not opened yet and nothing may speak on it.
pub async fn http_connect<S>(session_id: u64, server: &mut S, target: &HostPort) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let authority = target.authority();
    debug!(
        "[session {}] http-proxy handshake CONNECT {} HTTP/1.1",
        session_id, authority
    );
    let request = format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\nProxy-Connection: keep-alive\r\n\r\n"
    );
    let request = request.as_bytes();

    let mut watchdog = Watchdog::new();
    let mut bytes_written = 0;
    while bytes_written < request.len() {
        watchdog.arm(HANDSHAKE_TIMEOUT);
        match watchdog.watch(server.write(&request[bytes_written..])).await {
            None => {
                error!(
                    "[session {}] http-proxy handshake write request header timeout",
                    session_id
                );
                return Err(Error::HandshakeTimeout(HandshakePhase::Write));
            }
            Some(Err(e)) => {
                error!(
                    "[session {}] http-proxy handshake write request header error: {}",
                    session_id, e
                );
                return Err(e.into());
            }
            Some(Ok(0)) => {
                error!(
                    "[session {}] http-proxy handshake write request header error: connection closed",
                    session_id
                );
                return Err(io::Error::from(io::ErrorKind::WriteZero).into());
            }
            Some(Ok(n)) => bytes_written += n,
        }
    }

    let mut response = Vec::with_capacity(RESPONSE_HEADER_CAP);
    let mut buffer = [0u8; RESPONSE_HEADER_CAP];
    watchdog.arm(HANDSHAKE_TIMEOUT);
    let header_end = loop {
        if let Some(pos) = find_delimiter(&response) {
            break pos;
        }
        if response.len() >= RESPONSE_HEADER_CAP {
            error!(
                "[session {}] http-proxy handshake failed bad HTTP response header",
                session_id
            );
            return Err(Error::BadHttpResponse);
        }
        let room = RESPONSE_HEADER_CAP - response.len();
        match watchdog.watch(server.read(&mut buffer[..room])).await {
            None => {
                error!(
                    "[session {}] http-proxy handshake read response header timeout",
                    session_id
                );
                return Err(Error::HandshakeTimeout(HandshakePhase::Read));
            }
            Some(Err(e)) => {
                error!(
                    "[session {}] http-proxy handshake read response header error: {}",
                    session_id, e
                );
                return Err(e.into());
            }
            Some(Ok(0)) => {
                error!(
                    "[session {}] http-proxy handshake read response header error: connection closed",
                    session_id
                );
                return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
            }
            Some(Ok(n)) => response.extend_from_slice(&buffer[..n]),
        }
    };

    let first_line_end = response[..header_end + 2]
        .windows(2)
        .position(|pair| pair == b"\r\n")
        .unwrap_or(header_end);
    let status_code = match parse_status_line(&response[..first_line_end]) {
        Some(code) => code,
        None => {
            error!(
                "[session {}] http-proxy handshake failed bad HTTP response header",
                session_id
            );
            return Err(Error::BadHttpResponse);
        }
    };
    if status_code != "200" {
        error!(
            "[session {}] http-proxy handshake failed response status_code: {}",
            session_id, status_code
        );
        return Err(Error::ConnectRejected(status_code.to_string()));
    }

    debug!("[session {}] http-proxy handshake success", session_id);
    Ok(())
}

fn find_delimiter(response: &[u8]) -> Option<usize> {
    response
        .windows(HEADER_DELIMITER.len())
        .position(|window| window == HEADER_DELIMITER)
}

/// Match `HTTP/1.[01] <status-code> <reason-phrase>` case-insensitively and
/// return the status code digits.
fn parse_status_line(line: &[u8]) -> Option<&str> {
    let line = std::str::from_utf8(line).ok()?;
    if !line.get(..7)?.eq_ignore_ascii_case("HTTP/1.") {
        return None;
    }
    let rest = line[7..].strip_prefix(['0', '1'])?;

    let after_version = rest.trim_start_matches([' ', '\t']);
    if after_version.len() == rest.len() {
        return None;
    }

    let code_len = after_version
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(after_version.len());
    if code_len == 0 {
        return None;
    }
    let (code, tail) = after_version.split_at(code_len);

    // The reason phrase may be empty, but the separator must be there.
    let after_code = tail.trim_start_matches([' ', '\t']);
    if after_code.len() == tail.len() {
        return None;
    }

    Some(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET_REQUEST: &[u8] = b"CONNECT 127.0.0.1:5001 HTTP/1.1\r\n\
        Host: 127.0.0.1:5001\r\n\
        Proxy-Connection: keep-alive\r\n\r\n";

    fn target() -> HostPort {
        HostPort::new("127.0.0.1", 5001)
    }

    async fn read_request(proxy: &mut tokio::io::DuplexStream) -> Vec<u8> {
        let mut request = Vec::new();
        let mut buf = [0u8; 256];
        while find_delimiter(&request).is_none() {
            let n = proxy.read(&mut buf).await.unwrap();
            assert!(n > 0, "request ended early");
            request.extend_from_slice(&buf[..n]);
        }
        request
    }

    #[tokio::test]
    async fn accepts_a_200_response() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            let request = read_request(&mut proxy).await;
            assert_eq!(request, TARGET_REQUEST);
            proxy
                .write_all(b"HTTP/1.1 200 Connection Established\r\nVia: test\r\n\r\n")
                .await
                .unwrap();
            proxy
        });

        http_connect(1, &mut relay, &target()).await.unwrap();
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn matches_the_status_line_case_insensitively() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            read_request(&mut proxy).await;
            proxy.write_all(b"http/1.0 200 ok\r\n\r\n").await.unwrap();
            proxy
        });

        http_connect(1, &mut relay, &target()).await.unwrap();
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn brackets_ipv6_targets_in_the_authority() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            let request = read_request(&mut proxy).await;
            let text = String::from_utf8(request).unwrap();
            assert!(text.starts_with("CONNECT [::1]:443 HTTP/1.1\r\n"));
            assert!(text.contains("Host: [::1]:443\r\n"));
            proxy.write_all(b"HTTP/1.1 200 OK\r\n\r\n").await.unwrap();
            proxy
        });

        http_connect(1, &mut relay, &HostPort::new("::1", 443))
            .await
            .unwrap();
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn parses_a_response_delivered_byte_by_byte() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            read_request(&mut proxy).await;
            for byte in b"HTTP/1.1 200 Connection Established\r\n\r\n" {
                proxy.write_all(&[*byte]).await.unwrap();
                proxy.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
            proxy
        });

        http_connect(1, &mut relay, &target()).await.unwrap();
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_non_200_status() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            read_request(&mut proxy).await;
            proxy
                .write_all(b"HTTP/1.1 407 Proxy Authentication Required\r\n\r\n")
                .await
                .unwrap();
            proxy
        });

        match http_connect(1, &mut relay, &target()).await {
            Err(Error::ConnectRejected(code)) => assert_eq!(code, "407"),
            other => panic!("expected rejection, got {:?}", other),
        }
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_a_malformed_status_line() {
        let (mut proxy, mut relay) = tokio::io::duplex(4096);
        let proxy_task = tokio::spawn(async move {
            read_request(&mut proxy).await;
            proxy
                .write_all(b"SSH-2.0-OpenSSH_9.6\r\n\r\n")
                .await
                .unwrap();
            proxy
        });

        assert!(matches!(
            http_connect(1, &mut relay, &target()).await,
            Err(Error::BadHttpResponse)
        ));
        proxy_task.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_an_oversized_response_header() {
        let (mut proxy, mut relay) = tokio::io::duplex(8192);
        let proxy_task = tokio::spawn(async move {
            read_request(&mut proxy).await;
            let mut response = b"HTTP/1.1 200 OK\r\n".to_vec();
            response.extend_from_slice(&b"X-Filler: yes\r\n".repeat(300));
            proxy.write_all(&response).await.unwrap();
            proxy
        });

        assert!(matches!(
            http_connect(1, &mut relay, &target()).await,
            Err(Error::BadHttpResponse)
        ));
        proxy_task.await.unwrap();
    }

    #[test]
    fn status_line_shapes() {
        assert_eq!(parse_status_line(b"HTTP/1.1 200 OK"), Some("200"));
        assert_eq!(parse_status_line(b"HTTP/1.0 502 Bad Gateway"), Some("502"));
        assert_eq!(parse_status_line(b"HTTP/1.1  301  moved"), Some("301"));
        // Separator after the status code is required even when the reason
        // phrase is empty.
        assert_eq!(parse_status_line(b"HTTP/1.1 200 "), Some("200"));
        assert_eq!(parse_status_line(b"HTTP/1.1 200"), None);
        assert_eq!(parse_status_line(b"HTTP/2.0 200 OK"), None);
        assert_eq!(parse_status_line(b"HTTP/1.1 abc OK"), None);
        assert_eq!(parse_status_line(b""), None);
    }
}
