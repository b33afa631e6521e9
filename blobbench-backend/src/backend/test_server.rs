//! A single-request HTTP server for asserting how backends map response statuses.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// A server answering exactly one request with a canned response.
#[derive(Debug)]
pub struct OneShot {
    /// Base URL of the server, without a trailing slash.
    pub url: String,
    request: JoinHandle<String>,
}

impl OneShot {
    /// Starts a server that answers with `status` and `body`.
    pub async fn respond(status: u16, body: &'static [u8]) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let request = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_request(&mut socket).await;

            let response = format!(
                "HTTP/1.1 {status} Canned\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.write_all(body).await.unwrap();
            socket.shutdown().await.ok();

            head
        });

        Self { url, request }
    }

    /// Starts a server that accepts one connection and never answers.
    pub async fn hang() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let request = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let head = read_request(&mut socket).await;
            std::future::pending::<()>().await;
            head
        });

        Self { url, request }
    }

    /// The lowercased request line and headers that were received.
    pub async fn request_head(self) -> String {
        self.request.await.unwrap()
    }
}

/// Reads the request head and as much body as its `content-length` announces.
async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0; 4096];

    let head_len = loop {
        let read = socket.read(&mut chunk).await.unwrap();
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(pos) = buffer.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        if read == 0 {
            break buffer.len();
        }
    };

    let head = String::from_utf8_lossy(&buffer[..head_len]).to_lowercase();
    let body_len = head
        .lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|value| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buffer.len() < head_len + body_len {
        let read = socket.read(&mut chunk).await.unwrap();
        if read == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..read]);
    }

    head
}
