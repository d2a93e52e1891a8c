use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

/// A scripted HTTP/1.1 mock server.
///
/// Each accepted connection plays back a fixed list of responses, one
/// per request it reads; the connection is half-closed after the last
/// response so close-delimited bodies see EOF. Connections are served
/// sequentially, matching clients that open one at a time.
pub struct ScriptedServer {
    port: u16,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedServer {
    /// Start a server. `connections[i]` holds the responses for the
    /// i-th accepted connection, one per request.
    pub async fn start(connections: Vec<Vec<Vec<u8>>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let captured = Arc::clone(&requests);

        tokio::spawn(async move {
            for scripts in connections {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };
                handle_connection(stream, scripts, Arc::clone(&captured)).await;
            }
        });

        Self { port, requests }
    }

    /// One response per connection, connection closed after each.
    pub async fn start_per_connection(responses: Vec<Vec<u8>>) -> Self {
        Self::start(responses.into_iter().map(|r| vec![r]).collect()).await
    }

    /// Single connection, single response.
    pub async fn start_single(response: impl Into<Vec<u8>>) -> Self {
        Self::start_per_connection(vec![response.into()]).await
    }

    #[allow(dead_code)]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL plus path for this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://127.0.0.1:{}{}", self.port, path)
    }

    /// Every request received so far, in arrival order.
    #[allow(dead_code)]
    pub async fn requests(&self) -> Vec<String> {
        self.requests.lock().await.clone()
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    scripts: Vec<Vec<u8>>,
    captured: Arc<Mutex<Vec<String>>>,
) {
    for response in scripts {
        let Some(request) = read_request(&mut stream).await else {
            return;
        };
        captured.lock().await.push(request);
        if stream.write_all(&response).await.is_err() {
            return;
        }
        let _ = stream.flush().await;
    }
    let _ = stream.shutdown().await;
}

/// Read one request (head plus any Content-Length body) as text.
async fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut received: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4096];

    let head_end = loop {
        if let Some(pos) = received.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    };

    let head = String::from_utf8_lossy(&received[..head_end]).to_string();
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse().ok())?
        })
        .unwrap_or(0);

    while received.len() < head_end + content_length {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return None,
            Ok(n) => received.extend_from_slice(&buf[..n]),
        }
    }

    Some(String::from_utf8_lossy(&received).to_string())
}
