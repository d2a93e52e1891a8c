//! Engine scenarios: framing, redirects, status handling, keep-alive,
//! and the 100-continue subprotocol, all against scripted servers.

mod helpers;

use helpers::mock_server::ScriptedServer;
use siphon::{Error, HttpStream, RequestOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::runtime::Handle;

fn new_stream() -> HttpStream {
    HttpStream::new(Handle::current())
}

async fn read_to_end(stream: &mut HttpStream) -> Vec<u8> {
    let mut body = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read_some(&mut buf).await.unwrap() {
            0 => break,
            n => body.extend_from_slice(&buf[..n]),
        }
    }
    body
}

#[tokio::test]
async fn content_length_body_then_eof() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..])
            .await;

    let mut stream = new_stream();
    stream.open(&server.url("/x")).await.unwrap();
    assert!(stream.is_open());
    assert_eq!(stream.content_length(), Some(5));

    let body = read_to_end(&mut stream).await;
    assert_eq!(body, b"hello");

    // Completed bodies keep reporting end of body.
    let mut buf = [0u8; 16];
    assert_eq!(stream.read_some(&mut buf).await.unwrap(), 0);
}

#[tokio::test]
async fn request_head_shape_on_the_wire() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"[..]).await;

    let mut stream = new_stream();
    let mut opts = RequestOptions::new();
    opts.insert("X-Alpha", "1");
    opts.insert("X-Beta", "2");
    stream.set_request_options(opts);
    stream.open(&server.url("/path?q=1")).await.unwrap();

    let requests = server.requests().await;
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    assert!(request.starts_with(&format!(
        "GET /path?q=1 HTTP/1.1\r\nHost: 127.0.0.1:{}\r\nAccept: */*\r\n",
        server.port()
    )));
    assert!(request.contains("X-Alpha: 1\r\nX-Beta: 2\r\n"));
    assert!(request.ends_with("Connection: close\r\n\r\n"));
}

#[tokio::test]
async fn http10_body_delimited_by_close() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.0 200 OK\r\n\r\nall the way to eof"[..]).await;

    let mut stream = new_stream();
    stream.open(&server.url("/")).await.unwrap();
    assert_eq!(stream.content_length(), None);
    assert!(!stream.keep_alive());

    let body = read_to_end(&mut stream).await;
    assert_eq!(body, b"all the way to eof");
}

#[tokio::test]
async fn redirect_followed_to_final_url() {
    let target =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok"[..]).await;
    let redirect = ScriptedServer::start_single(
        format!(
            "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\n\r\n",
            target.url("/")
        )
        .into_bytes(),
    )
    .await;

    let mut stream = new_stream();
    stream.open(&redirect.url("/start")).await.unwrap();
    assert_eq!(stream.final_url(), Some(target.url("/").as_str()));

    let body = read_to_end(&mut stream).await;
    assert_eq!(body, b"ok");
}

#[tokio::test]
async fn relative_redirect_resolved_against_current_url() {
    let response_200 = b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\n\r\nhere".to_vec();
    let response_302 =
        b"HTTP/1.1 302 Found\r\nLocation: /moved\r\nContent-Length: 0\r\n\r\n".to_vec();
    let server = ScriptedServer::start_per_connection(vec![response_302, response_200]).await;

    let mut stream = new_stream();
    stream.open(&server.url("/start")).await.unwrap();
    assert_eq!(stream.final_url(), Some(server.url("/moved").as_str()));

    let requests = server.requests().await;
    assert!(requests[1].starts_with("GET /moved HTTP/1.1\r\n"));
}

#[tokio::test]
async fn redirect_budget_exhaustion_is_invalid_redirect() {
    // Six connections, each replying 302 to itself: the fifth follow
    // lands on the sixth response and the budget is spent.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let response = format!(
        "HTTP/1.1 302 Found\r\nLocation: http://127.0.0.1:{}/loop\r\nContent-Length: 0\r\n\r\n",
        port
    );
    let counter = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = std::sync::Arc::clone(&counter);
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).await;
            let _ = stream.write_all(response.as_bytes()).await;
        }
    });

    let mut stream = new_stream();
    let err = stream
        .open(&format!("http://127.0.0.1:{}/loop", port))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRedirect(_)));
    assert!(!stream.is_open());
    assert_eq!(counter.load(std::sync::atomic::Ordering::SeqCst), 6);
}

#[tokio::test]
async fn zero_budget_refuses_first_redirect() {
    let server = ScriptedServer::start_single(
        &b"HTTP/1.1 302 Found\r\nLocation: /next\r\nContent-Length: 0\r\n\r\n"[..],
    )
    .await;

    let mut stream = new_stream();
    stream.set_max_redirects(0);
    let err = stream.open(&server.url("/")).await.unwrap_err();
    assert!(matches!(err, Error::InvalidRedirect(_)));
    assert_eq!(server.requests().await.len(), 1);
}

#[tokio::test]
async fn error_status_leaves_body_readable() {
    let server = ScriptedServer::start_single(
        &b"HTTP/1.1 404 Not Found\r\nContent-Length: 9\r\n\r\nnot found"[..],
    )
    .await;

    let mut stream = new_stream();
    let err = stream.open(&server.url("/missing")).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus(404)));
    assert_eq!(stream.response_options().status_code(), Some(404));
    assert!(stream.is_open());

    let body = read_to_end(&mut stream).await;
    assert_eq!(body, b"not found");
}

#[tokio::test]
async fn redirect_status_without_location_is_reported() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.1 302 Found\r\nContent-Length: 0\r\n\r\n"[..])
            .await;

    let mut stream = new_stream();
    let err = stream.open(&server.url("/")).await.unwrap_err();
    assert!(matches!(err, Error::HttpStatus(302)));
}

#[tokio::test]
async fn malformed_status_line_reported_early() {
    let server = ScriptedServer::start_single(&b"NONSENSE 200 OK\r\n\r\n"[..]).await;

    let mut stream = new_stream();
    let err = stream.open(&server.url("/")).await.unwrap_err();
    assert!(matches!(err, Error::MalformedStatusLine));
    assert!(!stream.is_open());
}

#[tokio::test]
async fn folded_response_header_is_joined() {
    let server = ScriptedServer::start_single(
        &b"HTTP/1.1 200 OK\r\nX-Folded: one\r\n two\r\nContent-Length: 0\r\n\r\n"[..],
    )
    .await;

    let mut stream = new_stream();
    stream.open(&server.url("/")).await.unwrap();
    assert_eq!(stream.response_options().find("x-folded"), Some("one two"));
}

#[tokio::test]
async fn keep_alive_second_request_on_same_connection() {
    let first = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: keep-alive\r\n\r\none".to_vec();
    let second = b"HTTP/1.1 200 OK\r\nContent-Length: 3\r\nConnection: close\r\n\r\ntwo".to_vec();
    let server = ScriptedServer::start(vec![vec![first, second]]).await;

    let mut stream = new_stream();
    let mut opts = RequestOptions::new();
    opts.insert("Connection", "keep-alive");
    stream.set_request_options(opts);
    stream.open(&server.url("/a")).await.unwrap();
    assert!(stream.keep_alive());
    assert_eq!(read_to_end(&mut stream).await, b"one");

    let mut opts = RequestOptions::new();
    opts.insert(siphon::options::keys::URL, "/b");
    stream.request(opts).await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"two");

    let requests = server.requests().await;
    assert_eq!(requests.len(), 2);
    assert!(requests[1].starts_with("GET /b HTTP/1.1\r\n"));
}

#[tokio::test]
async fn expect_100_continue_full_exchange() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        // Read the head only; the body is withheld until we ack.
        let mut received = Vec::new();
        let mut buf = [0u8; 4096];
        while !received.windows(4).any(|w| w == b"\r\n\r\n") {
            let n = stream.read(&mut buf).await.unwrap();
            received.extend_from_slice(&buf[..n]);
        }
        let head = String::from_utf8_lossy(&received);
        assert!(head.contains("Expect: 100-continue\r\n"));
        assert!(!head.contains("payload"));

        stream.write_all(b"HTTP/1.1 100 Continue\r\n\r\n").await.unwrap();

        let mut body = vec![0u8; 7];
        stream.read_exact(&mut body).await.unwrap();
        assert_eq!(body, b"payload");

        stream
            .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nok")
            .await
            .unwrap();
    });

    let mut stream = new_stream();
    let mut opts = RequestOptions::new();
    opts.insert(siphon::options::keys::REQUEST_METHOD, "POST");
    opts.insert("Expect", "100-continue");
    opts.set_body("payload");
    stream.set_request_options(opts);

    let err = stream
        .open(&format!("http://127.0.0.1:{}/upload", port))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ContinueRequest));
    assert!(stream.is_open());

    stream.write_some(b"payload").await.unwrap();
    stream.receive_response().await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"ok");
}

#[tokio::test]
async fn unexpected_100_is_malformed() {
    let server = ScriptedServer::start_single(
        &b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n"[..],
    )
    .await;

    let mut stream = new_stream();
    let err = stream.open(&server.url("/")).await.unwrap_err();
    assert!(matches!(err, Error::MalformedResponseHeaders));
}

#[tokio::test]
async fn close_aborts_subsequent_operations() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..])
            .await;

    let mut stream = new_stream();
    stream.open(&server.url("/")).await.unwrap();
    stream.close().await;
    assert!(!stream.is_open());

    let mut buf = [0u8; 16];
    assert!(matches!(
        stream.read_some(&mut buf).await,
        Err(Error::OperationAborted)
    ));
}

#[tokio::test]
async fn stream_reusable_after_clear() {
    let first =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\na"[..]).await;
    let second =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 1\r\n\r\nb"[..]).await;

    let mut stream = new_stream();
    stream.open(&first.url("/")).await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"a");

    stream.close().await;
    stream.clear();
    stream.open(&second.url("/")).await.unwrap();
    assert_eq!(read_to_end(&mut stream).await, b"b");
}

#[tokio::test]
async fn read_body_helper_fills_buffer() {
    let server =
        ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..])
            .await;

    let mut stream = new_stream();
    let mut buf = [0u8; 64];
    let n = siphon::read_body(&mut stream, &server.url("/"), &mut buf)
        .await
        .unwrap();
    assert_eq!(&buf[..n], b"hello");
}

#[tokio::test]
async fn read_body_helper_without_content_length() {
    let server = ScriptedServer::start_single(&b"HTTP/1.1 200 OK\r\n\r\nuntil close"[..]).await;

    let mut stream = new_stream();
    let mut buf = [0u8; 64];
    let n = siphon::read_body(&mut stream, &server.url("/"), &mut buf)
        .await
        .unwrap();
    assert_eq!(&buf[..n], b"until close");
}

#[tokio::test]
async fn download_persists_body_to_file_storage() {
    let server = ScriptedServer::start_single(
        &b"HTTP/1.1 200 OK\r\nContent-Length: 11\r\n\r\nhello world"[..],
    )
    .await;

    let dir = std::env::temp_dir().join("siphon-download-test");
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let path = dir.join("body.bin");

    let mut stream = new_stream();
    let mut storage = siphon::FileStorage::new();
    let written = siphon::download(&mut stream, &server.url("/"), &mut storage, &path)
        .await
        .unwrap();
    assert_eq!(written, 11);
    assert_eq!(tokio::fs::read(&path).await.unwrap(), b"hello world");
    tokio::fs::remove_file(&path).await.unwrap();
}

#[test]
fn blocking_surface_runs_outside_the_runtime() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(ScriptedServer::start_single(
        &b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhello"[..],
    ));

    let mut stream = HttpStream::new(runtime.handle().clone());
    stream.open_blocking(&server.url("/")).unwrap();
    assert_eq!(stream.content_length(), Some(5));

    let mut body = Vec::new();
    let mut buf = [0u8; 16];
    loop {
        match stream.read_some_blocking(&mut buf).unwrap() {
            0 => break,
            n => body.extend_from_slice(&buf[..n]),
        }
    }
    assert_eq!(body, b"hello");
    stream.close_blocking();
}
