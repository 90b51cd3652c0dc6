use super::*;
use crate::protocol::{
    LogPage, ReadDirection, ResponseData, ResponseEnvelope, decode_envelope, encode_response,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn read_envelope(stream: &mut TcpStream) -> Option<RequestEnvelope> {
    let mut len_buf = [0u8; 4];
    stream.read_exact(&mut len_buf).await.ok()?;
    let msg_len = u32::from_be_bytes(len_buf) as usize;
    let mut payload = vec![0u8; msg_len];
    stream.read_exact(&mut payload).await.ok()?;
    decode_envelope(&payload).ok()
}

#[tokio::test]
async fn request_id_monotonically_increases() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    let (ids_tx, ids_rx) = oneshot::channel();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut ids = Vec::new();
        for _ in 0..3 {
            let envelope = read_envelope(&mut stream).await.unwrap();
            ids.push(envelope.id);
            let resp = ResponseEnvelope {
                id: envelope.id,
                response: Response::ok_with_message("pong"),
            };
            stream.write_all(&encode_response(&resp).unwrap()).await.unwrap();
        }
        let _ = ids_tx.send(ids);
    });

    let client = Client::connect(&address, TIMEOUT).await.unwrap();
    for _ in 0..3 {
        let response = client.ping(TIMEOUT).await.unwrap();
        assert!(matches!(response, Response::Ok { .. }));
    }

    let ids = ids_rx.await.unwrap();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn read_log_returns_page() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let envelope = read_envelope(&mut stream).await.unwrap();
        let Request::ReadLog(req) = envelope.request else {
            panic!("Expected ReadLog");
        };
        let resp = ResponseEnvelope {
            id: envelope.id,
            response: Response::ok_with_data(ResponseData::Page(LogPage {
                logs: "a\nb\n".into(),
                forward_index: req.forward_index,
                backward_index: req.backward_index - 4,
            })),
        };
        stream.write_all(&encode_response(&resp).unwrap()).await.unwrap();
    });

    let client = Client::connect(&address, TIMEOUT).await.unwrap();
    let response = client
        .read_log(
            ReadRequest {
                file: "/tmp/x.log".into(),
                direction: ReadDirection::Backward,
                bytes: 2400,
                forward_index: 100,
                backward_index: 100,
            },
            TIMEOUT,
        )
        .await
        .unwrap();

    match response {
        Response::Ok {
            data: Some(ResponseData::Page(page)),
            ..
        } => {
            assert_eq!(page.logs, "a\nb\n");
            assert_eq!(page.backward_index, 96);
        }
        other => panic!("Expected page, got {:?}", other),
    }
}

#[tokio::test]
async fn connect_refused_is_connect_error() {
    // Bind then drop to get a port nobody listens on
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    drop(listener);

    match Client::connect(&address, TIMEOUT).await {
        Err(ClientError::Connect { address: a, .. }) => assert_eq!(a, address),
        Err(other) => panic!("Expected Connect error, got {:?}", other),
        Ok(_) => panic!("Expected Connect error, got a client"),
    }
}

#[tokio::test]
async fn silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    // Accept and read, but never answer
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_envelope(&mut stream).await;
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let client = Client::connect(&address, TIMEOUT).await.unwrap();
    let err = client.ping(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_timeout(), "Expected timeout, got {:?}", err);
    assert!(matches!(err, ClientError::RequestTimeout { request: "Ping", .. }));
    assert!(client.pending.is_empty(), "Timed out request must be forgotten");
}

#[tokio::test]
async fn server_disconnect_fails_pending_request() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();

    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let _ = read_envelope(&mut stream).await;
        // Close without replying
        drop(stream);
    });

    let client = Client::connect(&address, TIMEOUT).await.unwrap();
    let err = client.ping(TIMEOUT).await.unwrap_err();
    assert!(matches!(err, ClientError::Disconnected), "got {:?}", err);
}
