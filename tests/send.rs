//! End-to-end dispatcher tests against an in-process HTTP/2 server.
//!
//! The dispatcher is transport-generic, so these tests speak plain HTTP/2
//! over an in-memory duplex pipe: the client side goes through
//! `Connection::handshake` exactly as production connections do after TLS,
//! and the server side is `h2::server` standing in for APNs.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::DuplexStream;
use tokio::sync::oneshot;

use apns_client::{
    ApnResult, ApnsError, Connection, ConnectionInfo, DeviceToken, FatalReason, JsonAps,
    Priority, PushType, TemporaryReason, SILENT_PAYLOAD,
};

fn info(max_concurrent_streams: u32) -> Arc<ConnectionInfo> {
    Arc::new(ConnectionInfo {
        cert_path: None,
        key_path: None,
        ca_path: None,
        hostname: "api.push.apple.com".to_string(),
        topic: "com.example.MyApp".to_string(),
        use_jwt: true,
        max_concurrent_streams,
    })
}

/// What the stand-in server saw for one request.
struct Received {
    parts: http::request::Parts,
    body: Vec<u8>,
}

/// Serve a single request with the given status and body, then keep the
/// connection alive. The captured request is delivered on the returned
/// channel as soon as the response has been sent.
fn spawn_server(
    io: DuplexStream,
    status: u16,
    reply: &'static [u8],
) -> oneshot::Receiver<Received> {
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
        let mut connection = h2::server::handshake(io).await.unwrap();
        let mut tx = Some(tx);
        // Handling must run in its own task so this loop keeps polling
        // `accept`, which is what actually drives the connection's I/O
        // (including delivering the request body's DATA frames).
        while let Some(request) = connection.accept().await {
            let (request, mut respond) = request.unwrap();
            let (parts, mut body) = request.into_parts();
            let tx = tx.take();
            tokio::spawn(async move {
                let mut data = Vec::new();
                while let Some(chunk) = body.data().await {
                    let chunk = chunk.unwrap();
                    let _ = body.flow_control().release_capacity(chunk.len());
                    data.extend_from_slice(&chunk);
                }

                let response = http::Response::builder().status(status).body(()).unwrap();
                let mut send = respond.send_response(response, reply.is_empty()).unwrap();
                if !reply.is_empty() {
                    send.send_data(Bytes::from_static(reply), true).unwrap();
                }
                if let Some(tx) = tx {
                    let _ = tx.send(Received { parts, body: data });
                }
            });
        }
    });
    rx
}

/// Stand up a server answering with the given status/body and a client
/// connection wired to it.
async fn connect(
    max_concurrent_streams: u32,
    status: u16,
    reply: &'static [u8],
) -> (Connection, oneshot::Receiver<Received>) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let received = spawn_server(server_io, status, reply);
    let connection = Connection::handshake(client_io, info(max_concurrent_streams))
        .await
        .unwrap();
    (connection, received)
}

#[tokio::test]
async fn accepted_send_classifies_ok() {
    let (connection, received) = connect(4, 200, b"").await;

    let token = DeviceToken::from_hex("ab01cd23");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(result.is_ok(), "expected Ok, got {result:?}");

    let received = received.await.unwrap();
    assert_eq!(received.parts.method, http::Method::POST);
    assert_eq!(received.parts.uri.path(), "/3/device/ab01cd23");
    assert_eq!(
        received.parts.headers.get("apns-topic").unwrap(),
        "com.example.MyApp"
    );
    assert_eq!(
        received.parts.headers.get("apns-push-type").unwrap(),
        "alert"
    );
    // Alert defaults to immediate delivery.
    assert_eq!(received.parts.headers.get("apns-priority").unwrap(), "10");
    assert!(received.parts.headers.get("authorization").is_none());
    assert_eq!(received.body, b"{}");
}

#[tokio::test]
async fn silent_send_carries_background_headers() {
    let (connection, received) = connect(4, 200, b"").await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Background,
            None,
            Bytes::from_static(SILENT_PAYLOAD),
        )
        .await;
    assert!(result.is_ok());

    let received = received.await.unwrap();
    assert_eq!(
        received.parts.headers.get("apns-push-type").unwrap(),
        "background"
    );
    assert_eq!(received.parts.headers.get("apns-priority").unwrap(), "5");
    assert_eq!(received.body, SILENT_PAYLOAD);
}

#[tokio::test]
async fn widget_send_adjusts_topic_and_omits_priority() {
    let (connection, received) = connect(4, 200, b"").await;

    let token = DeviceToken::from_hex("0011");
    let body = serde_json::to_vec(&JsonAps::widget()).unwrap();
    let result = connection
        .send_raw(&token, None, PushType::Widgets, None, Bytes::from(body))
        .await;
    assert!(result.is_ok());

    let received = received.await.unwrap();
    assert_eq!(
        received.parts.headers.get("apns-topic").unwrap(),
        "com.example.MyApp.push-type.widgets"
    );
    assert_eq!(
        received.parts.headers.get("apns-push-type").unwrap(),
        "widgets"
    );
    assert!(received.parts.headers.get("apns-priority").is_none());

    let envelope: serde_json::Value = serde_json::from_slice(&received.body).unwrap();
    assert_eq!(envelope["aps"]["content-changed"], serde_json::json!(true));
}

#[tokio::test]
async fn explicit_priority_overrides_the_default() {
    let (connection, received) = connect(4, 200, b"").await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            Some(Priority::Low),
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(result.is_ok());

    let received = received.await.unwrap();
    assert_eq!(received.parts.headers.get("apns-priority").unwrap(), "1");
}

#[tokio::test]
async fn bearer_token_is_forwarded() {
    let (connection, received) = connect(4, 200, b"").await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            Some("provider.jwt.token"),
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(result.is_ok());

    let received = received.await.unwrap();
    assert_eq!(
        received.parts.headers.get("authorization").unwrap(),
        "bearer provider.jwt.token"
    );
}

#[tokio::test]
async fn fatal_rejection_decodes_reason() {
    let (connection, _received) = connect(4, 410, br#"{"reason":"Unregistered"}"#).await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    match &result {
        ApnResult::Fatal(reason) => assert_eq!(*reason, FatalReason::Unregistered),
        other => panic!("expected Fatal(Unregistered), got {other:?}"),
    }
    assert!(result.should_remove_device());
    assert!(!result.is_retryable());
}

#[tokio::test]
async fn temporary_rejection_decodes_reason() {
    let (connection, _received) = connect(4, 429, br#"{"reason":"TooManyRequests"}"#).await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    match &result {
        ApnResult::Temporary(reason) => {
            assert_eq!(*reason, TemporaryReason::TooManyRequests);
        }
        other => panic!("expected Temporary, got {other:?}"),
    }
    assert!(result.is_retryable());
}

#[tokio::test]
async fn undecodable_rejection_body_is_a_client_error() {
    let (connection, _received) = connect(4, 400, b"not json").await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(matches!(
        result,
        ApnResult::ClientError(ApnsError::Json(_))
    ));
}

#[tokio::test]
async fn unknown_fatal_reason_is_preserved() {
    let (connection, _received) = connect(4, 403, br#"{"reason":"SomethingNew"}"#).await;

    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    match result {
        ApnResult::Fatal(FatalReason::Other(raw)) => assert_eq!(raw, "SomethingNew"),
        other => panic!("expected Fatal(Other), got {other:?}"),
    }
}

#[tokio::test]
async fn stream_slots_bound_concurrency() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        tokio::spawn(async move {
            let mut server = h2::server::handshake(server_io).await.unwrap();
            while let Some(request) = server.accept().await {
                let (request, mut respond) = request.unwrap();
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                tokio::spawn(async move {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);

                    let (_parts, mut body) = request.into_parts();
                    while let Some(chunk) = body.data().await {
                        let chunk = chunk.unwrap();
                        let _ = body.flow_control().release_capacity(chunk.len());
                    }
                    // Hold the stream open long enough for the client's
                    // other senders to pile up on the semaphore.
                    tokio::time::sleep(Duration::from_millis(30)).await;

                    let response = http::Response::builder().status(200).body(()).unwrap();
                    respond.send_response(response, true).unwrap();
                    active.fetch_sub(1, Ordering::SeqCst);
                });
            }
        });
    }

    let connection = Arc::new(Connection::handshake(client_io, info(2)).await.unwrap());

    let mut senders = Vec::new();
    for _ in 0..6 {
        let connection = Arc::clone(&connection);
        senders.push(tokio::spawn(async move {
            let token = DeviceToken::from_hex("00aa");
            connection
                .send_raw(
                    &token,
                    None,
                    PushType::Alert,
                    None,
                    Bytes::from_static(b"{}"),
                )
                .await
        }));
    }
    for sender in senders {
        let result = sender.await.unwrap();
        assert!(result.is_ok(), "expected Ok, got {result:?}");
    }

    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "more than 2 streams were in flight at once"
    );
}

#[tokio::test]
async fn graceful_shutdown_marks_the_connection_closed() {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    tokio::spawn(async move {
        let mut server = h2::server::handshake(server_io).await.unwrap();
        // Handling must run in its own task so the loop below keeps polling
        // `accept`, which is what actually drives the connection's I/O
        // (including delivering the request body's DATA frames).
        if let Some(request) = server.accept().await {
            let (request, mut respond) = request.unwrap();
            let (_parts, mut body) = request.into_parts();
            tokio::spawn(async move {
                while let Some(chunk) = body.data().await {
                    let chunk = chunk.unwrap();
                    let _ = body.flow_control().release_capacity(chunk.len());
                }
                let response = http::Response::builder().status(200).body(()).unwrap();
                respond.send_response(response, true).unwrap();
            });
        }
        server.graceful_shutdown();
        while let Some(next) = server.accept().await {
            drop(next);
        }
    });

    let connection = Connection::handshake(client_io, info(4)).await.unwrap();
    let token = DeviceToken::from_hex("0011");
    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(result.is_ok());

    // The driver observes the connection winding down and flips the flag.
    let mut closed = false;
    for _ in 0..100 {
        if !connection.is_open() {
            closed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(closed, "connection never reported closed after GOAWAY");

    let result = connection
        .send_raw(
            &token,
            None,
            PushType::Alert,
            None,
            Bytes::from_static(b"{}"),
        )
        .await;
    assert!(matches!(
        result,
        ApnResult::ClientError(ApnsError::ConnectionClosed)
    ));
}
