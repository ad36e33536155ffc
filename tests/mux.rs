//! End-to-end tests: a client-role and a server-role session talking over
//! an in-memory duplex pipe (and TCP, for the connect path).

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;

use h2mux::client;
use h2mux::server;
use h2mux::Config;
use h2mux::ErrorCode;
use h2mux::Header;
use h2mux::Headers;
use h2mux::IncomingStream;
use h2mux::RespondOptions;
use h2mux::Session;
use h2mux::SessionEvent;
use h2mux::SessionEvents;
use h2mux::SettingsUpdate;
use h2mux::ShutdownOptions;
use h2mux::StreamEvent;
use h2mux::StreamEvents;
use h2mux::StreamOptions;

fn init_logger() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        drop(env_logger::builder().is_test(true).try_init());
    });
}

fn session_pair(
    client_conf: Config,
    server_conf: Config,
) -> ((Session, SessionEvents), (Session, SessionEvents)) {
    let (client_io, server_io) = tokio::io::duplex(1 << 20);
    let client = client::handshake(client_io, "http://localhost", client_conf).expect("client");
    let server = server::handshake(server_io, server_conf).expect("server");
    (client, server)
}

async fn next_incoming(events: &mut SessionEvents) -> IncomingStream {
    loop {
        match events.recv().await {
            Some(SessionEvent::Stream(incoming)) => return incoming,
            Some(..) => continue,
            None => panic!("session events ended before a stream arrived"),
        }
    }
}

async fn expect_closed_clean(events: &mut StreamEvents) {
    loop {
        match events.recv().await {
            Some(StreamEvent::Closed(code)) => {
                assert_eq!(ErrorCode::NoError, code);
                return;
            }
            Some(StreamEvent::Error(e)) => panic!("unexpected stream error: {}", e),
            Some(..) => continue,
            None => panic!("stream events ended without Closed"),
        }
    }
}

#[tokio::test]
async fn get_roundtrip() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, mut stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");

    let incoming = next_incoming(&mut server_events).await;
    assert_eq!(Some("GET"), incoming.headers.method());
    assert_eq!(Some("/"), incoming.headers.path());
    assert_eq!(Some("http"), incoming.headers.scheme());
    assert!(incoming.end_stream);

    let mut response = Headers::new();
    response.add(":status", "200");
    incoming
        .stream
        .respond(response, RespondOptions::default())
        .expect("respond");
    incoming
        .stream
        .send_data(Bytes::from_static(b"hello"), true)
        .expect("send_data");

    // the client observes exactly: ready, response headers, one data
    // chunk with end-of-stream, then a clean close
    match stream_events.recv().await {
        Some(StreamEvent::Ready(stream_id)) => assert_eq!(1, stream_id),
        other => panic!("expected Ready, got {:?}", other),
    }
    match stream_events.recv().await {
        Some(StreamEvent::Headers {
            headers,
            end_stream,
        }) => {
            assert_eq!(Ok(200), headers.status().map_err(|e| e.to_string()));
            assert!(!end_stream);
        }
        other => panic!("expected Headers, got {:?}", other),
    }
    match stream_events.recv().await {
        Some(StreamEvent::Data { data, end_stream }) => {
            assert_eq!(&b"hello"[..], &data[..]);
            assert!(end_stream);
        }
        other => panic!("expected Data, got {:?}", other),
    }
    match stream_events.recv().await {
        Some(StreamEvent::Closed(code)) => assert_eq!(ErrorCode::NoError, code),
        other => panic!("expected Closed, got {:?}", other),
    }
}

#[tokio::test]
async fn stream_ids_are_monotonic_odd() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let mut expected_id = 1;
    for _ in 0..3 {
        let (stream, mut events) = client
            .open_stream(Headers::new(), StreamOptions::default())
            .expect("open");
        match events.recv().await {
            Some(StreamEvent::Ready(stream_id)) => {
                assert_eq!(expected_id, stream_id);
                assert_eq!(Some(stream_id), stream.id());
            }
            other => panic!("expected Ready, got {:?}", other),
        }
        let incoming = next_incoming(&mut server_events).await;
        incoming.stream.end().expect("end");
        expected_id += 2;
    }
}

#[tokio::test]
async fn request_body_flows_with_window_updates() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    // larger than the default 64 KiB window: progress requires
    // WINDOW_UPDATE exchange
    let body_len = 200_000;
    let body = Bytes::from(vec![0x42u8; body_len]);

    let options = StreamOptions {
        end_stream: Some(false),
        ..Default::default()
    };
    let mut headers = Headers::new();
    headers.add(":method", "POST");
    let (stream, _stream_events) = client.open_stream(headers, options).expect("open");
    stream.send_data(body, true).expect("send_data");

    let mut incoming = next_incoming(&mut server_events).await;
    assert!(!incoming.end_stream);

    let mut received = 0usize;
    loop {
        match incoming.events.recv().await {
            Some(StreamEvent::Data { data, end_stream }) => {
                assert!(data.iter().all(|&b| b == 0x42));
                received += data.len();
                if end_stream {
                    break;
                }
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }
    assert_eq!(body_len, received);

    incoming.stream.end().expect("end");
}

#[tokio::test]
async fn deferred_writes_replay_in_order_over_tcp() {
    init_logger();
    let listener = server::Server::bind("127.0.0.1:0", Default::default())
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();

    // the session handle is usable before the socket is even connected;
    // everything queued now must hit the wire in issue order
    let (client, _client_events) =
        client::connect(&format!("http://127.0.0.1:{}", port), Default::default())
            .expect("connect");
    let options = StreamOptions {
        end_stream: Some(false),
        ..Default::default()
    };
    let mut headers = Headers::new();
    headers.add(":method", "POST");
    let (stream, _stream_events) = client.open_stream(headers, options).expect("open");
    for chunk in &[&b"one"[..], &b"two"[..], &b"three"[..]] {
        stream
            .send_data(Bytes::from_static(chunk), false)
            .expect("send_data");
    }
    stream.end().expect("end");

    let (_server_session, mut server_events) = listener.accept().await.expect("accept");
    let mut incoming = next_incoming(&mut server_events).await;

    let mut received = Vec::new();
    loop {
        match incoming.events.recv().await {
            Some(StreamEvent::Data { data, end_stream }) => {
                received.extend_from_slice(&data);
                if end_stream {
                    break;
                }
            }
            other => panic!("expected Data, got {:?}", other),
        }
    }
    assert_eq!(&b"onetwothree"[..], &received[..]);

    incoming.stream.end().expect("end");
}

#[tokio::test]
async fn connect_requires_authority_synchronously() {
    init_logger();
    let ((client, _client_events), _server) =
        session_pair(Default::default(), Default::default());

    let headers = Headers::from_vec(vec![Header::new(":method", "CONNECT")]);
    match client.open_stream(headers, StreamOptions::default()) {
        Err(h2mux::Error::ConnectAuthorityMissing) => {}
        other => panic!("expected ConnectAuthorityMissing, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn settings_range_validated_synchronously() {
    init_logger();
    let ((client, _client_events), _server) =
        session_pair(Default::default(), Default::default());

    let update = SettingsUpdate {
        max_concurrent_streams: Some(1 << 31),
        ..Default::default()
    };
    match client.update_settings(update) {
        Err(h2mux::Error::SettingOutOfRange { name, .. }) => {
            assert_eq!("max_concurrent_streams", name);
        }
        other => panic!("expected range error, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn settings_ack_updates_local_settings() {
    init_logger();
    let ((client, mut client_events), _server) =
        session_pair(Default::default(), Default::default());

    client
        .update_settings(SettingsUpdate {
            initial_window_size: Some(100_000),
            ..Default::default()
        })
        .expect("update_settings");

    loop {
        match client_events.recv().await {
            Some(SessionEvent::LocalSettingsAcked(settings)) => {
                if settings.initial_window_size == 100_000 {
                    break;
                }
            }
            Some(..) => continue,
            None => panic!("session closed before settings ack"),
        }
    }
    assert_eq!(100_000, client.local_settings().initial_window_size);
    assert!(!client.pending_settings_ack());
}

#[tokio::test]
async fn too_many_pending_settings() {
    init_logger();
    // never accepted, so the initial SETTINGS is never acknowledged
    let listener = server::Server::bind("127.0.0.1:0", Default::default())
        .await
        .expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let conf = Config {
        max_pending_ack: 1,
        ..Default::default()
    };
    let (client, _client_events) =
        client::connect(&format!("http://127.0.0.1:{}", port), conf).expect("connect");

    match client.update_settings(SettingsUpdate::default()) {
        Err(h2mux::Error::TooManyPendingSettings(1)) => {}
        other => panic!("expected TooManyPendingSettings, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn single_final_header_block() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, _stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    // informational blocks (1xx, except 101) may repeat before the final
    // block
    let mut info = Headers::new();
    info.add(":status", "100");
    incoming.stream.send_informational(info.clone()).expect("100");
    incoming.stream.send_informational(info).expect("100 again");

    let mut teapot = Headers::new();
    teapot.add(":status", "101");
    match incoming.stream.send_informational(teapot) {
        Err(h2mux::Error::Status101NotAllowed) => {}
        other => panic!("expected Status101NotAllowed, got {:?}", other.err()),
    }

    let mut response = Headers::new();
    response.add(":status", "200");
    incoming
        .stream
        .respond(response.clone(), RespondOptions::default())
        .expect("respond");

    match incoming.stream.respond(response, RespondOptions::default()) {
        Err(h2mux::Error::HeadersAlreadySent) => {}
        other => panic!("expected HeadersAlreadySent, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn informational_blocks_precede_response() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, mut stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    let mut info = Headers::new();
    info.add(":status", "100");
    incoming.stream.send_informational(info).expect("100");

    let mut response = Headers::new();
    response.add(":status", "204");
    incoming
        .stream
        .respond(response, RespondOptions::default())
        .expect("respond");

    loop {
        match stream_events.recv().await {
            Some(StreamEvent::Headers { headers, .. }) => {
                assert_eq!(100, headers.status().expect("status"));
                break;
            }
            Some(StreamEvent::Ready(..)) => continue,
            other => panic!("expected informational headers, got {:?}", other),
        }
    }
    match stream_events.recv().await {
        Some(StreamEvent::Headers {
            headers,
            end_stream,
        }) => {
            assert_eq!(204, headers.status().expect("status"));
            // 204 must not carry a payload: end of stream is forced
            assert!(end_stream);
        }
        other => panic!("expected final headers, got {:?}", other),
    }
    expect_closed_clean(&mut stream_events).await;
}

#[tokio::test]
async fn trailers_follow_data() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, mut stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    let mut response = Headers::new();
    response.add(":status", "200");
    incoming
        .stream
        .respond(
            response,
            RespondOptions {
                end_stream: false,
                get_trailers: Some(Box::new(|| {
                    let mut trailers = Headers::new();
                    trailers.add("grpc-status", "0");
                    trailers
                })),
            },
        )
        .expect("respond");
    incoming
        .stream
        .send_data(Bytes::from_static(b"payload"), true)
        .expect("send_data");

    let mut saw_data = false;
    loop {
        match stream_events.recv().await {
            Some(StreamEvent::Ready(..)) | Some(StreamEvent::Headers { .. }) => continue,
            Some(StreamEvent::Data { data, end_stream }) => {
                assert_eq!(&b"payload"[..], &data[..]);
                assert!(!end_stream);
                saw_data = true;
            }
            Some(StreamEvent::Trailers(trailers)) => {
                assert!(saw_data);
                assert_eq!(Some(&b"0"[..]), trailers.get("grpc-status"));
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
    expect_closed_clean(&mut stream_events).await;
}

#[tokio::test]
async fn peer_reset_without_pending_writes_is_not_an_error() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let options = StreamOptions {
        end_stream: Some(false),
        ..Default::default()
    };
    let mut headers = Headers::new();
    headers.add(":method", "POST");
    let (stream, mut stream_events) = client.open_stream(headers, options).expect("open");

    let incoming = next_incoming(&mut server_events).await;
    incoming.stream.rst_stream(ErrorCode::Cancel).expect("rst");

    loop {
        match stream_events.recv().await {
            Some(StreamEvent::Ready(..)) => continue,
            Some(StreamEvent::Reset(code)) => {
                assert_eq!(ErrorCode::Cancel, code);
                break;
            }
            other => panic!("expected Reset, got {:?}", other),
        }
    }
    match stream_events.recv().await {
        Some(StreamEvent::Closed(code)) => assert_eq!(ErrorCode::Cancel, code),
        other => panic!("expected Closed, got {:?}", other),
    }
    assert_eq!(Some(ErrorCode::Cancel), stream.rst_code());
}

#[tokio::test]
async fn rst_stream_is_idempotent() {
    init_logger();
    let ((client, _client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let options = StreamOptions {
        end_stream: Some(false),
        ..Default::default()
    };
    let mut headers = Headers::new();
    headers.add(":method", "POST");
    let (stream, mut stream_events) = client.open_stream(headers, options).expect("open");
    let _incoming = next_incoming(&mut server_events).await;

    stream.rst_stream(ErrorCode::Cancel).expect("rst");
    // second call proceeds straight to destruction, no second frame
    drop(stream.rst_stream(ErrorCode::InternalError));

    let mut closed = 0;
    loop {
        match stream_events.recv().await {
            Some(StreamEvent::Closed(code)) => {
                // first reset wins
                assert_eq!(ErrorCode::Cancel, code);
                closed += 1;
            }
            Some(..) => continue,
            None => break,
        }
    }
    assert_eq!(1, closed);
}

#[tokio::test]
async fn destroy_emits_exactly_one_closed() {
    init_logger();
    let ((client, mut client_events), _server) =
        session_pair(Default::default(), Default::default());

    client.destroy();
    client.destroy();
    client.destroy();

    let mut closed = 0;
    while let Some(event) = client_events.recv().await {
        if let SessionEvent::Closed = event {
            closed += 1;
        }
    }
    assert_eq!(1, closed);
    assert!(client.is_destroyed());
    assert!(matches!(
        client.open_stream(Headers::new(), StreamOptions::default()),
        Err(h2mux::Error::InvalidSession)
    ));
}

#[tokio::test]
async fn graceful_shutdown_drains_in_flight_stream() {
    init_logger();
    let ((client, mut client_events), (server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, mut stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    server
        .shutdown(ShutdownOptions {
            graceful: true,
            ..Default::default()
        })
        .expect("shutdown");

    // the in-flight response still goes through
    let mut response = Headers::new();
    response.add(":status", "200");
    incoming
        .stream
        .respond(
            response,
            RespondOptions {
                end_stream: true,
                get_trailers: None,
            },
        )
        .expect("respond");

    let mut saw_goaway = false;
    let mut saw_closed = false;
    while let Some(event) = client_events.recv().await {
        match event {
            SessionEvent::GoawayReceived { raw_error_code, .. } => {
                assert_eq!(0, raw_error_code);
                saw_goaway = true;
            }
            SessionEvent::Closed => {
                saw_closed = true;
                break;
            }
            _ => {}
        }
    }
    assert!(saw_goaway);
    assert!(saw_closed);

    loop {
        match stream_events.recv().await {
            Some(StreamEvent::Headers { headers, .. }) => {
                assert_eq!(200, headers.status().expect("status"));
                break;
            }
            Some(StreamEvent::Ready(..)) => continue,
            other => panic!("expected response headers, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn ping_is_acknowledged() {
    init_logger();
    let ((client, mut client_events), _server) =
        session_pair(Default::default(), Default::default());

    let opaque_data = client.ping().expect("ping");
    loop {
        match client_events.recv().await {
            Some(SessionEvent::PingAcked(acked)) => {
                assert_eq!(opaque_data, acked);
                break;
            }
            Some(..) => continue,
            None => panic!("session closed before ping ack"),
        }
    }
}

#[tokio::test]
async fn server_push_reaches_client() {
    init_logger();
    let ((client, mut client_events), (_server, mut server_events)) =
        session_pair(Default::default(), Default::default());

    let (_stream, mut stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    let mut push_headers = Headers::new();
    push_headers.add(":path", "/style.css");
    push_headers.add(":scheme", "http");
    push_headers.add(":authority", "localhost");
    let (push_stream, _push_events) = incoming.stream.push(push_headers).expect("push");

    let mut css = Headers::new();
    css.add(":status", "200");
    push_stream
        .respond(css, RespondOptions::default())
        .expect("respond on push");
    push_stream
        .send_data(Bytes::from_static(b"body{}"), true)
        .expect("push data");

    let mut response = Headers::new();
    response.add(":status", "200");
    incoming
        .stream
        .respond(
            response,
            RespondOptions {
                end_stream: true,
                get_trailers: None,
            },
        )
        .expect("respond");

    // the promise arrives as an incoming stream on the client session
    let promised = next_incoming(&mut client_events).await;
    assert_eq!(Some("/style.css"), promised.headers.path());
    assert!(promised.end_stream);

    let mut promised_events = promised.events;
    let mut body = Vec::new();
    loop {
        match promised_events.recv().await {
            Some(StreamEvent::Headers { headers, .. }) => {
                assert_eq!(200, headers.status().expect("status"));
            }
            Some(StreamEvent::Data { data, end_stream }) => {
                body.extend_from_slice(&data);
                if end_stream {
                    break;
                }
            }
            other => panic!("unexpected event on pushed stream: {:?}", other),
        }
    }
    assert_eq!(&b"body{}"[..], &body[..]);

    expect_closed_clean(&mut stream_events).await;
}

#[tokio::test]
async fn push_disabled_by_peer_fails_synchronously() {
    init_logger();
    let client_conf = Config {
        settings: SettingsUpdate {
            enable_push: Some(false),
            ..Default::default()
        },
        ..Default::default()
    };
    let ((client, _client_events), (server, mut server_events)) =
        session_pair(client_conf, Default::default());

    let (_stream, _stream_events) = client
        .open_stream(Headers::new(), StreamOptions::default())
        .expect("open");
    let incoming = next_incoming(&mut server_events).await;

    // wait until the client's settings reached the server
    while server.remote_settings().enable_push {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    match incoming.stream.push(Headers::new()) {
        Err(h2mux::Error::PushDisabled) => {}
        other => panic!("expected PushDisabled, got {:?}", other.err()),
    }
}

#[tokio::test]
async fn session_idle_timeout_emits_event() {
    init_logger();
    let client_conf = Config {
        session_timeout: Some(Duration::from_millis(100)),
        ..Default::default()
    };
    let ((_client, mut client_events), _server) =
        session_pair(client_conf, Default::default());

    loop {
        match client_events.recv().await {
            Some(SessionEvent::Timeout) => break,
            Some(..) => continue,
            None => panic!("session closed before timeout"),
        }
    }
}

#[tokio::test]
async fn state_snapshot_reports_windows() {
    init_logger();
    let ((client, _client_events), _server) =
        session_pair(Default::default(), Default::default());

    let snapshot = client.state().await.expect("state");
    assert_eq!(h2mux::ShutdownState::Active, snapshot.shutdown);
    assert_eq!(65_535, snapshot.out_window_size);
    assert!(snapshot.streams.is_empty());
}
