//! ゲートウェイ統合テスト
//!
//! 記録用トランスポートとスクリプト化ハンドラーを使い、分類・変換・
//! レスポンス再エンコードを端から端まで検証します。

mod common;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use common::*;
use veil_grpc_web::grpc::framing::encode_data_frame;
use veil_grpc_web::grpc::{CorsConfig, GrpcStatus, GrpcStatusCode, HeaderList, HttpVersion, TrailerSet};
use veil_grpc_web::{ChunkedBody, Gateway, GatewayConfig, GatewayError, Request};

fn gateway(handler: ScriptedHandler) -> Gateway<ScriptedHandler> {
    Gateway::new(handler, GatewayConfig::default()).unwrap()
}

// ====================
// gRPC-Web (binary)
// ====================

#[monoio::test]
async fn test_web_binary_unary_call() {
    let gateway = gateway(ScriptedHandler::new().message(b"pong").trailer("grpc-status", "0"));
    let mut transport = RecordingTransport::new();

    let body = encode_data_frame(&[0xAB, 0xCD]);
    gateway
        .serve(web_request("application/grpc-web+proto", body.clone()), &mut transport)
        .await
        .unwrap();

    // The handler saw a native HTTP/2 request with the body untouched
    let seen = gateway.handler().seen();
    assert_eq!(seen.version, HttpVersion::Http2);
    assert_eq!(seen.headers.get_str(b"content-type"), Some("application/grpc+proto"));
    assert_eq!(seen.headers.get_str(b"x-user-agent"), Some("grpc-web-javascript/0.1"));
    assert_eq!(seen.body, body);
    assert_eq!(&seen.body[..], &[0x00, 0x00, 0x00, 0x00, 0x02, 0xAB, 0xCD]);

    assert_eq!(transport.status, Some(200));
    assert_eq!(transport.header("content-type"), Some("application/grpc-web+proto"));
    assert_eq!(transport.header("grpc-browser-compat"), Some("true"));
    assert_eq!(transport.header("x-handler"), Some("scripted"));
    assert_eq!(transport.header("trailer"), None);
    assert_eq!(transport.header("content-length"), None);
    assert!(transport.native_trailers.is_none());

    let frames = transport.frames();
    assert_eq!(frames.len(), 2);
    assert_eq!(&frames[0].data[..], b"pong");
    let trailers = frames[1].parse_trailers().unwrap();
    assert_eq!(trailers.get("grpc-status"), Some("0"));
}

#[monoio::test]
async fn test_messages_precede_single_trailer_frame() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"one")
            .message(b"two")
            .message(b"three")
            .trailer("grpc-status", "0")
            .trailer("x-cost", "3"),
    );
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"req")), &mut transport)
        .await
        .unwrap();

    let frames = transport.frames();
    let payloads: Vec<&[u8]> = frames.iter().map(|f| &f.data[..]).collect();
    assert_eq!(&payloads[..3], &[&b"one"[..], b"two", b"three"]);
    assert!(frames[..3].iter().all(|f| f.is_data()));
    assert!(frames[3].is_trailer());
    assert_eq!(frames.len(), 4);

    // Head first, close last, never native trailers
    assert_eq!(transport.events.first(), Some(&Event::Head(200)));
    assert_eq!(transport.events.last(), Some(&Event::Close));
    assert!(!transport.events.contains(&Event::Trailers));
    assert_eq!(transport.body_writes(), 4);
}

#[monoio::test]
async fn test_error_status_only_response() {
    let message = GrpcStatus::error(GrpcStatusCode::NotFound, "no such user: 100%")
        .encoded_message()
        .unwrap();
    let gateway = gateway(
        ScriptedHandler::new()
            .trailer("grpc-status", "5")
            .trailer("grpc-message", &message),
    );
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web+proto", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap();

    // A failed RPC is still a 200 with a trailer frame
    assert_eq!(transport.status, Some(200));
    let frames = transport.frames();
    assert_eq!(frames.len(), 1);

    let status = frames[0].parse_trailers().unwrap().status().unwrap();
    assert_eq!(status.code, GrpcStatusCode::NotFound);
    assert_eq!(status.message.as_deref(), Some("no such user: 100%"));
}

#[monoio::test]
async fn test_multi_value_trailers_round_trip() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"x")
            .trailer("grpc-status", "0")
            .trailer("X-Tag", "a")
            .trailer("x-tag", "b"),
    );
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap();

    let frames = transport.frames();
    let trailer_frame = frames.last().unwrap();
    let text = std::str::from_utf8(&trailer_frame.data).unwrap();
    assert_eq!(text, "grpc-status: 0\r\nx-tag: a\r\nx-tag: b\r\n");

    let parsed = TrailerSet::parse(&trailer_frame.data).unwrap();
    assert_eq!(parsed.get_all("x-tag"), &["a".to_string(), "b".to_string()]);
}

#[monoio::test]
async fn test_trailer_values_cannot_inject_entries() {
    let gateway = gateway(
        ScriptedHandler::new()
            .trailer("grpc-status", "5")
            .trailer("x-user", "bob\r\ngrpc-status: 0")
            .trailer("x-bad:key", "1")
            .trailer("x-note", "  padded "),
    );
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap();

    let frames = transport.frames();
    assert_eq!(frames.len(), 1);
    assert_eq!(std::str::from_utf8(&frames[0].data).unwrap(), "grpc-status: 5\r\nx-note: padded\r\n");

    let parsed = frames[0].parse_trailers().unwrap();
    assert_eq!(parsed.get_all("grpc-status"), &["5".to_string()]);
    assert!(parsed.get("x-user").is_none());
    assert_eq!(parsed.status().unwrap().code, GrpcStatusCode::NotFound);
}

#[monoio::test]
async fn test_gateway_finishes_once_when_handler_already_did() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"m")
            .trailer("grpc-status", "0")
            .finishing(),
    );
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap();

    let frames = transport.frames();
    assert_eq!(frames.iter().filter(|f| f.is_trailer()).count(), 1);
    assert_eq!(transport.events.iter().filter(|e| **e == Event::Close).count(), 1);
}

// ====================
// gRPC-Web (text)
// ====================

#[monoio::test]
async fn test_web_text_request_and_response() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"first")
            .message(b"second")
            .trailer("grpc-status", "0"),
    );
    let mut transport = RecordingTransport::new();

    let frame = encode_data_frame(&[0xAB, 0xCD]);
    let encoded = STANDARD.encode(&frame);
    // Split the base64 body mid-quantum
    let body = ChunkedBody::new(vec![
        Bytes::copy_from_slice(&encoded.as_bytes()[..3]),
        Bytes::copy_from_slice(&encoded.as_bytes()[3..]),
    ]);
    let request = request(Some("application/grpc-web-text+proto"), HttpVersion::Http11, body);

    gateway.serve(request, &mut transport).await.unwrap();

    let seen = gateway.handler().seen();
    assert_eq!(seen.body, frame);
    assert_eq!(seen.headers.get_str(b"content-type"), Some("application/grpc+proto"));

    assert_eq!(transport.header("content-type"), Some("application/grpc-web-text+proto"));
    assert_eq!(transport.body.len() % 4, 0);
    assert!(transport.body.iter().all(|b| b.is_ascii()));

    let frames = transport.text_frames();
    assert_eq!(frames.len(), 3);
    assert_eq!(&frames[0].data[..], b"first");
    assert_eq!(&frames[1].data[..], b"second");
    assert!(frames[2].is_trailer());
}

#[monoio::test]
async fn test_text_writes_are_whole_base64_quanta() {
    for len in [0usize, 1, 2, 3, 4, 5, 100, 3071, 3072, 3073, 10_000] {
        let payload: &'static [u8] = Box::leak(vec![0x5Au8; len].into_boxed_slice());
        let gateway = gateway(ScriptedHandler::new().message(payload).trailer("grpc-status", "0"));
        let mut transport = RecordingTransport::new();

        gateway
            .serve(web_request("application/grpc-web-text", encode_data_frame(b"")), &mut transport)
            .await
            .unwrap();

        for event in &transport.events {
            if let Event::Body(n) = event {
                assert_eq!(n % 4, 0, "payload {} produced a partial quantum", len);
            }
        }
        let frames = transport.text_frames();
        assert_eq!(frames[0].data.len(), len);
    }
}

// ====================
// ネイティブ gRPC
// ====================

#[monoio::test]
async fn test_native_request_passes_through() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"native")
            .trailer("grpc-status", "0"),
    );
    let mut transport = RecordingTransport::new();

    let body = encode_data_frame(b"hello");
    let request = request(Some("application/grpc"), HttpVersion::Http2, ChunkedBody::full(body.clone()));
    gateway.serve(request, &mut transport).await.unwrap();

    let seen = gateway.handler().seen();
    assert_eq!(seen.headers.get_str(b"content-type"), Some("application/grpc"));
    assert_eq!(seen.body, body);

    assert_eq!(transport.header("content-type"), Some("application/grpc+proto"));
    assert_eq!(transport.header("trailer"), Some("grpc-status, grpc-message"));
    assert_eq!(transport.header("grpc-browser-compat"), None);

    // Body carries data frames only; status goes in real trailers
    let frames = transport.frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_data());
    let trailers = transport.native_trailers.as_ref().unwrap();
    assert_eq!(trailers.get("grpc-status"), Some("0"));
    assert_eq!(transport.events.last(), Some(&Event::Close));
}

#[monoio::test]
async fn test_http2_with_odd_content_type_is_native() {
    let gateway = gateway(ScriptedHandler::new().trailer("grpc-status", "0"));
    let mut transport = RecordingTransport::new();

    let request = request(Some("application/json"), HttpVersion::Http2, ChunkedBody::empty());
    gateway.serve(request, &mut transport).await.unwrap();

    assert_eq!(gateway.handler().calls.get(), 1);
    assert!(transport.native_trailers.is_some());
}

// ====================
// 拒否
// ====================

async fn assert_rejected(request: Request<ChunkedBody>, config: GatewayConfig, status: u16) -> GatewayError {
    let gateway = Gateway::new(ScriptedHandler::new().trailer("grpc-status", "0"), config).unwrap();
    let mut transport = RecordingTransport::new();

    let err = gateway.serve(request, &mut transport).await.unwrap_err();

    assert_eq!(gateway.handler().calls.get(), 0, "handler must not run");
    assert_eq!(transport.status, Some(status));
    assert_eq!(transport.header("content-length"), Some("0"));
    assert!(transport.body.is_empty());
    assert!(transport.is_closed());
    err
}

#[monoio::test]
async fn test_plain_http1_request_is_unsupported() {
    let err = assert_rejected(
        request(Some("text/plain"), HttpVersion::Http11, ChunkedBody::empty()),
        GatewayConfig::default(),
        415,
    )
    .await;
    assert!(matches!(err, GatewayError::UnsupportedProtocol { .. }));

    // Native gRPC over HTTP/1.1 and a missing content-type are rejected too
    assert_rejected(
        request(Some("application/grpc"), HttpVersion::Http11, ChunkedBody::empty()),
        GatewayConfig::default(),
        415,
    )
    .await;
    assert_rejected(request(None, HttpVersion::Http10, ChunkedBody::empty()), GatewayConfig::default(), 415).await;
}

#[monoio::test]
async fn test_bad_base64_is_rejected() {
    let err = assert_rejected(
        web_request("application/grpc-web-text", "AAAA*AAA"),
        GatewayConfig::default(),
        400,
    )
    .await;
    assert!(matches!(err, GatewayError::Decode(_)));
}

#[monoio::test]
async fn test_truncated_frame_is_rejected() {
    let frame = encode_data_frame(b"hello");
    let err = assert_rejected(
        web_request("application/grpc-web", frame.slice(..frame.len() - 2)),
        GatewayConfig::default(),
        400,
    )
    .await;
    assert!(matches!(err, GatewayError::Framing(_)));
}

#[monoio::test]
async fn test_oversize_frame_is_rejected() {
    let config = GatewayConfig {
        max_message_size: 16,
        ..GatewayConfig::default()
    };
    let err = assert_rejected(
        web_request("application/grpc-web", encode_data_frame(&[0u8; 17])),
        config,
        413,
    )
    .await;
    assert!(matches!(err, GatewayError::Integrity(_)));
}

// ====================
// キャンセル・トランスポート障害
// ====================

#[monoio::test]
async fn test_cancel_mid_stream_suppresses_trailers() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"a")
            .message(b"b")
            .message(b"c")
            .trailer("grpc-status", "0")
            .cancelling_after(1),
    );
    let mut transport = RecordingTransport::new();

    let err = gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));

    let frames = transport.frames();
    assert_eq!(frames.len(), 1);
    assert!(frames[0].is_data());
    assert!(!transport.is_closed());
    assert_eq!(gateway.handler().send_errors.borrow().len(), 2);
}

#[monoio::test]
async fn test_cancel_after_handler_finished_writing() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"a")
            .trailer("grpc-status", "0")
            .cancelling_after(1)
            .finishing(),
    );
    let mut transport = RecordingTransport::new();

    let err = gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert!(transport.frames().iter().all(|f| f.is_data()));
}

#[monoio::test]
async fn test_broken_transport_cancels_handler_writes() {
    let gateway = gateway(
        ScriptedHandler::new()
            .message(b"a")
            .message(b"b")
            .message(b"c")
            .trailer("grpc-status", "0"),
    );
    let mut transport = RecordingTransport::failing_after(1);

    let err = gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));

    let errors = gateway.handler().send_errors.borrow();
    assert_eq!(errors.len(), 2);
    assert_eq!(transport.body_writes(), 1);
}

// ====================
// 設定・CORS
// ====================

#[monoio::test]
async fn test_custom_compat_header() {
    let config = GatewayConfig {
        compat_header: "X-Web-Compat".to_string(),
        ..GatewayConfig::default()
    };
    let gateway = Gateway::new(ScriptedHandler::new().trailer("grpc-status", "0"), config).unwrap();
    let mut transport = RecordingTransport::new();

    gateway
        .serve(web_request("application/grpc-web", encode_data_frame(b"")), &mut transport)
        .await
        .unwrap();

    assert_eq!(transport.header("x-web-compat"), Some("true"));
    assert_eq!(transport.header("grpc-browser-compat"), None);
}

#[test]
fn test_gateway_refuses_bad_text_chunk_size() {
    for size in [0, 1000] {
        let config = GatewayConfig {
            text_chunk_size: size,
            ..GatewayConfig::default()
        };
        let err = Gateway::new(ScriptedHandler::new(), config)
            .err()
            .expect("chunk size must be rejected");
        assert!(err.to_string().contains("text_chunk_size"), "{}", err);
    }

    let config = GatewayConfig {
        text_chunk_size: 6,
        ..GatewayConfig::default()
    };
    assert!(Gateway::new(ScriptedHandler::new(), config).is_ok());
}

fn cors_config() -> GatewayConfig {
    GatewayConfig {
        cors: Some(CorsConfig::with_origins(vec!["https://app.example.com".to_string()])),
        ..GatewayConfig::default()
    }
}

#[monoio::test]
async fn test_cors_preflight() {
    let gateway = Gateway::new(ScriptedHandler::new(), cors_config()).unwrap();
    let mut transport = RecordingTransport::new();

    let headers: HeaderList = [
        ("origin", "https://app.example.com"),
        ("access-control-request-method", "POST"),
        ("access-control-request-headers", "content-type,x-grpc-web"),
    ]
    .into_iter()
    .collect();
    let request = Request::new("OPTIONS", "/veil.Echo/Unary", HttpVersion::Http11, headers, ChunkedBody::empty());

    gateway.serve(request, &mut transport).await.unwrap();

    assert_eq!(gateway.handler().calls.get(), 0);
    assert_eq!(transport.status, Some(204));
    assert_eq!(transport.header("access-control-allow-origin"), Some("https://app.example.com"));
    assert!(transport.header("access-control-allow-methods").unwrap().contains("POST"));
    assert!(transport.is_closed());
}

#[monoio::test]
async fn test_cors_headers_on_web_response() {
    let gateway = Gateway::new(ScriptedHandler::new().trailer("grpc-status", "0"), cors_config()).unwrap();

    let mut allowed = RecordingTransport::new();
    let mut request = web_request("application/grpc-web", encode_data_frame(b""));
    request.headers.append("origin", "https://app.example.com");
    gateway.serve(request, &mut allowed).await.unwrap();
    assert_eq!(allowed.header("access-control-allow-origin"), Some("https://app.example.com"));

    let mut denied = RecordingTransport::new();
    let mut request = web_request("application/grpc-web", encode_data_frame(b""));
    request.headers.append("origin", "https://evil.example");
    gateway.serve(request, &mut denied).await.unwrap();
    assert_eq!(denied.header("access-control-allow-origin"), None);
}
