//! テスト共通ユーティリティ
//!
//! - 送信内容をすべて記録するトランスポート
//! - 受け取ったリクエストを記録し、決められた応答を返すハンドラー

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::io;

use bytes::Bytes;
use veil_grpc_web::gateway::request::collect_body;
use veil_grpc_web::grpc::framing::{decode_frame, Frame, GRPC_MAX_MESSAGE_SIZE};
use veil_grpc_web::grpc::text::decode_text;
use veil_grpc_web::grpc::{HeaderList, HttpVersion, TrailerSet};
use veil_grpc_web::{BodyStream, ChunkedBody, Request, ResponseSink, RpcHandler, Transport};

// ====================
// 記録用トランスポート
// ====================

/// One observed transport call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Head(u16),
    Body(usize),
    Trailers,
    Close,
}

#[derive(Debug, Default)]
pub struct RecordingTransport {
    pub events: Vec<Event>,
    pub status: Option<u16>,
    pub headers: HeaderList,
    pub body: Vec<u8>,
    pub native_trailers: Option<TrailerSet>,
    /// Fail every body write after this many succeeded
    pub fail_after: Option<usize>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_after(writes: usize) -> Self {
        Self {
            fail_after: Some(writes),
            ..Self::default()
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get_str(name.as_bytes())
    }

    pub fn body_writes(&self) -> usize {
        self.events.iter().filter(|e| matches!(e, Event::Body(_))).count()
    }

    pub fn is_closed(&self) -> bool {
        self.events.contains(&Event::Close)
    }

    /// Split a binary body into frames; panics on leftover bytes
    pub fn frames(&self) -> Vec<Frame> {
        split_frames(&self.body)
    }

    /// Decode a text body and split it into frames
    pub fn text_frames(&self) -> Vec<Frame> {
        let binary = decode_text(&self.body).expect("response body is valid base64");
        split_frames(&binary)
    }
}

pub fn split_frames(mut data: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    while !data.is_empty() {
        let (frame, used) = decode_frame(data, GRPC_MAX_MESSAGE_SIZE).expect("complete frame");
        frames.push(frame);
        data = &data[used..];
    }
    frames
}

impl Transport for RecordingTransport {
    async fn send_head(&mut self, status: u16, headers: &HeaderList) -> io::Result<()> {
        assert!(self.status.is_none(), "head sent twice");
        self.events.push(Event::Head(status));
        self.status = Some(status);
        self.headers = headers.clone();
        Ok(())
    }

    async fn send_body(&mut self, data: Bytes) -> io::Result<()> {
        assert!(!self.is_closed(), "write after close");
        if let Some(limit) = self.fail_after {
            if self.body_writes() >= limit {
                return Err(io::ErrorKind::BrokenPipe.into());
            }
        }
        self.events.push(Event::Body(data.len()));
        self.body.extend_from_slice(&data);
        Ok(())
    }

    async fn send_trailers(&mut self, trailers: &TrailerSet) -> io::Result<()> {
        self.events.push(Event::Trailers);
        self.native_trailers = Some(trailers.clone());
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        self.events.push(Event::Close);
        Ok(())
    }
}

// ====================
// スクリプト化ハンドラー
// ====================

/// What the handler observed about its request
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub version: HttpVersion,
    pub path: String,
    pub headers: HeaderList,
    pub body: Bytes,
}

/// Sends fixed messages and trailers, recording the request it got
#[derive(Debug, Default)]
pub struct ScriptedHandler {
    pub messages: Vec<Bytes>,
    pub trailers: Vec<(String, String)>,
    /// Call `finish` itself instead of leaving it to the gateway
    pub finishes: bool,
    /// Trip the request's cancel token after this many messages
    pub cancel_after: Option<usize>,
    pub calls: Cell<usize>,
    pub seen: RefCell<Option<SeenRequest>>,
    pub send_errors: RefCell<Vec<String>>,
}

impl ScriptedHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn message(mut self, message: &'static [u8]) -> Self {
        self.messages.push(Bytes::from_static(message));
        self
    }

    pub fn trailer(mut self, name: &str, value: &str) -> Self {
        self.trailers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn finishing(mut self) -> Self {
        self.finishes = true;
        self
    }

    pub fn cancelling_after(mut self, messages: usize) -> Self {
        self.cancel_after = Some(messages);
        self
    }

    pub fn seen(&self) -> SeenRequest {
        self.seen.borrow().clone().expect("handler was called")
    }
}

impl RpcHandler for ScriptedHandler {
    async fn call<B: BodyStream, S: ResponseSink>(&self, request: Request<B>, response: &mut S) {
        self.calls.set(self.calls.get() + 1);

        let Request {
            version,
            path,
            headers,
            mut body,
            cancel,
            ..
        } = request;
        let body = collect_body(&mut body).await.expect("request body");
        *self.seen.borrow_mut() = Some(SeenRequest {
            version,
            path,
            headers,
            body,
        });

        let response_headers: HeaderList = [
            ("content-type", "application/grpc+proto"),
            ("trailer", "grpc-status, grpc-message"),
            ("x-handler", "scripted"),
        ]
        .into_iter()
        .collect();
        let _ = response.send_headers(200, response_headers).await;

        for (i, message) in self.messages.iter().enumerate() {
            if self.cancel_after == Some(i) {
                cancel.cancel();
            }
            if let Err(e) = response.send_message(message.clone()).await {
                self.send_errors.borrow_mut().push(e.to_string());
            }
        }
        if self.cancel_after == Some(self.messages.len()) {
            cancel.cancel();
        }

        for (name, value) in &self.trailers {
            response.set_trailer(name, value);
        }
        if self.finishes {
            let _ = response.finish().await;
        }
    }
}

// ====================
// リクエスト生成
// ====================

pub fn request(
    content_type: Option<&str>,
    version: HttpVersion,
    body: ChunkedBody,
) -> Request<ChunkedBody> {
    let mut headers = HeaderList::new();
    if let Some(ct) = content_type {
        headers.append("content-type", ct);
    }
    headers.append("x-user-agent", "grpc-web-javascript/0.1");
    Request::new("POST", "/veil.Echo/Unary", version, headers, body)
}

pub fn web_request(content_type: &str, body: impl Into<Bytes>) -> Request<ChunkedBody> {
    request(Some(content_type), HttpVersion::Http11, ChunkedBody::full(body))
}
