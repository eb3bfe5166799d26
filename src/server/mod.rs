//! デモ用 HTTP/1.1 ホスト
//!
//! ブラウザからの gRPC-Web リクエストを受け付け、[`Gateway`] 経由で
//! ハンドラーに渡す最小構成のサーバーです。
//!
//! ## 特徴
//!
//! - **monoio**: スレッドパーコア型の非同期ランタイム
//! - **コネクションごとのタスク分離**: monoio::spawn で各接続を独立管理
//! - **1 接続 1 リクエスト**: レスポンス送信後に接続を閉じる

pub mod echo;
pub mod http1;

use std::io;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;
use ftlog::{debug, info, warn};
use monoio::io::{AsyncReadRent, AsyncWriteRentExt, Splitable};
use monoio::net::{TcpListener, TcpStream};

use crate::gateway::request::Request;
use crate::gateway::{Gateway, RpcHandler};

use http1::{parse_head, Http1Body, Http1Transport, RequestHead, MAX_HEAD_SIZE};

/// Read the request head, leaving any body bytes that came with it
async fn read_head<R: AsyncReadRent>(reader: &mut R) -> io::Result<(RequestHead, Bytes)> {
    let mut buf: Vec<u8> = Vec::with_capacity(4096);
    loop {
        let chunk = Vec::with_capacity(4096);
        let (res, chunk) = reader.read(chunk).await;
        let n = res?;
        if n == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);

        if let Some((head, len)) = parse_head(&buf)? {
            let rest = Bytes::from(buf).slice(len..);
            return Ok((head, rest));
        }
        if buf.len() > MAX_HEAD_SIZE {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "request head too large"));
        }
    }
}

/// Serve a single connection
pub async fn handle_connection<H: RpcHandler>(
    gateway: &Gateway<H>,
    stream: TcpStream,
    peer: SocketAddr,
) -> io::Result<()> {
    let _ = stream.set_nodelay(true);
    let (mut reader, mut writer) = stream.into_split();

    let (head, rest) = read_head(&mut reader).await?;
    debug!("[server] {} {} {} from {}", head.method, head.path, head.version, peer);

    if head.is_chunked() {
        let (res, _) = writer
            .write_all(b"HTTP/1.1 411 Length Required\r\ncontent-length: 0\r\nconnection: close\r\n\r\n".to_vec())
            .await;
        return res.map(|_| ());
    }
    let content_length = head.content_length()?;

    let body = Http1Body::new(reader, rest, content_length);
    let request = Request::new(head.method, head.path, head.version, head.headers, body);
    let mut transport = Http1Transport::new(writer);

    if let Err(e) = gateway.serve(request, &mut transport).await {
        debug!("[server] request from {} ended with: {}", peer, e);
    }
    Ok(())
}

/// Accept loop
pub async fn run_async<H: RpcHandler + 'static>(bind_addr: SocketAddr, gateway: Gateway<H>) -> io::Result<()> {
    let listener = TcpListener::bind(bind_addr)?;
    info!("[server] gRPC-Web gateway listening on {}", bind_addr);

    let gateway = Rc::new(gateway);
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("[server] accept failed: {}", e);
                continue;
            }
        };

        let gateway = gateway.clone();
        monoio::spawn(async move {
            if let Err(e) = handle_connection(&gateway, stream, peer).await {
                debug!("[server] connection {} closed: {}", peer, e);
            }
        });
    }
}

/// サーバーを起動（同期ラッパー）
///
/// 現在のスレッドで monoio ランタイムを作成して実行します。
pub fn run<H: RpcHandler + 'static>(bind_addr: SocketAddr, gateway: Gateway<H>) -> io::Result<()> {
    use monoio::RuntimeBuilder;

    let mut rt = RuntimeBuilder::<monoio::FusionDriver>::new()
        .enable_timer()
        .build()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, format!("Runtime error: {}", e)))?;

    rt.block_on(async move { run_async(bind_addr, gateway).await })
}
