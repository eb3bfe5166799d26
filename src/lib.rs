//! # veil-grpc-web
//!
//! gRPC-Web トランスコーディングゲートウェイ。
//!
//! ブラウザ (HTTP/1.1, gRPC-Web) からのリクエストを、ラップした gRPC
//! ハンドラーにネイティブ gRPC として見せ、ハンドラーの応答（ヘッダー、
//! メッセージ、トレーラー）を単一の gRPC-Web ボディへ再エンコードします。
//! HTTP/2 のネイティブ gRPC リクエストはそのまま通過します。
//!
//! - [`grpc`]: フレームコーデック、分類器、base64 テキスト変換
//! - [`gateway`]: エントリポイント、リクエストアダプター、レスポンスインターセプター
//! - [`server`]: デモ用 HTTP/1.1 ホスト (monoio)

pub mod config;
pub mod error;
pub mod gateway;
pub mod grpc;
pub mod server;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use gateway::request::{BodyStream, CancelToken, ChunkedBody, MessageReader, Request};
pub use gateway::response::{ResponseSink, Transport};
pub use gateway::{Gateway, RpcHandler};
