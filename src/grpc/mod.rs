//! gRPC / gRPC-Web Protocol Support
//!
//! ゲートウェイが使う gRPC ワイヤプロトコルの部品を実装します。
//! いずれも状態を持たない純粋な関数・値型で、リクエスト間で共有できます。
//!
//! ## 機能
//!
//! - **Framing**: 5-byte メッセージフレーミング（データ / トレーラーフレーム）
//! - **Trailers**: トレーラーフレームのペイロード形式
//! - **Web**: gRPC-Web の分類と content-type 変換、CORS
//! - **Text**: grpc-web-text の base64 ストリーミング変換
//! - **Status**: grpc-status / grpc-message
//!
//! ## 使用例
//!
//! ```rust,ignore
//! use veil_grpc_web::grpc::{classify, encode_data_frame, ProtocolTokens};
//!
//! let variant = classify(&ProtocolTokens::default(), content_type, version)?;
//! let frame = encode_data_frame(&message);
//! ```

pub mod framing;
pub mod headers;
pub mod status;
pub mod text;
pub mod trailers;
pub mod web;

// Re-exports
pub use framing::{
    decode_frame, encode_data_frame, encode_trailer_frame, Frame, FrameDecoder, FrameError,
};
pub use headers::HeaderList;
pub use status::{GrpcStatus, GrpcStatusCode};
pub use trailers::TrailerSet;
pub use web::{classify, CorsConfig, HttpVersion, ProtocolTokens, ProtocolVariant};
