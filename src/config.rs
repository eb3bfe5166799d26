//! ゲートウェイ設定
//!
//! ```toml
//! max_message_size = 4194304
//! text_chunk_size = 3072
//! compat_header = "grpc-browser-compat"
//!
//! [cors]
//! allowed_origins = ["https://app.example.com"]
//! allow_credentials = true
//! ```

use std::path::Path;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::grpc::framing::GRPC_MAX_MESSAGE_SIZE;
use crate::grpc::headers::is_token;
use crate::grpc::text::{TextChunkSize, DEFAULT_TEXT_CHUNK_SIZE};
use crate::grpc::web::{CorsConfig, ProtocolTokens, DEFAULT_COMPAT_HEADER};

/// デフォルト値関数
fn default_max_message_size() -> usize { GRPC_MAX_MESSAGE_SIZE }
fn default_text_chunk_size() -> usize { DEFAULT_TEXT_CHUNK_SIZE }
fn default_compat_header() -> String { DEFAULT_COMPAT_HEADER.to_string() }

/// gRPC-Web ゲートウェイ設定
#[derive(Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// 受信フレームの最大ペイロードサイズ（バイト）
    ///
    /// これを超える長さを宣言したフレームは 413 で拒否。
    ///
    /// デフォルト: 4MB
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// grpc-web-text レスポンスの base64 エンコード単位（入力バイト数）
    ///
    /// 3 の倍数であること。
    ///
    /// デフォルト: 3072
    #[serde(default = "default_text_chunk_size")]
    pub text_chunk_size: usize,

    /// ブラウザ互換マーカーヘッダー名
    #[serde(default = "default_compat_header")]
    pub compat_header: String,

    /// CORS 設定（未設定の場合は CORS ヘッダーを付与しない）
    #[serde(default)]
    pub cors: Option<CorsConfig>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            text_chunk_size: default_text_chunk_size(),
            compat_header: default_compat_header(),
            cors: None,
        }
    }
}

impl GatewayConfig {
    /// TOML 文字列から読み込み
    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(s).context("invalid gateway config")?;
        config.validate()?;
        Ok(config)
    }

    /// ファイルから読み込み
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }

    /// 値の整合性チェック
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_message_size == 0 || self.max_message_size > u32::MAX as usize {
            bail!("max_message_size must be between 1 and {}", u32::MAX);
        }
        self.text_chunk()?;
        if !is_token(self.compat_header.as_bytes()) {
            bail!("compat_header {:?} is not a valid header name", self.compat_header);
        }
        Ok(())
    }

    /// 検証済みの base64 エンコード単位
    pub fn text_chunk(&self) -> anyhow::Result<TextChunkSize> {
        TextChunkSize::new(self.text_chunk_size).with_context(|| {
            format!("text_chunk_size must be a positive multiple of 3, got {}", self.text_chunk_size)
        })
    }

    /// プロトコルトークン（分類・書き換え用）
    pub fn tokens(&self) -> ProtocolTokens {
        ProtocolTokens::with_compat_header(self.compat_header.to_ascii_lowercase())
    }
}
