//! gRPC-Web Gateway
//!
//! gRPC ハンドラーをラップし、ブラウザからの gRPC-Web リクエストを
//! ネイティブ gRPC リクエストとして処理させます。
//!
//! ## 処理の流れ
//!
//! 1. **Classify**: content-type と HTTP バージョンからバリアントを決定
//! 2. **Passthrough**: HTTP/2 のネイティブ gRPC はそのままハンドラーへ
//! 3. **Adapt**: gRPC-Web はネイティブ形式の新しいリクエストに変換
//! 4. **Intercept**: ハンドラーの出力をフレーム化し、トレーラーを
//!    ボディ末尾のトレーラーフレームとして送信
//!
//! ## 使用例
//!
//! ```rust,ignore
//! let gateway = Gateway::new(MyService::default(), GatewayConfig::default())?;
//! gateway.serve(request, &mut transport).await?;
//! ```

pub mod request;
pub mod response;
pub mod state;

use ftlog::{debug, warn};

use crate::config::GatewayConfig;
use crate::error::GatewayError;
use crate::grpc::headers::HeaderList;
use crate::grpc::text::TextChunkSize;
use crate::grpc::web::{classify, ProtocolTokens};

use request::{adapt_request, BodyStream, CancelToken, Request};
use response::{NativeResponse, ResponseSink, Transport, WebResponse};
use state::{RequestPhase, RequestState};

/// A gRPC server as the gateway sees it
///
/// The handler receives a native request and writes through whichever sink
/// the gateway hands it; it cannot tell a web call from a native one.
#[allow(async_fn_in_trait)]
pub trait RpcHandler {
    async fn call<B: BodyStream, S: ResponseSink>(&self, request: Request<B>, response: &mut S);
}

/// Transcoding gateway in front of an [`RpcHandler`]
#[derive(Debug)]
pub struct Gateway<H> {
    handler: H,
    config: GatewayConfig,
    tokens: ProtocolTokens,
    text_chunk: TextChunkSize,
}

impl<H: RpcHandler> Gateway<H> {
    /// Fails when the config does not pass [`GatewayConfig::validate`]
    pub fn new(handler: H, config: GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let text_chunk = config.text_chunk()?;
        let tokens = config.tokens();
        Ok(Self {
            handler,
            config,
            tokens,
            text_chunk,
        })
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    /// Serve one request to completion, trailer flush included
    ///
    /// Rejections are answered on the transport and also returned as the
    /// error. RPC failures are not errors here: they travel in trailers.
    pub async fn serve<B, T>(&self, request: Request<B>, transport: &mut T) -> Result<(), GatewayError>
    where
        B: BodyStream,
        T: Transport,
    {
        let mut state = RequestState::new();

        if let Some(cors) = &self.config.cors {
            if request.is_preflight() {
                let origin = request.headers.get_str(b"origin").unwrap_or_default();
                debug!("[grpc-web] preflight {} from {:?}", request.path, origin);
                transport.send_head(204, &cors.preflight_headers(origin)).await?;
                transport.close().await?;
                return Ok(());
            }
        }

        let variant = match classify(&self.tokens, request.content_type(), request.version) {
            Ok(variant) => variant,
            Err(e) => return self.reject(&mut state, &request.path, transport, e).await,
        };
        state.on_classified(variant);

        let cancel = request.cancel.clone();
        if !variant.is_web() {
            let mut response = NativeResponse::new(transport, cancel.clone());
            state.advance(RequestPhase::HandlerRunning);
            self.handler.call(request, &mut response).await;
            state.advance(RequestPhase::Finalizing);
            let result = response.finish().await;
            return self.complete(&mut state, &cancel, result);
        }

        let path = request.path.clone();
        let origin = request.headers.get_str(b"origin").map(str::to_string);
        let mut adapted = adapt_request(&self.tokens, variant, request, self.config.max_message_size);
        if let Err(e) = adapted.body.prime().await {
            return self.reject(&mut state, &path, transport, e).await;
        }

        let mut response = WebResponse::new(
            transport,
            &self.tokens,
            variant,
            self.text_chunk,
            cancel.clone(),
        );
        if let (Some(cors), Some(origin)) = (&self.config.cors, origin.as_deref()) {
            response.add_headers(cors.response_headers(origin));
        }

        debug!("[grpc-web] {} as {:?}", path, variant);
        state.advance(RequestPhase::HandlerRunning);
        self.handler.call(adapted, &mut response).await;
        state.advance(RequestPhase::Finalizing);
        let result = response.finish().await;
        self.complete(&mut state, &cancel, result)
    }

    /// A handler that finished its own response may still have been cut off
    fn complete(
        &self,
        state: &mut RequestState,
        cancel: &CancelToken,
        result: Result<(), GatewayError>,
    ) -> Result<(), GatewayError> {
        let result = result.and_then(|()| {
            if cancel.is_cancelled() {
                Err(GatewayError::Cancelled)
            } else {
                Ok(())
            }
        });
        match &result {
            Ok(()) => state.advance(RequestPhase::Done),
            Err(e) => {
                debug!("[grpc-web] request aborted after {:?}: {}", state.age(), e);
                state.advance(RequestPhase::Aborted)
            }
        };
        result
    }

    /// Answer with a bodiless transport error; the handler never runs
    async fn reject<T: Transport>(
        &self,
        state: &mut RequestState,
        path: &str,
        transport: &mut T,
        error: GatewayError,
    ) -> Result<(), GatewayError> {
        warn!("[grpc-web] rejected {}: {}", path, error);
        state.advance(RequestPhase::Rejected);

        let mut headers = HeaderList::new();
        headers.append("content-length", "0");
        if let Err(e) = transport.send_head(error.rejection_status(), &headers).await {
            debug!("[grpc-web] failed to send rejection: {}", e);
        } else if let Err(e) = transport.close().await {
            debug!("[grpc-web] failed to close rejected response: {}", e);
        }
        Err(error)
    }
}
