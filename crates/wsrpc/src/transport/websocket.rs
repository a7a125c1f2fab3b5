//! Websocket transport over `tokio-tungstenite`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::{
    HeaderName, HeaderValue, ORIGIN, SEC_WEBSOCKET_PROTOCOL,
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use super::{
    Connector, Duplex, Frame, FrameSink, FrameSource, Liveness, TransportError, TransportOptions,
    proxy,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects to `ws://` / `wss://` endpoints.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        address: &str,
        options: &TransportOptions,
    ) -> Result<Duplex, TransportError> {
        if !options.method.eq_ignore_ascii_case("GET") {
            return Err(TransportError::Unsupported(format!(
                "websocket upgrade with method {}",
                options.method
            )));
        }
        if options.compress != 0 {
            warn!(level = options.compress, "websocket compression not supported, ignoring");
        }
        if !options.auto_ping || !options.auto_close {
            debug!("ping and close frames are always answered by the websocket layer");
        }

        let request = build_request(address, options)?;
        let config = ws_config(options);

        let stream = tokio::time::timeout(options.open_timeout, open(request, config, options))
            .await
            .map_err(|_| TransportError::Timeout(options.open_timeout))??;
        debug!(address, "websocket connected");

        let (sink, source) = stream.split();
        let liveness = Arc::new(Liveness::new());
        Ok(Duplex {
            sink: Box::new(WsSink { sink }),
            source: Box::new(WsSource {
                stream: source,
                liveness: Arc::clone(&liveness),
                receive_timeout: options.receive_timeout,
            }),
            liveness,
        })
    }
}

/// Build the handshake request: address plus origin, sub-protocols, and
/// extra headers.
pub fn build_request(address: &str, options: &TransportOptions) -> Result<Request, TransportError> {
    let mut request = address
        .into_client_request()
        .map_err(|e| TransportError::Connect(format!("invalid address '{address}': {e}")))?;
    let headers = request.headers_mut();

    for (name, value) in &options.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| TransportError::Connect(format!("invalid header name '{name}': {e}")))?;
        let _ = headers.insert(name, header_value(value)?);
    }
    if let Some(origin) = &options.origin {
        let _ = headers.insert(ORIGIN, header_value(origin)?);
    }
    if !options.protocols.is_empty() {
        let _ = headers.insert(
            SEC_WEBSOCKET_PROTOCOL,
            header_value(&options.protocols.join(", "))?,
        );
    }
    Ok(request)
}

fn header_value(value: &str) -> Result<HeaderValue, TransportError> {
    HeaderValue::from_str(value)
        .map_err(|e| TransportError::Connect(format!("invalid header value '{value}': {e}")))
}

/// Protocol configuration derived from the options.
pub fn ws_config(options: &TransportOptions) -> WebSocketConfig {
    let mut config = WebSocketConfig::default();
    config.max_message_size = Some(options.max_msg_size);
    config.max_frame_size = Some(options.max_msg_size);
    config
}

async fn open(
    request: Request,
    config: WebSocketConfig,
    options: &TransportOptions,
) -> Result<WsStream, TransportError> {
    let Some(proxy_url) = &options.proxy else {
        return connect_direct(request, config, options).await;
    };

    let uri = request.uri();
    let secure = uri.scheme_str() == Some("wss");
    let host = uri
        .host()
        .ok_or_else(|| TransportError::Connect("address has no host".into()))?
        .to_owned();
    let port = uri.port_u16().unwrap_or(if secure { 443 } else { 80 });

    let tcp = proxy::tunnel(
        proxy_url,
        &host,
        port,
        options.proxy_auth.as_ref(),
        &options.proxy_headers,
        options.open_timeout,
    )
    .await?;

    handshake_over(request, tcp, config, options, secure).await
}

#[cfg(feature = "rustls")]
async fn connect_direct(
    request: Request,
    config: WebSocketConfig,
    options: &TransportOptions,
) -> Result<WsStream, TransportError> {
    let (stream, _response) = tokio_tungstenite::connect_async_tls_with_config(
        request,
        Some(config),
        false,
        options.tls.clone(),
    )
    .await
    .map_err(connect_error)?;
    Ok(stream)
}

#[cfg(not(feature = "rustls"))]
async fn connect_direct(
    request: Request,
    config: WebSocketConfig,
    _options: &TransportOptions,
) -> Result<WsStream, TransportError> {
    let (stream, _response) = tokio_tungstenite::connect_async_with_config(request, Some(config), false)
        .await
        .map_err(connect_error)?;
    Ok(stream)
}

#[cfg(feature = "rustls")]
async fn handshake_over(
    request: Request,
    tcp: TcpStream,
    config: WebSocketConfig,
    options: &TransportOptions,
    _secure: bool,
) -> Result<WsStream, TransportError> {
    let (stream, _response) = tokio_tungstenite::client_async_tls_with_config(
        request,
        tcp,
        Some(config),
        options.tls.clone(),
    )
    .await
    .map_err(connect_error)?;
    Ok(stream)
}

#[cfg(not(feature = "rustls"))]
async fn handshake_over(
    request: Request,
    tcp: TcpStream,
    config: WebSocketConfig,
    _options: &TransportOptions,
    secure: bool,
) -> Result<WsStream, TransportError> {
    if secure {
        return Err(TransportError::Unsupported(
            "wss:// requires the `rustls` feature".into(),
        ));
    }
    let (stream, _response) =
        tokio_tungstenite::client_async_with_config(request, MaybeTlsStream::Plain(tcp), Some(config))
            .await
            .map_err(connect_error)?;
    Ok(stream)
}

fn connect_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => {
            TransportError::Connect(format!("handshake rejected with HTTP {}", response.status()))
        }
        other => TransportError::Connect(other.to_string()),
    }
}

fn io_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => TransportError::Closed,
        other => TransportError::Io(other.to_string()),
    }
}

struct WsSink {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.sink.send(Message::Text(text.into())).await.map_err(io_error)
    }

    async fn ping(&mut self) -> Result<(), TransportError> {
        self.sink.send(Message::Ping(vec![].into())).await.map_err(io_error)
    }

    async fn close(&mut self, code: u16) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: String::new().into(),
        };
        self.sink
            .send(Message::Close(Some(frame)))
            .await
            .map_err(io_error)
    }
}

struct WsSource {
    stream: SplitStream<WsStream>,
    liveness: Arc<Liveness>,
    receive_timeout: Option<Duration>,
}

#[async_trait]
impl FrameSource for WsSource {
    async fn next_frame(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            let next = match self.receive_timeout {
                Some(limit) => tokio::time::timeout(limit, self.stream.next())
                    .await
                    .map_err(|_| TransportError::ReceiveTimeout(limit))?,
                None => self.stream.next().await,
            };
            let msg = match next {
                None | Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    return Ok(None);
                }
                Some(Err(WsError::Io(e))) => return Err(TransportError::Io(e.to_string())),
                Some(Err(e)) => return Ok(Some(Frame::Error(e.to_string()))),
                Some(Ok(msg)) => msg,
            };

            self.liveness.mark_alive();
            match msg {
                Message::Text(text) => return Ok(Some(Frame::Text(text.as_str().to_owned()))),
                Message::Binary(data) => return Ok(Some(Frame::Binary(data.to_vec()))),
                Message::Close(frame) => {
                    return Ok(Some(Frame::Close(frame.map(|f| u16::from(f.code)))));
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }
}
