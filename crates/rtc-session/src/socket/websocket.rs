use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{
        Message,
        client::IntoClientRequest,
        http::{HeaderValue, header::AUTHORIZATION},
    },
};

use super::{Connector, SocketMessage, SocketReader, SocketWriter};
use crate::error::{SessionError, SessionResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket connector backed by tokio-tungstenite.
///
/// The credential is sent as a bearer token in the `Authorization` header.
#[derive(Clone, Debug)]
pub struct WebSocketConnector {
    url: String,
}

impl WebSocketConnector {
    /// Create a connector for the given endpoint.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        credentials: &str,
    ) -> SessionResult<(Box<dyn SocketWriter>, SocketReader)> {
        if self.url.is_empty() {
            return Err(SessionError::config("URL cannot be empty"));
        }

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SessionError::config(format!("Invalid URL: {e}")))?;
        if !credentials.is_empty() {
            let value = HeaderValue::from_str(&format!("Bearer {credentials}"))
                .map_err(|e| SessionError::config(format!("Invalid credential: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SessionError::connection(e.to_string()))?;
        let (sink, stream) = ws.split();

        Ok((Box::new(WebSocketWriter { sink }), read_messages(stream)))
    }
}

struct WebSocketWriter {
    sink: SplitSink<WsStream, Message>,
}

#[async_trait]
impl SocketWriter for WebSocketWriter {
    async fn send_text(&mut self, text: String) -> SessionResult<()> {
        self.sink
            .send(Message::text(text))
            .await
            .map_err(|e| SessionError::disconnected(e.to_string()))
    }

    async fn close(&mut self) -> SessionResult<()> {
        self.sink
            .close()
            .await
            .map_err(|e| SessionError::disconnected(e.to_string()))
    }
}

fn read_messages(stream: SplitStream<WsStream>) -> SocketReader {
    Box::pin(stream.filter_map(|item| async move {
        match item {
            Ok(Message::Text(text)) => Some(Ok(SocketMessage::Text(text.as_str().to_string()))),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(text) => Some(Ok(SocketMessage::Text(text))),
                Err(_) => None,
            },
            Ok(Message::Close(frame)) => Some(Ok(match frame {
                Some(frame) => SocketMessage::Close {
                    code: Some(u16::from(frame.code)),
                    reason: frame.reason.as_str().to_string(),
                },
                None => SocketMessage::Close {
                    code: None,
                    reason: String::new(),
                },
            })),
            // Protocol-level ping/pong is answered by tungstenite itself.
            Ok(_) => None,
            Err(e) => Some(Err(SessionError::disconnected(e.to_string()))),
        }
    }))
}

#[cfg(test)]
mod tests {
    use tokio::{net::TcpListener, sync::oneshot};
    use tokio_tungstenite::{
        accept_hdr_async,
        tungstenite::{
            handshake::server::{ErrorResponse, Request, Response},
            protocol::{CloseFrame, frame::coding::CloseCode},
        },
    };

    use super::*;

    #[tokio::test]
    async fn test_reader_maps_binary_and_close_frames() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (auth_tx, auth_rx) = oneshot::channel();

        let server = tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let capture = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let auth = request
                    .headers()
                    .get(AUTHORIZATION)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = auth_tx.send(auth);
                Ok(response)
            };
            let mut ws = accept_hdr_async(tcp, capture).await.unwrap();

            ws.send(Message::binary(b"{\"hello\":1}".to_vec())).await.unwrap();
            // Not UTF-8: skipped by the reader.
            ws.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
            ws.send(Message::text("plain")).await.unwrap();
            ws.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Policy,
                reason: "banned".into(),
            })))
            .await
            .unwrap();
            // Drain until the client acknowledges the close.
            while let Some(Ok(_)) = ws.next().await {}
        });

        let connector = WebSocketConnector::new(format!("ws://{addr}"));
        let (writer, mut reader) = connector.connect("secret").await.unwrap();
        assert_eq!(auth_rx.await.unwrap().as_deref(), Some("Bearer secret"));

        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            SocketMessage::Text("{\"hello\":1}".to_string())
        );
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            SocketMessage::Text("plain".to_string())
        );
        assert_eq!(
            reader.next().await.unwrap().unwrap(),
            SocketMessage::Close {
                code: Some(1008),
                reason: "banned".to_string(),
            }
        );

        drop((writer, reader));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected() {
        let err = WebSocketConnector::new("").connect("").await.err().unwrap();
        assert!(matches!(err, SessionError::Config { .. }));
    }
}
