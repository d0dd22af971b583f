//! Transport seam for the remote recognition channel.
//!
//! A transport opens one text-frame link per connection attempt. The
//! production transport is a WebSocket; tests plug in in-memory links.

use std::pin::Pin;

use async_trait::async_trait;
use futures::{future, Sink, SinkExt, Stream, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use crate::error::ChannelError;

pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;
pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, ChannelError>> + Send>>;

/// One open connection: outbound text frames and inbound text frames.
/// The stream ending means the peer closed the link.
pub struct TransportLink {
    pub sink: FrameSink,
    pub stream: FrameStream,
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a link correlated with `session_id`
    async fn open(&self, session_id: &str) -> Result<TransportLink, ChannelError>;

    /// Human-readable endpoint for logs
    fn endpoint(&self) -> String;
}

/// WebSocket transport; the session id travels in the URL query so every
/// reconnection lands in the same server-side session.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    url: String,
}

impl WebSocketTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn session_url(&self, session_id: &str) -> String {
        let separator = if self.url.contains('?') { '&' } else { '?' };
        format!("{}{}session_id={}", self.url, separator, session_id)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, session_id: &str) -> Result<TransportLink, ChannelError> {
        let url = self.session_url(session_id);
        let (socket, _response) =
            tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| ChannelError::ConnectFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                })?;

        let (write, read) = socket.split();

        let sink = write
            .sink_map_err(|e| ChannelError::SendFailed {
                reason: e.to_string(),
            })
            .with(|text: String| future::ready(Ok::<_, ChannelError>(Message::Text(text))));

        let stream = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => Some(String::from_utf8(bytes.to_vec()).map_err(
                    |e| ChannelError::Protocol {
                        reason: format!("binary frame is not UTF-8: {}", e),
                    },
                )),
                // Control frames are answered by tungstenite itself
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::ReceiveFailed {
                    reason: e.to_string(),
                })),
            })
        });

        Ok(TransportLink {
            sink: Box::pin(sink),
            stream: Box::pin(stream),
        })
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_url_appends_query() {
        let transport = WebSocketTransport::new("ws://localhost:9000/recognize");
        assert_eq!(
            transport.session_url("abc"),
            "ws://localhost:9000/recognize?session_id=abc"
        );

        let with_query = WebSocketTransport::new("ws://host/ws?v=2");
        assert_eq!(with_query.session_url("abc"), "ws://host/ws?v=2&session_id=abc");
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_failed() {
        // Port 9 (discard) is not listening in test environments
        let transport = WebSocketTransport::new("ws://127.0.0.1:9/none");
        let err = transport.open("abc").await.err();
        assert!(matches!(err, Some(ChannelError::ConnectFailed { .. })));
    }
}
