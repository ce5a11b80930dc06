//! Bundled [`Transport`] implementation over `tokio-tungstenite`.
//!
//! One task per connection drives both directions: outbound commands arrive
//! on an unbounded channel, inbound frames are forwarded as
//! [`TransportEvent`]s until the peer closes, a local cancel lands, or the
//! stream errors.

use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest as _;
use tokio_tungstenite::tungstenite::http::header::{self, HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Bytes, Message as WsMessage, Utf8Bytes};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{ConnectTarget, Transport, TransportEvent, TransportEvents, TransportHandle};
use crate::Result;
use crate::close::CloseCode;
use crate::error::{Error, TransportFailure};
use crate::message::Message;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Production transport over `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteTransport;

impl TungsteniteTransport {
    /// Create the transport.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl Transport for TungsteniteTransport {
    async fn connect(
        &self,
        target: &ConnectTarget,
        subprotocols: &[String],
        events: TransportEvents,
    ) -> Result<Box<dyn TransportHandle>> {
        let mut request = target
            .url_ref()
            .as_str()
            .into_client_request()
            .map_err(|e| Error::from(failure(&e)))?;

        if !subprotocols.is_empty() {
            let offer = HeaderValue::from_str(&subprotocols.join(", "))
                .map_err(|e| Error::configuration(format!("invalid subprotocol list: {e}")))?;
            request
                .headers_mut()
                .insert(header::SEC_WEBSOCKET_PROTOCOL, offer);
        }
        for (name, value) in target.headers() {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| Error::configuration(format!("invalid header name `{name}`: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::configuration(format!("invalid header value: {e}")))?;
            request.headers_mut().append(name, value);
        }

        let connecting = connect_async(request);
        let connected = match target.connect_timeout() {
            Some(limit) => tokio::time::timeout(limit, connecting)
                .await
                .map_err(|_| {
                    Error::from(TransportFailure {
                        code: 0,
                        domain: "timeout".to_owned(),
                        message: format!("connect timed out after {limit:?}"),
                    })
                })?,
            None => connecting.await,
        };
        let (stream, response) = connected.map_err(|e| Error::from(failure(&e)))?;

        let subprotocol = response
            .headers()
            .get(header::SEC_WEBSOCKET_PROTOCOL)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);

        #[cfg(feature = "tracing")]
        tracing::debug!(url = %target.url_ref(), ?subprotocol, "WebSocket handshake complete");

        let _ = events.send(TransportEvent::DidOpen { subprotocol });

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        tokio::spawn(drive(stream, events, commands_rx));

        Ok(Box::new(TungsteniteHandle {
            commands: commands_tx,
        }))
    }
}

/// Commands queued by the handle for the connection task.
enum Outbound {
    Message(Message),
    Ping,
    Close { code: CloseCode },
}

struct TungsteniteHandle {
    commands: mpsc::UnboundedSender<Outbound>,
}

impl TransportHandle for TungsteniteHandle {
    fn send(&self, message: Message) -> Result<()> {
        self.commands
            .send(Outbound::Message(message))
            .map_err(|_| closed())
    }

    fn send_ping(&self) -> Result<()> {
        self.commands.send(Outbound::Ping).map_err(|_| closed())
    }

    fn cancel(&self, code: CloseCode, _reason: Option<Vec<u8>>) {
        // Reason payloads are discarded on transmit; peers only ever see the
        // code, and only when it is wire-legal.
        let _ = self.commands.send(Outbound::Close { code });
    }
}

fn closed() -> Error {
    TransportFailure {
        code: 0,
        domain: "connection".to_owned(),
        message: "connection is closed".to_owned(),
    }
    .into()
}

async fn drive(
    stream: WsStream,
    events: TransportEvents,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
) {
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            incoming = read.next() => match incoming {
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, data) = match frame {
                        Some(frame) => {
                            let payload = frame.reason.as_bytes();
                            let data = (!payload.is_empty()).then(|| payload.to_vec());
                            (CloseCode::from_raw(u16::from(frame.code)), data)
                        }
                        None => (CloseCode::NoStatusReceived, None),
                    };
                    let _ = events.send(TransportEvent::DidClose { code, data });
                    break;
                }
                Some(Ok(raw)) => {
                    if let Some(message) = from_wire(raw) {
                        let _ = events.send(TransportEvent::DidReceive(message));
                    }
                }
                Some(Err(e)) => {
                    let _ = events.send(TransportEvent::DidFail(failure(&e).into()));
                    break;
                }
                None => {
                    // Stream ended without a close frame.
                    let _ = events.send(TransportEvent::DidClose {
                        code: CloseCode::AbnormalClosure,
                        data: None,
                    });
                    break;
                }
            },
            command = commands.recv() => match command {
                Some(Outbound::Message(message)) => {
                    if let Err(e) = write.send(to_wire(message)).await {
                        let _ = events.send(TransportEvent::DidFail(failure(&e).into()));
                        break;
                    }
                }
                Some(Outbound::Ping) => {
                    if let Err(e) = write.send(WsMessage::Ping(Bytes::new())).await {
                        let _ = events.send(TransportEvent::DidFail(failure(&e).into()));
                        break;
                    }
                }
                Some(Outbound::Close { code }) => {
                    let frame = code.is_sendable().then(|| CloseFrame {
                        code: code.raw_value().into(),
                        reason: Utf8Bytes::default(),
                    });
                    // A code withheld from the wire is reported back as Invalid.
                    let reported = if frame.is_some() {
                        code
                    } else {
                        CloseCode::Invalid
                    };
                    let _ = write.send(WsMessage::Close(frame)).await;
                    let _ = events.send(TransportEvent::DidClose {
                        code: reported,
                        data: None,
                    });
                    break;
                }
                // Handle dropped: finish the close handshake quietly.
                None => {
                    let _ = write.close().await;
                    break;
                }
            },
        }
    }
}

fn to_wire(message: Message) -> WsMessage {
    match message {
        Message::Text(text) => WsMessage::Text(text.into()),
        Message::Binary(data) => WsMessage::Binary(data.into()),
        Message::Ping => WsMessage::Ping(Bytes::new()),
        Message::Pong => WsMessage::Pong(Bytes::new()),
    }
}

fn from_wire(message: WsMessage) -> Option<Message> {
    match message {
        WsMessage::Text(text) => Some(Message::Text(text.as_str().to_owned())),
        WsMessage::Binary(data) => Some(Message::Binary(data.to_vec())),
        WsMessage::Ping(_) => Some(Message::Ping),
        WsMessage::Pong(_) => Some(Message::Pong),
        WsMessage::Close(_) | WsMessage::Frame(_) => None,
    }
}

fn failure(e: &tungstenite::Error) -> TransportFailure {
    use tungstenite::Error as WsError;

    let (code, domain) = match e {
        WsError::Io(io) => (io.raw_os_error().unwrap_or(0), "io"),
        WsError::ConnectionClosed | WsError::AlreadyClosed => (0, "connection"),
        WsError::Protocol(_) => (0, "protocol"),
        WsError::Capacity(_) => (0, "capacity"),
        WsError::Http(response) => (i32::from(response.status().as_u16()), "http"),
        WsError::HttpFormat(_) | WsError::Url(_) => (0, "http"),
        _ => (0, "transport"),
    };

    TransportFailure {
        code,
        domain: domain.to_owned(),
        message: e.to_string(),
    }
}
