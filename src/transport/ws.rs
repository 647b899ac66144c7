use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt as _, StreamExt as _};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, info, warn};

use super::{Frame, Publish, PushTransport, TransportEvent};
use crate::conversations::ConversationId;
use crate::error::{Result, SyncError};

const INITIAL_BACKOFF_MS: u64 = 1_000;
const MAX_BACKOFF_MS: u64 = 30_000;
const MAX_JITTER_MS: u64 = 250;

/// Websocket push transport speaking JSON [`Frame`]s.
///
/// A background task owns the socket and reconnects forever with exponential
/// backoff until the event receiver is dropped. Every successful (re)connect
/// is reported as [`TransportEvent::Connected`]; the bridge must re-join then.
#[derive(Debug, Clone)]
pub struct WsTransport {
    outbound: mpsc::UnboundedSender<String>,
}

impl WsTransport {
    pub fn connect(url: &str) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        tokio::spawn(connection_loop(url.to_string(), outbound_rx, event_tx));

        (Self { outbound }, event_rx)
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        let text = frame.encode()?;
        self.outbound
            .send(text)
            .map_err(|_| SyncError::ChannelClosed)
    }
}

#[async_trait]
impl PushTransport for WsTransport {
    async fn join(&self, conversation: &ConversationId) -> Result<()> {
        self.send_frame(Frame::join(conversation))
    }

    async fn leave(&self, conversation: &ConversationId) -> Result<()> {
        self.send_frame(Frame::leave(conversation))
    }

    async fn publish(&self, event: Publish) -> Result<()> {
        self.send_frame(Frame::publish(&event)?)
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let base = INITIAL_BACKOFF_MS
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    Duration::from_millis(base + jitter)
}

async fn connection_loop(
    url: String,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let mut attempt = 0u32;

    loop {
        match connect_async(url.as_str()).await {
            Ok((socket, _response)) => {
                info!(url = %url, "Push transport connected");
                attempt = 0;

                // Joins/leaves queued while offline refer to stale state
                let mut dropped = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    dropped += 1;
                }
                if dropped > 0 {
                    debug!(dropped, "Discarded frames queued while disconnected");
                }

                if event_tx.send(TransportEvent::Connected).is_err() {
                    return;
                }

                let (mut sink, mut stream) = socket.split();
                loop {
                    tokio::select! {
                        outgoing = outbound_rx.recv() => match outgoing {
                            Some(text) => {
                                if let Err(e) = sink.send(WsMessage::text(text)).await {
                                    warn!(error = %e, "Push transport write failed");
                                    break;
                                }
                            }
                            None => {
                                let _ = sink.close().await;
                                return;
                            }
                        },
                        incoming = stream.next() => match incoming {
                            Some(Ok(WsMessage::Text(text))) => dispatch(&text, &event_tx),
                            Some(Ok(WsMessage::Close(_))) | None => break,
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                warn!(error = %e, "Push transport read failed");
                                break;
                            }
                        },
                    }
                }

                info!(url = %url, "Push transport disconnected");
                if event_tx.send(TransportEvent::Disconnected).is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!(url = %url, attempt, error = %e, "Push transport connect failed");
            }
        }

        if event_tx.is_closed() {
            return;
        }

        let delay = backoff_delay(attempt);
        attempt = attempt.saturating_add(1);
        debug!(delay_ms = delay.as_millis() as u64, "Reconnecting push transport");
        tokio::time::sleep(delay).await;
    }
}

fn dispatch(text: &str, event_tx: &mpsc::UnboundedSender<TransportEvent>) {
    let event = match Frame::decode(text).and_then(Frame::into_event) {
        Ok(Some(event)) => event,
        Ok(None) => return,
        Err(e) => {
            warn!(error = %e, "Dropping malformed push frame");
            return;
        }
    };
    let _ = event_tx.send(event);
}
