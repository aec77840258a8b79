//! Signal WebSocket ingestor.
//!
//! ```text
//! Disconnected ──dial──▶ Connecting ──ok──▶ Reading ──read err──▶ Backoff ──▶ Connecting
//!                                                │
//!                                                └──ctx cancel──▶ Terminating ──▶ Closed
//! ```
//!
//! Only textual frames are decoded; binary/control frames are ignored by
//! `tokio-tungstenite` before they reach the match below (ping/pong are
//! answered at the protocol layer). Reconnection is bounded; exhausting the
//! configured retry budget returns an error.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::protocol::Message;
use tracing::{debug, info, warn};

use crate::envelope::{self, Author, Envelope, Normalized};
use crate::store::{MessageKind, NewMessage, Store, StoreError};

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ws: {0}")]
    Ws(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("reconnection attempts exhausted after {0} tries")]
    RetriesExhausted(u32),
}

pub struct IngestorConfig {
    pub url: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
}

/// Builds the ws:// URL for a Signal bridge's receive endpoint.
pub fn build_url(signal_url: &str, phone_number: &str) -> String {
    format!("ws://{signal_url}/v1/receive/{phone_number}")
}

/// Drives the ingestor until `shutdown` fires or the retry budget is spent.
pub async fn run(
    config: IngestorConfig,
    store: Arc<Store>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), IngestError> {
    let mut attempt = 0u32;

    'reconnect: loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        let connect = tokio_tungstenite::connect_async(&config.url);
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
                continue 'reconnect;
            }
            result = connect => {
                match result {
                    Ok((ws, _response)) => {
                        attempt = 0;
                        info!(url = %config.url, "ingestor connected");
                        match read_loop(ws, &store, &mut shutdown).await {
                            Ok(ReadLoopExit::Shutdown) => return Ok(()),
                            Ok(ReadLoopExit::Disconnected) => {
                                info!("ingestor connection closed by peer, reconnecting");
                            }
                            Err(err) => {
                                warn!(error = %err, "ingestor read loop ended, reconnecting");
                            }
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "ingestor dial failed");
                    }
                }
            }
        }

        attempt += 1;
        if attempt > config.max_retries {
            return Err(IngestError::RetriesExhausted(config.max_retries));
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            () = tokio::time::sleep(config.retry_delay) => {}
        }
    }
}

/// How the read loop ended: either `shutdown` fired, or the socket dropped
/// out from under it (EOF or a `Close` frame) while the process is still
/// live. Only the former should propagate as clean termination of the whole
/// ingestor — the latter must fall back to `run`'s reconnect/backoff path.
enum ReadLoopExit {
    Shutdown,
    Disconnected,
}

async fn read_loop<S>(
    mut ws: S,
    store: &Arc<Store>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<ReadLoopExit, IngestError>
where
    S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error>
        + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(ReadLoopExit::Shutdown);
                }
            }
            frame = ws.next() => {
                match frame {
                    None => return Ok(ReadLoopExit::Disconnected),
                    Some(Err(e)) => return Err(IngestError::Ws(e)),
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(store, &text).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = ws.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) => return Ok(ReadLoopExit::Disconnected),
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

async fn handle_frame(store: &Arc<Store>, frame: &str) {
    let envelope = match envelope::decode(frame) {
        Ok(e) => e,
        Err(err) => {
            debug!(error = %err, "dropping malformed frame");
            return;
        }
    };

    if matches!(envelope, Envelope::NonGroup | Envelope::Malformed(_)) {
        return;
    }

    let Some(normalized) = envelope::normalize(envelope) else {
        return;
    };

    if let Err(err) = apply(store, normalized).await {
        warn!(error = %err, "store error, dropping frame");
    }
}

async fn apply(store: &Arc<Store>, normalized: Normalized) -> Result<(), StoreError> {
    match normalized {
        Normalized::Regular { message } => {
            let user_id = store.ensure_user(&message.author, &message.display_name).await?;
            let group_id = store
                .ensure_group(&message.group_id, message.group_name.as_deref())
                .await?;
            store
                .insert_message(NewMessage {
                    user_id,
                    group_id,
                    timestamp: message.timestamp,
                    text: message.text,
                    kind: MessageKind::Regular,
                    quote_id: None,
                    quote_author_uuid: None,
                    quote_text: None,
                    reaction_emoji: None,
                    reaction_target_author_uuid: None,
                    reaction_target_timestamp: None,
                })
                .await
        }
        Normalized::Quote { message, quote } => {
            let user_id = store.ensure_user(&message.author, &message.display_name).await?;
            let group_id = store
                .ensure_group(&message.group_id, message.group_name.as_deref())
                .await?;
            store
                .insert_message(NewMessage {
                    user_id,
                    group_id,
                    timestamp: message.timestamp,
                    text: message.text,
                    kind: MessageKind::Quote,
                    quote_id: Some(quote.quote_id),
                    quote_author_uuid: quote.author_uuid,
                    quote_text: Some(quote.text),
                    reaction_emoji: None,
                    reaction_target_author_uuid: None,
                    reaction_target_timestamp: None,
                })
                .await
        }
        Normalized::ReactionApply {
            author,
            display_name,
            group_id,
            timestamp,
            reaction,
        } => {
            let user_id = store.ensure_user(&author, &display_name).await?;
            let group_id = store.ensure_group(&group_id, None).await?;
            store
                .insert_message(NewMessage {
                    user_id,
                    group_id,
                    timestamp,
                    text: String::new(),
                    kind: MessageKind::Reaction,
                    quote_id: None,
                    quote_author_uuid: None,
                    quote_text: None,
                    reaction_emoji: Some(reaction.emoji),
                    reaction_target_author_uuid: reaction.target_author_uuid,
                    reaction_target_timestamp: Some(reaction.target_timestamp),
                })
                .await
        }
        Normalized::ReactionRemove {
            author,
            group_id,
            reaction,
        } => {
            let group_id = store.ensure_group(&group_id, None).await?;
            store
                .apply_reaction_removal(
                    &author,
                    group_id,
                    reaction.target_author_uuid.as_deref(),
                    reaction.target_timestamp,
                    &reaction.emoji,
                )
                .await
        }
    }
}
