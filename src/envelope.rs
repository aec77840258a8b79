//! Signal envelope decoding and normalization.
//!
//! Mirrors the `signal-cli-rest-api` WebSocket frame shape: each text frame
//! carries one JSON envelope with `dataMessage` or `syncMessage.sentMessage`,
//! optionally nesting a `groupInfo`, `quote`, or `reaction` object.

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawFrame {
    envelope: RawEnvelope,
}

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    source: Option<String>,
    #[serde(rename = "sourceUuid")]
    source_uuid: Option<String>,
    #[serde(rename = "sourceName")]
    source_name: Option<String>,
    timestamp: i64,
    #[serde(rename = "dataMessage")]
    data_message: Option<RawDataMessage>,
    #[serde(rename = "syncMessage")]
    sync_message: Option<RawSyncMessage>,
    #[serde(rename = "receiptMessage")]
    receipt_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct RawSyncMessage {
    #[serde(rename = "sentMessage")]
    sent_message: Option<RawDataMessage>,
}

#[derive(Debug, Deserialize)]
struct RawDataMessage {
    message: Option<String>,
    #[serde(rename = "groupInfo")]
    group_info: Option<RawGroupInfo>,
    quote: Option<RawQuote>,
    reaction: Option<RawReaction>,
}

#[derive(Debug, Deserialize)]
struct RawGroupInfo {
    #[serde(rename = "groupId")]
    group_id: String,
    #[serde(rename = "groupName")]
    group_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawQuote {
    id: i64,
    #[serde(rename = "authorUuid")]
    author_uuid: Option<String>,
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReaction {
    emoji: Option<String>,
    #[serde(rename = "targetAuthorUuid")]
    target_author_uuid: Option<String>,
    #[serde(rename = "targetSentTimestamp")]
    target_sent_timestamp: Option<i64>,
    #[serde(rename = "isRemove", default)]
    is_remove: bool,
}

/// Stable external identity for a Signal account: exactly one of uuid/number
/// is the key the Store dedupes on, per the data model's User invariant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Author {
    Uuid(String),
    Number(String),
}

impl Author {
    pub fn as_str(&self) -> &str {
        match self {
            Author::Uuid(s) | Author::Number(s) => s,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Quote {
    pub quote_id: i64,
    pub author_uuid: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone)]
pub struct ReactionInfo {
    pub emoji: String,
    pub target_author_uuid: Option<String>,
    pub target_timestamp: i64,
    pub is_remove: bool,
}

/// A fully-decoded group message, ready to resolve into a `Normalized` record.
#[derive(Debug, Clone)]
pub struct GroupMessage {
    pub author: Author,
    pub display_name: String,
    pub group_id: String,
    pub group_name: Option<String>,
    pub text: String,
    pub timestamp: i64,
    pub quote: Option<Quote>,
    pub reaction: Option<ReactionInfo>,
}

/// The tagged variant over incoming payload shapes.
#[derive(Debug, Clone)]
pub enum Envelope {
    GroupDataMessage(GroupMessage),
    GroupSentMessage(GroupMessage),
    NonGroup,
    Malformed(String),
}

/// `DisplayName(author) = sourceName if non-empty else sourceUuid`.
fn display_name(source_name: &Option<String>, fallback: &str) -> String {
    match source_name {
        Some(name) if !name.is_empty() => name.clone(),
        _ => fallback.to_owned(),
    }
}

fn resolve_author(env: &RawEnvelope) -> Option<Author> {
    if let Some(uuid) = &env.source_uuid {
        if !uuid.is_empty() {
            return Some(Author::Uuid(uuid.clone()));
        }
    }
    env.source.clone().filter(|s| !s.is_empty()).map(Author::Number)
}

fn to_group_message(env: &RawEnvelope, data: &RawDataMessage, ts: i64) -> Option<GroupMessage> {
    let group_info = data.group_info.as_ref()?;
    let author = resolve_author(env)?;
    let fallback = author.as_str().to_owned();
    Some(GroupMessage {
        display_name: display_name(&env.source_name, &fallback),
        author,
        group_id: group_info.group_id.clone(),
        group_name: group_info.group_name.clone(),
        text: data.message.clone().unwrap_or_default(),
        timestamp: ts,
        quote: data.quote.as_ref().map(|q| Quote {
            quote_id: q.id,
            author_uuid: q.author_uuid.clone(),
            text: q.text.clone().unwrap_or_default(),
        }),
        reaction: data.reaction.as_ref().map(|r| ReactionInfo {
            emoji: r.emoji.clone().unwrap_or_default(),
            target_author_uuid: r.target_author_uuid.clone(),
            target_timestamp: r.target_sent_timestamp.unwrap_or(0),
            is_remove: r.is_remove,
        }),
    })
}

/// Decode one WebSocket text frame into an `Envelope`.
///
/// Parse failures are reported as `EnvelopeError`, not `Malformed` — callers
/// decide whether to log-and-skip. `Malformed` is reserved for structurally
/// valid JSON that doesn't match any recognized envelope shape.
pub fn decode(frame: &str) -> Result<Envelope, EnvelopeError> {
    let raw: RawFrame = serde_json::from_str(frame)?;
    let env = raw.envelope;

    if env.receipt_message.is_some() {
        return Ok(Envelope::NonGroup);
    }

    if let Some(data) = &env.data_message {
        return Ok(match to_group_message(&env, data, env.timestamp) {
            Some(gm) => Envelope::GroupDataMessage(gm),
            None => Envelope::NonGroup,
        });
    }

    if let Some(sync) = &env.sync_message {
        if let Some(sent) = &sync.sent_message {
            return Ok(match to_group_message(&env, sent, env.timestamp) {
                Some(gm) => Envelope::GroupSentMessage(gm),
                None => Envelope::NonGroup,
            });
        }
    }

    Ok(Envelope::NonGroup)
}

/// The outcome of resolving an envelope: at most one of regular / quote /
/// reaction-apply / reaction-remove / drop.
#[derive(Debug, Clone)]
pub enum Normalized {
    Regular {
        message: GroupMessage,
    },
    Quote {
        message: GroupMessage,
        quote: Quote,
    },
    ReactionApply {
        author: Author,
        display_name: String,
        group_id: String,
        timestamp: i64,
        reaction: ReactionInfo,
    },
    ReactionRemove {
        author: Author,
        group_id: String,
        reaction: ReactionInfo,
    },
}

/// Resolve a decoded envelope to at most one normalized record.
pub fn normalize(envelope: Envelope) -> Option<Normalized> {
    let message = match envelope {
        Envelope::GroupDataMessage(m) | Envelope::GroupSentMessage(m) => m,
        Envelope::NonGroup | Envelope::Malformed(_) => return None,
    };

    if let Some(reaction) = message.reaction.clone() {
        return Some(if reaction.is_remove {
            Normalized::ReactionRemove {
                author: message.author,
                group_id: message.group_id,
                reaction,
            }
        } else {
            Normalized::ReactionApply {
                author: message.author,
                display_name: message.display_name,
                group_id: message.group_id,
                timestamp: message.timestamp,
                reaction,
            }
        });
    }

    if let Some(quote) = message.quote.clone() {
        return Some(Normalized::Quote { message, quote });
    }

    Some(Normalized::Regular { message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_group_data_message() {
        let frame = r#"{"envelope":{"source":"u1","sourceUuid":"u1","sourceName":"Alice","timestamp":1000,
            "dataMessage":{"message":"hi","groupInfo":{"groupId":"G1","groupName":"Dev"}}}}"#;
        let env = decode(frame).unwrap();
        match env {
            Envelope::GroupDataMessage(m) => {
                assert_eq!(m.text, "hi");
                assert_eq!(m.group_id, "G1");
                assert_eq!(m.display_name, "Alice");
                assert_eq!(m.timestamp, 1000);
            }
            other => panic!("expected GroupDataMessage, got {other:?}"),
        }
    }

    #[test]
    fn drops_non_group_frame() {
        let frame = r#"{"envelope":{"source":"u1","timestamp":1000,
            "dataMessage":{"message":"dm"}}}"#;
        let env = decode(frame).unwrap();
        assert!(matches!(env, Envelope::NonGroup));
        assert!(normalize(env).is_none());
    }

    #[test]
    fn drops_receipt_message() {
        let frame = r#"{"envelope":{"source":"u1","timestamp":1000,"receiptMessage":{"type":"DELIVERY"}}}"#;
        let env = decode(frame).unwrap();
        assert!(matches!(env, Envelope::NonGroup));
    }

    #[test]
    fn display_name_falls_back_to_uuid_when_empty() {
        let frame = r#"{"envelope":{"source":"+15550001111","sourceUuid":"abc-uuid","sourceName":"","timestamp":5,
            "dataMessage":{"message":"hey","groupInfo":{"groupId":"G1"}}}}"#;
        let env = decode(frame).unwrap();
        match env {
            Envelope::GroupDataMessage(m) => assert_eq!(m.display_name, "abc-uuid"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn reaction_remove_normalizes_to_reaction_remove() {
        let frame = r#"{"envelope":{"source":"u1","sourceUuid":"u1","timestamp":2100,
            "dataMessage":{"groupInfo":{"groupId":"G1"},
            "reaction":{"emoji":"👍","targetAuthorUuid":"u2","targetSentTimestamp":1500,"isRemove":true}}}}"#;
        let env = decode(frame).unwrap();
        let normalized = normalize(env).unwrap();
        assert!(matches!(normalized, Normalized::ReactionRemove { .. }));
    }

    #[test]
    fn reaction_apply_normalizes_to_reaction_apply() {
        let frame = r#"{"envelope":{"source":"u1","sourceUuid":"u1","timestamp":2000,
            "dataMessage":{"groupInfo":{"groupId":"G1"},
            "reaction":{"emoji":"👍","targetAuthorUuid":"u2","targetSentTimestamp":1500,"isRemove":false}}}}"#;
        let env = decode(frame).unwrap();
        let normalized = normalize(env).unwrap();
        assert!(matches!(normalized, Normalized::ReactionApply { .. }));
    }

    #[test]
    fn quote_message_normalizes_to_quote() {
        let frame = r#"{"envelope":{"source":"u1","sourceUuid":"u1","timestamp":3000,
            "dataMessage":{"message":"+1","groupInfo":{"groupId":"G1"},
            "quote":{"id":1000,"authorUuid":"u2","text":"original"}}}}"#;
        let env = decode(frame).unwrap();
        let normalized = normalize(env).unwrap();
        match normalized {
            Normalized::Quote { quote, .. } => {
                assert_eq!(quote.quote_id, 1000);
                assert_eq!(quote.text, "original");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn sync_sent_message_attributed_to_source() {
        let frame = r#"{"envelope":{"source":"u1","sourceUuid":"u1","timestamp":4000,
            "syncMessage":{"sentMessage":{"message":"from linked device","groupInfo":{"groupId":"G1"}}}}}"#;
        let env = decode(frame).unwrap();
        match env {
            Envelope::GroupSentMessage(m) => assert_eq!(m.text, "from linked device"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn malformed_json_surfaces_as_error_not_panic() {
        let frame = "{not json";
        assert!(decode(frame).is_err());
    }
}
