//! Summarization orchestrator: anonymize → format → prompt → provider call →
//! sanitize → de-anonymize → persist.

use std::collections::HashSet;
use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::prompt::{build_prompt, sanitize};
use crate::provider::{Provider, ProviderError};
use crate::store::{Message, MessageKind, Store, StoreError};

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("provider rejected the request (status {status})")]
    ProviderRejected { status: u16 },
    #[error("provider returned an empty completion")]
    ProviderEmpty,
    #[error("provider call timed out")]
    ProviderTimeout,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(msg) => OrchestratorError::ProviderUnavailable(msg),
            ProviderError::Rejected { status, .. } => OrchestratorError::ProviderRejected { status },
            ProviderError::Empty => OrchestratorError::ProviderEmpty,
            ProviderError::Timeout => OrchestratorError::ProviderTimeout,
        }
    }
}

static USER_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"user_(\d+)").expect("static pattern"));

/// Formats messages in timestamp order as anonymized, line-separated records.
/// Group names are never included — only `user_<id>` references.
fn format_conversation(messages: &[Message]) -> String {
    let mut lines = Vec::with_capacity(messages.len());
    for m in messages {
        match m.kind {
            MessageKind::Regular => {
                if !m.text.is_empty() {
                    lines.push(format!("user_{}: {}", m.user_id, m.text));
                }
            }
            MessageKind::Quote => {
                let quoted = m.quote_text.as_deref().unwrap_or_default();
                lines.push(format!(
                    "user_{} (replying to: \"{}\"): {}",
                    m.user_id, quoted, m.text
                ));
            }
            MessageKind::Reaction => {
                if let Some(emoji) = &m.reaction_emoji {
                    if !emoji.is_empty() {
                        lines.push(format!("user_{} reacted with {emoji}", m.user_id));
                    }
                }
            }
        }
    }
    lines.join("\n")
}

/// Replaces every `user_<id>` token with the display name the Store has on
/// file for it, falling back to `"User <id>"` for unknown ids. A Store error
/// for one id never aborts substitution of the remaining ids.
async fn deanonymize(store: &Store, text: &str) -> String {
    let ids: HashSet<i64> = USER_TOKEN
        .captures_iter(text)
        .filter_map(|c| c.get(1)?.as_str().parse::<i64>().ok())
        .collect();

    let mut names = std::collections::HashMap::with_capacity(ids.len());
    for id in ids {
        names.insert(id, store.user_name_by_id(id).await);
    }

    USER_TOKEN
        .replace_all(text, |c: &regex::Captures| {
            c[1].parse::<i64>()
                .ok()
                .and_then(|id| names.get(&id).cloned())
                .unwrap_or_else(|| c[0].to_string())
        })
        .into_owned()
}

/// Produces and returns the de-anonymized summary text for one group's
/// window. Persistence (`SaveSummary`) is the caller's responsibility — kept
/// separate so the scheduler can skip saving an empty-window tick.
pub async fn summarize(
    store: &Store,
    provider: &dyn Provider,
    messages: &[Message],
    deadline: Duration,
) -> Result<String, OrchestratorError> {
    let formatted = format_conversation(messages);
    let prompt = build_prompt(&formatted);

    let raw = provider.complete(&prompt, deadline).await?;
    let sanitized = sanitize(&raw);
    Ok(deanonymize(store, &sanitized).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Author;
    use crate::provider::ProviderError;

    struct StubProvider {
        response: Result<String, ProviderError>,
    }

    #[async_trait::async_trait]
    impl Provider for StubProvider {
        async fn complete(&self, _prompt: &str, _deadline: Duration) -> Result<String, ProviderError> {
            match &self.response {
                Ok(s) => Ok(s.clone()),
                Err(ProviderError::Empty) => Err(ProviderError::Empty),
                Err(ProviderError::Timeout) => Err(ProviderError::Timeout),
                Err(ProviderError::Unavailable(m)) => Err(ProviderError::Unavailable(m.clone())),
                Err(ProviderError::Rejected { status, body }) => Err(ProviderError::Rejected {
                    status: *status,
                    body: body.clone(),
                }),
            }
        }
    }

    fn sample_messages() -> Vec<Message> {
        vec![
            Message {
                id: 1,
                user_id: 1,
                timestamp: 1000,
                text: "hello there".into(),
                kind: MessageKind::Regular,
                quote_text: None,
                reaction_emoji: None,
            },
            Message {
                id: 2,
                user_id: 2,
                timestamp: 1500,
                text: String::new(),
                kind: MessageKind::Reaction,
                quote_text: None,
                reaction_emoji: Some("👍".into()),
            },
        ]
    }

    #[test]
    fn format_conversation_uses_anonymized_ids_only() {
        let formatted = format_conversation(&sample_messages());
        assert!(formatted.contains("user_1: hello there"));
        assert!(formatted.contains("user_2 reacted with"));
    }

    #[test]
    fn prompt_never_contains_display_names() {
        let formatted = format_conversation(&sample_messages());
        let prompt = build_prompt(&formatted);
        assert!(!prompt.contains("Alice"));
        assert!(prompt.contains("user_1"));
    }

    #[test]
    fn format_conversation_omits_empty_regular_and_empty_reaction() {
        let messages = vec![
            Message {
                id: 1,
                user_id: 1,
                timestamp: 1000,
                text: String::new(),
                kind: MessageKind::Regular,
                quote_text: None,
                reaction_emoji: None,
            },
            Message {
                id: 2,
                user_id: 2,
                timestamp: 1200,
                text: String::new(),
                kind: MessageKind::Reaction,
                quote_text: None,
                reaction_emoji: Some(String::new()),
            },
        ];
        assert_eq!(format_conversation(&messages), "");
    }

    #[tokio::test]
    async fn deanonymize_substitutes_known_and_falls_back_for_unknown() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let text = format!("user_{uid} said hi to user_9999");
        let out = deanonymize(&store, &text).await;
        assert!(out.contains("Alice"));
        assert!(out.contains("User 9999"));
    }

    #[tokio::test]
    async fn summarize_propagates_provider_empty_as_orchestrator_empty() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let provider = StubProvider {
            response: Err(ProviderError::Empty),
        };
        let err = summarize(&store, &provider, &sample_messages(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, OrchestratorError::ProviderEmpty));
    }

    #[tokio::test]
    async fn summarize_returns_deanonymized_sanitized_text_on_success() {
        let store = Store::open_in_memory().unwrap();
        store.migrate().await.unwrap();
        let uid = store.ensure_user(&Author::Uuid("u1".into()), "Alice").await.unwrap();
        let provider = StubProvider {
            response: Ok(format!("**Key topics discussed**:\n- user_{uid} said hi\n")),
        };
        let text = summarize(&store, &provider, &sample_messages(), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(text.contains("## Key topics discussed"));
        assert!(text.contains("Alice"));
    }
}
