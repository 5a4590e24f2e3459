use serde::Deserialize;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

use super::models::CommentPayload;

/// What a push connection is scoped to. The transport (a persistent duplex
/// connection owned by the host environment) is an external collaborator;
/// this module only owns the consumed contract: the paths and the envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushScope {
    Feed,
    Thread(String),
}

impl PushScope {
    pub fn path(&self) -> String {
        match self {
            PushScope::Feed => "/ws/comments/".to_string(),
            PushScope::Thread(id) => format!("/ws/comments/{id}/"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    comment: Option<CommentPayload>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    CommentCreated(CommentPayload),
    ReplyCreated(CommentPayload),
}

/// Decode one raw frame. Unrecognized types and malformed frames are
/// dropped, not errors: the channel may carry newer message kinds.
pub fn decode_event(raw: &str) -> Option<PushEvent> {
    let envelope: Envelope = match serde_json::from_str(raw) {
        Ok(envelope) => envelope,
        Err(err) => {
            debug!(error = %err, "dropping undecodable push frame");
            return None;
        }
    };
    match envelope.kind.as_str() {
        "comment_created" => envelope.comment.map(PushEvent::CommentCreated),
        "reply_created" => envelope.comment.map(PushEvent::ReplyCreated),
        other => {
            debug!(kind = other, "ignoring unrecognized push message type");
            None
        }
    }
}

/// A scoped stream of decoded push events. Created fresh on every
/// navigation; dropping the previous subscription is the teardown — frames
/// a transport still sends to the old sender go nowhere.
pub struct PushSubscription {
    scope: PushScope,
    rx: UnboundedReceiver<String>,
}

impl PushSubscription {
    pub fn attach(scope: PushScope) -> (UnboundedSender<String>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { scope, rx })
    }

    pub fn scope(&self) -> &PushScope {
        &self.scope
    }

    /// Next decodable event, skipping ignored frames. `None` once every
    /// sender is gone.
    pub async fn next_event(&mut self) -> Option<PushEvent> {
        while let Some(raw) = self.rx.recv().await {
            if let Some(event) = decode_event(&raw) {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_comment_created() {
        let raw = r#"{"type": "comment_created", "comment": {"id": "c9", "text": "hi", "created": "2024-01-01T00:00:00Z"}}"#;
        match decode_event(raw) {
            Some(PushEvent::CommentCreated(payload)) => assert_eq!(payload.id, "c9"),
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn decodes_reply_created() {
        let raw = r#"{"type": "reply_created", "comment": {"id": "r1", "parent": "c9", "created": "2024-01-01T00:00:00Z"}}"#;
        match decode_event(raw) {
            Some(PushEvent::ReplyCreated(payload)) => {
                assert_eq!(payload.parent.as_deref(), Some("c9"));
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
    }

    #[test]
    fn ignores_unknown_types_and_garbage() {
        assert_eq!(
            decode_event(r#"{"type": "presence_changed", "comment": null}"#),
            None
        );
        assert_eq!(decode_event("not json at all"), None);
        // Recognized type but no payload: nothing to merge.
        assert_eq!(decode_event(r#"{"type": "comment_created"}"#), None);
    }

    #[test]
    fn scope_paths_match_the_channel_contract() {
        assert_eq!(PushScope::Feed.path(), "/ws/comments/");
        assert_eq!(
            PushScope::Thread("abc".to_string()).path(),
            "/ws/comments/abc/"
        );
    }

    #[tokio::test]
    async fn subscription_skips_ignored_frames() {
        let (tx, mut sub) = PushSubscription::attach(PushScope::Feed);
        tx.send(r#"{"type": "noise"}"#.to_string()).unwrap();
        tx.send(
            r#"{"type": "comment_created", "comment": {"id": "c1", "created": "2024-01-01T00:00:00Z"}}"#
                .to_string(),
        )
        .unwrap();
        match sub.next_event().await {
            Some(PushEvent::CommentCreated(payload)) => assert_eq!(payload.id, "c1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
