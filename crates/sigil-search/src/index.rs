//! Persisted search index record shapes.
//!
//! One [`SearchIndexData`] per owner, stored sealed.  Remote sync delivers
//! partial message-keyword maps ("deltas") in the same camelCase JSON shape
//! the other clients write.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use sigil_shared::ConversationId;

/// Keyword entry for one indexed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MessageIndexEntry {
    pub conversation_id: ConversationId,
    /// Keywordized user-authored content.
    pub content: String,
}

/// Keyword entry for one conversation title.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ConversationIndexEntry {
    /// Keywordized title.
    pub title: String,
}

/// The full per-owner index: message-id and conversation-id keyword maps.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SearchIndexData {
    #[serde(default)]
    pub messages: HashMap<String, MessageIndexEntry>,
    #[serde(default)]
    pub conversations: HashMap<String, ConversationIndexEntry>,
}

impl SearchIndexData {
    /// Shallow-merge a partial message-keyword map into this index.
    /// Existing entries with the same message id are overwritten.
    pub fn merge_message_delta(&mut self, delta: HashMap<String, MessageIndexEntry>) {
        self.messages.extend(delta);
    }

    /// Drop every entry belonging to a conversation.
    pub fn remove_conversation(&mut self, conversation_id: &ConversationId) {
        self.conversations.remove(&conversation_id.0);
        self.messages
            .retain(|_, entry| &entry.conversation_id != conversation_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(conversation: &str, content: &str) -> MessageIndexEntry {
        MessageIndexEntry {
            conversation_id: ConversationId(conversation.to_string()),
            content: content.to_string(),
        }
    }

    #[test]
    fn merge_overwrites_same_message_id() {
        let mut index = SearchIndexData::default();
        index.messages.insert("m1".into(), entry("c1", "old keywords"));

        index.merge_message_delta(HashMap::from([("m1".to_string(), entry("c1", "new keywords"))]));

        assert_eq!(index.messages["m1"].content, "new keywords");
    }

    #[test]
    fn remove_conversation_drops_messages_and_title() {
        let mut index = SearchIndexData::default();
        index.conversations.insert(
            "c1".into(),
            ConversationIndexEntry { title: "gas fees".into() },
        );
        index.messages.insert("m1".into(), entry("c1", "hello"));
        index.messages.insert("m2".into(), entry("c2", "world"));

        index.remove_conversation(&ConversationId("c1".into()));

        assert!(index.conversations.is_empty());
        assert_eq!(index.messages.len(), 1);
        assert!(index.messages.contains_key("m2"));
    }

    #[test]
    fn deserializes_camel_case_delta_blob() {
        let json = r#"{"m1":{"conversationId":"c1","content":"bitcoin market"}}"#;
        let delta: HashMap<String, MessageIndexEntry> = serde_json::from_str(json).unwrap();
        assert_eq!(delta["m1"].conversation_id, ConversationId("c1".into()));
    }
}
