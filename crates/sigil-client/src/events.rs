//! Typed events streamed by the response-generation collaborator.
//!
//! The generator never touches the store directly; it emits these over a
//! channel and the data service applies them as the single writer to the
//! pending assistant message.

use sigil_shared::{ConversationId, MessageId, ReasoningStep, SourceLink};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// An incremental reasoning step for a pending assistant message.
    ReasoningStep {
        conversation_id: ConversationId,
        message_id: MessageId,
        step: ReasoningStep,
    },
    /// The final answer; the message stops being pending.
    FinalAnswer {
        conversation_id: ConversationId,
        message_id: MessageId,
        content: String,
        reasoning_duration: Option<i64>,
        sources: Vec<SourceLink>,
    },
}

impl ResponseEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            ResponseEvent::ReasoningStep { conversation_id, .. }
            | ResponseEvent::FinalAnswer { conversation_id, .. } => conversation_id,
        }
    }
}

/// Channel pair wiring a response generator to the data service.
pub fn response_channel() -> (
    mpsc::UnboundedSender<ResponseEvent>,
    mpsc::UnboundedReceiver<ResponseEvent>,
) {
    mpsc::unbounded_channel()
}
