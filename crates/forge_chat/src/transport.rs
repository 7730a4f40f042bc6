//! Chat transport contract.
//!
//! The front end (Telegram, console, tests) implements these three
//! operations; the pipeline never needs delivery receipts or read state.

use async_trait::async_trait;

use crate::error::ChatResult;

/// Opaque chat/conversation identifier assigned by the front end.
pub type ChatId = i64;

/// Handle to a delivered message, usable for later edits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// The three operations the pipeline needs from any chat front end.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Deliver a new message, returning a reference for later edits.
    async fn send_text(&self, chat_id: ChatId, text: &str) -> ChatResult<MessageRef>;

    /// Replace the text of a previously delivered message.
    async fn edit_text(&self, message: &MessageRef, text: &str) -> ChatResult<()>;

    /// Acknowledge an inline-button callback so the front end stops its
    /// spinner.
    async fn answer_callback(&self, query_id: &str) -> ChatResult<()>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Recording transport for pipeline tests.

    use std::sync::atomic::{AtomicI64, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// Captures every transport call for later assertions.
    #[derive(Default)]
    pub struct RecordingTransport {
        next_id: AtomicI64,
        pub sent: Mutex<Vec<(ChatId, String)>>,
        pub edited: Mutex<Vec<(MessageRef, String)>>,
        pub answered: Mutex<Vec<String>>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn sent_texts(&self) -> Vec<String> {
            self.sent.lock().iter().map(|(_, text)| text.clone()).collect()
        }

        pub fn edited_texts(&self) -> Vec<String> {
            self.edited.lock().iter().map(|(_, text)| text.clone()).collect()
        }
    }

    #[async_trait]
    impl ChatTransport for RecordingTransport {
        async fn send_text(&self, chat_id: ChatId, text: &str) -> ChatResult<MessageRef> {
            self.sent.lock().push((chat_id, text.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            })
        }

        async fn edit_text(&self, message: &MessageRef, text: &str) -> ChatResult<()> {
            self.edited.lock().push((message.clone(), text.to_string()));
            Ok(())
        }

        async fn answer_callback(&self, query_id: &str) -> ChatResult<()> {
            self.answered.lock().push(query_id.to_string());
            Ok(())
        }
    }
}
