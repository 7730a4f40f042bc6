//! Console implementations of the external collaborator contracts.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;

use forge_chat::{
    ChatId, ChatResult, ChatTransport, MessageRef, PageAnalysisOutcome, PageAnalyzer,
};

/// Chat transport that prints to the terminal.
pub struct ConsoleTransport {
    next_id: AtomicI64,
}

impl ConsoleTransport {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
        }
    }
}

impl Default for ConsoleTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChatTransport for ConsoleTransport {
    async fn send_text(&self, chat_id: ChatId, text: &str) -> ChatResult<MessageRef> {
        println!("\n🤖 {}\n", text);
        Ok(MessageRef {
            chat_id,
            message_id: self.next_id.fetch_add(1, Ordering::Relaxed),
        })
    }

    async fn edit_text(&self, _message: &MessageRef, text: &str) -> ChatResult<()> {
        // No in-place edits on a scrolling terminal; print the new revision.
        println!("\n🤖 {}\n", text);
        Ok(())
    }

    async fn answer_callback(&self, _query_id: &str) -> ChatResult<()> {
        Ok(())
    }
}

/// Placeholder used when no page-analyzer service is configured: every URL
/// comes back as a soft failure, and the conversation continues without
/// page insight.
pub struct UnconfiguredPageAnalyzer;

#[async_trait]
impl PageAnalyzer for UnconfiguredPageAnalyzer {
    async fn analyze(&self, _url: &str) -> PageAnalysisOutcome {
        PageAnalysisOutcome::failure("page analyzer not configured")
    }
}
