use crate::error::{Result, SyncError};
use crate::types::{ConversationId, SubmitRequest};

/// Composer state of one conversation: draft text, attachments and the
/// selected model. Owned by the caller and handed to
/// [`SyncHandle::submit_context`](crate::SyncHandle::submit_context).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationContext {
    conversation: Option<ConversationId>,
    pub draft: String,
    pub attachments: Vec<String>,
    pub model: Option<String>,
}

impl ConversationContext {
    pub fn new(conversation: ConversationId) -> Self {
        ConversationContext {
            conversation: Some(conversation),
            ..Default::default()
        }
    }

    /// Context for a conversation the server has not issued an id for yet.
    pub fn unsaved() -> Self {
        Self::default()
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    pub fn set_draft(&mut self, draft: impl Into<String>) {
        self.draft = draft.into();
    }

    pub fn attach(&mut self, file_id: impl Into<String>) {
        self.attachments.push(file_id.into());
    }

    pub fn set_model(&mut self, model: Option<String>) {
        self.model = model;
    }

    /// Move the draft and attachments into a request, leaving the composer
    /// empty. A blank draft is rejected and left untouched.
    pub fn take_request(&mut self) -> Result<SubmitRequest> {
        if self.draft.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let mut request = SubmitRequest::new(std::mem::take(&mut self.draft))
            .with_attachments(std::mem::take(&mut self.attachments));
        request.model = self.model.clone();
        Ok(request)
    }

    /// Put a failed request back so the user can retry it.
    pub fn restore(&mut self, request: SubmitRequest) {
        if self.draft.is_empty() {
            self.draft = request.content;
        }
        if self.attachments.is_empty() {
            self.attachments = request.attachments;
        }
    }

    /// Record the id issued for an unsaved conversation.
    pub fn adopt(&mut self, conversation: ConversationId) {
        if self.conversation.is_none() {
            self.conversation = Some(conversation);
        }
    }
}
