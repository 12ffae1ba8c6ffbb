//! Optimistic submit: the provisional entry, the REST round trip, and
//! reconciliation or rollback of the result.

use crate::error::{Result, SyncError};
use crate::sync::store::{ReconciliationStore, StoreSnapshot};
use crate::traits::ChatApi;
use crate::types::{ConversationId, Message, MessageId, NewConversation, Role, SubmitRequest};
use std::sync::Arc;
use tokio::sync::oneshot;

/// What a submit reports back to its caller.
pub(crate) struct Delivery {
    /// Conversation the message was posted to, once it got that far.
    pub conversation: Option<ConversationId>,
    pub result: Result<Vec<Message>>,
}

impl Delivery {
    pub fn rejected(error: SyncError) -> Self {
        Delivery {
            conversation: None,
            result: Err(error),
        }
    }
}

/// State carried by a submit while its request is in flight.
pub(crate) struct PendingSubmit {
    /// Conversation epoch the submit was issued in.
    pub epoch: u64,
    pub provisional_id: MessageId,
    /// Store contents from just before the provisional insert.
    pub snapshot: StoreSnapshot,
    pub reply: oneshot::Sender<Delivery>,
}

impl PendingSubmit {
    pub fn answer(self, conversation: Option<ConversationId>, result: Result<Vec<Message>>) {
        let _ = self.reply.send(Delivery {
            conversation,
            result,
        });
    }
}

/// A conversation being created for an unsaved submit. Submits made
/// before the id arrives wait here instead of creating their own.
pub(crate) struct PendingCreation {
    pub epoch: u64,
    /// Provisional id of the submit whose request creates the conversation.
    pub creator: MessageId,
    pub queued: Vec<(SubmitRequest, PendingSubmit)>,
}

pub(crate) enum SubmitEvent {
    /// An unsaved conversation got its server id.
    ConversationCreated {
        epoch: u64,
        conversation: ConversationId,
    },
    Finished {
        pending: PendingSubmit,
        /// `None` when the conversation could not be created.
        conversation: Option<ConversationId>,
        result: Result<Vec<Message>>,
    },
}

/// Insert the provisional entry and capture the rollback snapshot.
pub(crate) fn begin(
    store: &mut ReconciliationStore,
    request: &SubmitRequest,
    epoch: u64,
    reply: oneshot::Sender<Delivery>,
) -> PendingSubmit {
    let snapshot = store.snapshot();
    let provisional = Message::provisional(store.conversation().cloned(), request.content.clone());
    let provisional_id = provisional.uuid.clone();
    store.upsert(provisional);

    PendingSubmit {
        epoch,
        provisional_id,
        snapshot,
        reply,
    }
}

/// Network half of a submit. Creates the conversation first when there is
/// none, then posts the message.
pub(crate) async fn deliver<F>(
    api: Arc<dyn ChatApi>,
    conversation: Option<ConversationId>,
    request: SubmitRequest,
    pending: PendingSubmit,
    emit: F,
) where
    F: Fn(SubmitEvent),
{
    let conversation = match conversation {
        Some(conversation) => conversation,
        None => match api.create_conversation(&NewConversation::default()).await {
            Ok(conversation) => {
                emit(SubmitEvent::ConversationCreated {
                    epoch: pending.epoch,
                    conversation: conversation.clone(),
                });
                conversation
            }
            Err(e) => {
                emit(SubmitEvent::Finished {
                    pending,
                    conversation: None,
                    result: Err(e),
                });
                return;
            }
        },
    };

    let result = api.post_message(&conversation, &request).await;
    emit(SubmitEvent::Finished {
        pending,
        conversation: Some(conversation),
        result,
    });
}

/// Merge the server's answer. The first user message replaces the
/// provisional entry; everything else is upserted.
pub(crate) fn apply_success(
    store: &mut ReconciliationStore,
    provisional_id: &MessageId,
    messages: &[Message],
) {
    let mut resolved = false;
    for message in messages.iter().cloned() {
        if !resolved && message.role == Role::User {
            store.resolve_provisional(provisional_id, message);
            resolved = true;
        } else {
            store.upsert(message);
        }
    }
    if !resolved {
        store.confirm_provisional(provisional_id);
    }
}

/// Undo a failed submit. The snapshot is restored only if nothing else
/// touched the store in the meantime; otherwise just the provisional entry
/// goes.
pub(crate) fn roll_back(
    store: &mut ReconciliationStore,
    snapshot: StoreSnapshot,
    provisional_id: &MessageId,
) {
    if store.version() == snapshot.version() + 1 {
        store.restore(snapshot);
    } else {
        store.remove(provisional_id);
    }
}
