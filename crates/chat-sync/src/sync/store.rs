//! Ordered, keyed message collection for the active conversation.
//!
//! The store is the single source of truth the UI renders from. It is owned
//! by the controller; everything else sees published copies.

use crate::types::{ConversationId, Message, MessageId, Role};

/// What an [`ReconciliationStore::upsert`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New id, appended at the end.
    Inserted,
    /// Existing entry replaced in place.
    Replaced,
    /// Identical entry already present.
    Unchanged,
    /// Stale in-progress copy of a finalized entry; ignored.
    KeptFinalized,
    /// Server copy of an optimistic send took over the provisional slot.
    AdoptedProvisional,
    /// Message belongs to another conversation; rejected.
    ForeignConversation,
}

/// Captured store contents for rollback.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    version: u64,
    messages: Vec<Message>,
}

impl StoreSnapshot {
    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default)]
pub struct ReconciliationStore {
    conversation: Option<ConversationId>,
    messages: Vec<Message>,
    version: u64,
}

impl ReconciliationStore {
    pub fn new(conversation: Option<ConversationId>) -> Self {
        ReconciliationStore {
            conversation,
            messages: Vec::new(),
            version: 0,
        }
    }

    pub fn conversation(&self) -> Option<&ConversationId> {
        self.conversation.as_ref()
    }

    /// Messages in display order.
    pub fn read(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Bumped on every mutation.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| &m.uuid == id)
    }

    /// The in-progress assistant message, if any.
    pub fn in_flight(&self) -> Option<&Message> {
        self.messages.iter().find(|m| m.is_in_flight())
    }

    pub fn pending_provisionals(&self) -> usize {
        self.messages.iter().filter(|m| m.provisional).count()
    }

    /// Empty the store and bind it to another conversation.
    pub fn reset(&mut self, conversation: Option<ConversationId>) {
        self.conversation = conversation;
        self.messages.clear();
        self.bump();
    }

    /// Bind an unsaved conversation to its server-issued id, keeping the
    /// entries created while it had none.
    pub fn rebind(&mut self, conversation: ConversationId) {
        for message in &mut self.messages {
            if message.chat_id.is_none() {
                message.chat_id = Some(conversation.clone());
            }
        }
        self.conversation = Some(conversation);
        self.bump();
    }

    fn bump(&mut self) {
        self.version += 1;
    }

    fn is_foreign(&self, message: &Message) -> bool {
        match &message.chat_id {
            Some(chat_id) => self.conversation.as_ref() != Some(chat_id),
            None => false,
        }
    }

    pub fn upsert(&mut self, message: Message) -> UpsertOutcome {
        if self.is_foreign(&message) {
            tracing::warn!(
                message = %message.uuid,
                chat_id = ?message.chat_id,
                conversation = ?self.conversation,
                "Rejecting message from another conversation"
            );
            return UpsertOutcome::ForeignConversation;
        }

        let outcome = if let Some(index) = self.position(&message.uuid) {
            let existing = &self.messages[index];
            if existing.is_finalized() && message.in_progress {
                tracing::debug!(message = %message.uuid, "Ignoring stale in-progress copy");
                return UpsertOutcome::KeptFinalized;
            }
            if *existing == message {
                return UpsertOutcome::Unchanged;
            }
            self.messages[index] = message;
            self.settle_in_flight(index);
            UpsertOutcome::Replaced
        } else if let Some(index) = self.matching_provisional(&message) {
            tracing::debug!(message = %message.uuid, "Server copy adopted provisional entry");
            self.messages[index] = message;
            self.settle_in_flight(index);
            UpsertOutcome::AdoptedProvisional
        } else {
            self.messages.push(message);
            let index = self.messages.len() - 1;
            self.settle_in_flight(index);
            UpsertOutcome::Inserted
        };

        self.bump();
        outcome
    }

    /// Authoritative swap. Provisional entries the server does not know yet
    /// are kept at the end.
    pub fn replace_all(&mut self, messages: Vec<Message>) {
        let mut incoming: Vec<Message> = Vec::with_capacity(messages.len());
        for message in messages {
            if self.is_foreign(&message) {
                tracing::warn!(
                    message = %message.uuid,
                    chat_id = ?message.chat_id,
                    "Dropping snapshot entry from another conversation"
                );
                continue;
            }
            incoming.push(message);
        }

        // Each server user message confirms at most one provisional entry.
        let mut unmatched: Vec<&Message> = incoming
            .iter()
            .filter(|m| m.role == Role::User && !m.provisional)
            .filter(|m| !self.messages.iter().any(|old| old.uuid == m.uuid))
            .collect();
        let mut kept = Vec::new();
        for pending in self.messages.iter().filter(|m| m.provisional) {
            match unmatched.iter().position(|m| m.content == pending.content) {
                Some(pos) => {
                    unmatched.swap_remove(pos);
                }
                None => kept.push(pending.clone()),
            }
        }

        // Server state is taken as is, including its in-progress flags.
        self.messages = incoming;
        self.messages.extend(kept);
        self.bump();
    }

    /// Replace a provisional entry with the canonical message the server
    /// returned for it.
    pub fn resolve_provisional(
        &mut self,
        provisional_id: &MessageId,
        canonical: Message,
    ) -> UpsertOutcome {
        if self.is_foreign(&canonical) {
            return self.upsert(canonical);
        }

        let provisional = self
            .position(provisional_id)
            .filter(|&i| self.messages[i].provisional);

        match provisional {
            Some(index) if self.position(&canonical.uuid).is_none() => {
                self.messages[index] = canonical;
                self.settle_in_flight(index);
                self.bump();
                UpsertOutcome::AdoptedProvisional
            }
            Some(index) => {
                // The canonical copy already arrived on the stream.
                self.messages.remove(index);
                self.bump();
                self.upsert(canonical);
                UpsertOutcome::AdoptedProvisional
            }
            None => self.upsert(canonical),
        }
    }

    /// Mark a provisional entry as accepted without a server copy.
    pub fn confirm_provisional(&mut self, provisional_id: &MessageId) -> bool {
        match self.position(provisional_id) {
            Some(index) if self.messages[index].provisional => {
                self.messages[index].provisional = false;
                self.bump();
                true
            }
            _ => false,
        }
    }

    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let index = self.position(id)?;
        let removed = self.messages.remove(index);
        self.bump();
        Some(removed)
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            version: self.version,
            messages: self.messages.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: StoreSnapshot) {
        self.messages = snapshot.messages;
        self.bump();
    }

    fn position(&self, id: &MessageId) -> Option<usize> {
        self.messages.iter().position(|m| &m.uuid == id)
    }

    fn matching_provisional(&self, message: &Message) -> Option<usize> {
        if message.role != Role::User || message.provisional {
            return None;
        }
        self.messages
            .iter()
            .position(|m| m.provisional && m.content == message.content)
    }

    /// Keep at most one in-flight assistant message: the one at `index` wins.
    fn settle_in_flight(&mut self, index: usize) {
        if !self.messages[index].is_in_flight() {
            return;
        }
        let winner = self.messages[index].uuid.clone();
        for message in self.messages.iter_mut() {
            if message.is_in_flight() && message.uuid != winner {
                tracing::warn!(
                    superseded = %message.uuid,
                    by = %winner,
                    "Second in-flight assistant message, finalizing the older one"
                );
                message.in_progress = false;
            }
        }
    }
}
