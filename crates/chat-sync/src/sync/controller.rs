//! The sync controller: one task that owns the store, the stream connection
//! and every timer of the active conversation.
//!
//! ```text
//!            set_conversation(Some)             threshold reached
//!   IDLE ───────────────────────────▶ STREAMING ─────────────────▶ FALLBACK_POLLING
//!    ▲                                   ▲                           │        ▲
//!    │ set_conversation / shutdown       │ connected                 │ cool-down elapsed
//!    │ (from any state)                  │                           ▼        │ probe failed
//!    └───────────────────────────────  COOLING_DOWN ◀────────────────┘────────┘
//! ```
//!
//! Mutations are serialized through the controller's loop. Connections,
//! timers, poll loops and initial loads report back through an inbox, tagged
//! with the [`Ticket`] they were started under; anything whose ticket is no
//! longer held is dropped.

use crate::error::{Result, SyncError};
use crate::sync::config::SyncConfig;
use crate::sync::connection::{StreamConnection, StreamSignal};
use crate::sync::context::ConversationContext;
use crate::sync::store::ReconciliationStore;
use crate::sync::submit::{self, Delivery, PendingCreation, PendingSubmit, SubmitEvent};
use crate::sync::timer::{holds, Owned, TaskGuard, Ticket, TicketCounter};
use crate::traits::{ChatApi, StreamTransport};
use crate::types::{ConversationId, Message, StreamPayload, SubmitRequest};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncState {
    Idle,
    Streaming,
    FallbackPolling,
    CoolingDown,
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Streaming => "streaming",
            SyncState::FallbackPolling => "fallback-polling",
            SyncState::CoolingDown => "cooling-down",
        };
        f.write_str(name)
    }
}

/// Read-only view of the controller, published on every change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncStatus {
    pub conversation: Option<ConversationId>,
    pub state: SyncState,
    /// Live updates come from REST polling instead of the stream.
    pub fallback_active: bool,
    pub consecutive_failures: u32,
    pub cooldown_pending: bool,
    pub reconnect_pending: bool,
    pub polling: bool,
    pub connection_open: bool,
    /// The initial REST load is still outstanding.
    pub loading: bool,
}

impl SyncStatus {
    fn idle() -> Self {
        SyncStatus {
            conversation: None,
            state: SyncState::Idle,
            fallback_active: false,
            consecutive_failures: 0,
            cooldown_pending: false,
            reconnect_pending: false,
            polling: false,
            connection_open: false,
            loading: false,
        }
    }
}

enum Command {
    SetConversation {
        conversation: Option<ConversationId>,
        reply: oneshot::Sender<()>,
    },
    Submit {
        request: SubmitRequest,
        /// Conversation the caller composed for, if it has one.
        target: Option<ConversationId>,
        reply: oneshot::Sender<Delivery>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

enum Inbox {
    Stream { ticket: Ticket, signal: StreamSignal },
    CooldownElapsed { ticket: Ticket },
    Polled { ticket: Ticket, result: Result<Vec<Message>> },
    InitialLoad { ticket: Ticket, result: Result<Vec<Message>> },
    Submit(SubmitEvent),
}

/// Everything a session needs to start its resources.
struct Wiring {
    api: Arc<dyn ChatApi>,
    transport: Arc<dyn StreamTransport>,
    config: SyncConfig,
    tickets: TicketCounter,
    inbox: mpsc::UnboundedSender<Inbox>,
}

impl Wiring {
    fn open_connection(&mut self, conversation: &ConversationId) -> Owned<StreamConnection> {
        let ticket = self.tickets.issue();
        let inbox = self.inbox.clone();
        let connection = StreamConnection::open(
            self.transport.clone(),
            conversation.clone(),
            self.config.retry_config(),
            self.config.heartbeat(),
            move |signal| {
                let _ = inbox.send(Inbox::Stream { ticket, signal });
            },
        );
        Owned::new(ticket, connection)
    }

    fn start_cooldown(&mut self) -> Owned<TaskGuard> {
        let ticket = self.tickets.issue();
        let inbox = self.inbox.clone();
        let cooldown = self.config.cooldown();
        let guard = TaskGuard::spawn(async move {
            tokio::time::sleep(cooldown).await;
            let _ = inbox.send(Inbox::CooldownElapsed { ticket });
        });
        Owned::new(ticket, guard)
    }

    /// Fixed-interval REST polling. The first request goes out immediately.
    fn start_polling(&mut self, conversation: &ConversationId) -> Owned<TaskGuard> {
        let ticket = self.tickets.issue();
        let inbox = self.inbox.clone();
        let api = self.api.clone();
        let conversation = conversation.clone();
        let period = self.config.poll_interval();
        let guard = TaskGuard::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                let result = api.list_messages(&conversation).await;
                if inbox.send(Inbox::Polled { ticket, result }).is_err() {
                    break;
                }
            }
        });
        Owned::new(ticket, guard)
    }

    fn start_initial_load(&mut self, conversation: &ConversationId) -> Owned<TaskGuard> {
        let ticket = self.tickets.issue();
        let inbox = self.inbox.clone();
        let api = self.api.clone();
        let conversation = conversation.clone();
        let guard = TaskGuard::spawn(async move {
            let result = api.list_messages(&conversation).await;
            let _ = inbox.send(Inbox::InitialLoad { ticket, result });
        });
        Owned::new(ticket, guard)
    }
}

/// Resources of the active conversation.
struct Session {
    conversation: ConversationId,
    state: SyncState,
    fallback_active: bool,
    consecutive_failures: u32,
    reconnect_pending: bool,
    snapshot_applied: bool,
    connection: Option<Owned<StreamConnection>>,
    cooldown: Option<Owned<TaskGuard>>,
    poll: Option<Owned<TaskGuard>>,
    initial_load: Option<Owned<TaskGuard>>,
}

impl Session {
    fn start(wiring: &mut Wiring, conversation: ConversationId) -> Self {
        let connection = wiring.open_connection(&conversation);
        let initial_load = wiring.start_initial_load(&conversation);
        Session {
            conversation,
            state: SyncState::Streaming,
            fallback_active: false,
            consecutive_failures: 0,
            reconnect_pending: false,
            snapshot_applied: false,
            connection: Some(connection),
            cooldown: None,
            poll: None,
            initial_load: Some(initial_load),
        }
    }

    fn status(&self) -> SyncStatus {
        SyncStatus {
            conversation: Some(self.conversation.clone()),
            state: self.state,
            fallback_active: self.fallback_active,
            consecutive_failures: self.consecutive_failures,
            cooldown_pending: self.cooldown.is_some(),
            reconnect_pending: self.reconnect_pending,
            polling: self.poll.is_some(),
            connection_open: self.connection.is_some(),
            loading: self.initial_load.is_some(),
        }
    }

    fn close_connection(&mut self) {
        if let Some(owned) = self.connection.take() {
            owned.resource.close();
        }
        self.reconnect_pending = false;
    }

    /// Threshold reached: close the stream, then poll while the cool-down
    /// runs.
    fn enter_fallback(&mut self, wiring: &mut Wiring, failures: u32) {
        self.close_connection();
        self.consecutive_failures = failures;
        self.fallback_active = true;
        self.state = SyncState::FallbackPolling;
        if self.poll.is_none() {
            self.poll = Some(wiring.start_polling(&self.conversation));
        }
        self.cooldown = Some(wiring.start_cooldown());
        tracing::info!(
            conversation = %self.conversation,
            failures,
            "Event stream unavailable, falling back to polling"
        );
    }

    fn on_connected(&mut self) {
        self.consecutive_failures = 0;
        self.reconnect_pending = false;
        if self.fallback_active {
            tracing::info!(conversation = %self.conversation, "Event stream recovered, stopping poll");
        }
        self.poll = None;
        self.cooldown = None;
        self.fallback_active = false;
        self.state = SyncState::Streaming;
    }

    fn on_failed(&mut self, wiring: &mut Wiring, consecutive: u32) {
        self.consecutive_failures = consecutive;
        if self.state == SyncState::CoolingDown {
            tracing::info!(
                conversation = %self.conversation,
                "Stream probe failed, polling for another cool-down"
            );
            self.close_connection();
            self.state = SyncState::FallbackPolling;
            self.cooldown = Some(wiring.start_cooldown());
        } else {
            self.reconnect_pending = true;
        }
    }

    fn on_cooldown_elapsed(&mut self, wiring: &mut Wiring) {
        self.cooldown = None;
        if self.state != SyncState::FallbackPolling {
            return;
        }
        tracing::info!(conversation = %self.conversation, "Cool-down elapsed, probing event stream");
        self.consecutive_failures = 0;
        self.state = SyncState::CoolingDown;
        self.connection = Some(wiring.open_connection(&self.conversation));
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        // Stream first, then timers, then polling.
        self.close_connection();
        self.cooldown.take();
        self.poll.take();
        self.initial_load.take();
    }
}

pub struct SyncController {
    wiring: Wiring,
    store: ReconciliationStore,
    session: Option<Session>,
    /// Bumped on every conversation switch; in-flight submits from an older
    /// epoch are not applied.
    epoch: u64,
    /// At most one per epoch.
    creations: Vec<PendingCreation>,
    commands: mpsc::Receiver<Command>,
    inbox: mpsc::UnboundedReceiver<Inbox>,
    messages_tx: watch::Sender<Arc<[Message]>>,
    status_tx: watch::Sender<SyncStatus>,
    published_version: u64,
}

impl SyncController {
    /// Start the controller task. It runs until [`SyncHandle::shutdown`] or
    /// until every handle is dropped.
    pub fn spawn(
        api: Arc<dyn ChatApi>,
        transport: Arc<dyn StreamTransport>,
        config: SyncConfig,
    ) -> SyncHandle {
        let (commands_tx, commands) = mpsc::channel(32);
        let (inbox_tx, inbox) = mpsc::unbounded_channel();
        let empty: Arc<[Message]> = Arc::from(Vec::new());
        let (messages_tx, messages_rx) = watch::channel(empty);
        let (status_tx, status_rx) = watch::channel(SyncStatus::idle());

        let controller = SyncController {
            wiring: Wiring {
                api,
                transport,
                config,
                tickets: TicketCounter::default(),
                inbox: inbox_tx,
            },
            store: ReconciliationStore::new(None),
            session: None,
            epoch: 0,
            creations: Vec::new(),
            commands,
            inbox,
            messages_tx,
            status_tx,
            published_version: 0,
        };
        tokio::spawn(controller.run());

        SyncHandle {
            commands: commands_tx,
            messages: messages_rx,
            status: status_rx,
        }
    }

    async fn run(mut self) {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.switch_to(None);
                        self.publish();
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.inbox.recv() => self.handle_inbox(event),
            }
            self.publish();
        }

        self.session = None;
        tracing::debug!("Sync controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::SetConversation {
                conversation,
                reply,
            } => {
                self.switch_to(conversation);
                self.publish();
                let _ = reply.send(());
            }
            Command::Submit {
                request,
                target,
                reply,
            } => self.submit(request, target, reply),
            Command::Shutdown { reply } => {
                self.switch_to(None);
                let _ = reply.send(());
            }
        }
    }

    fn handle_inbox(&mut self, event: Inbox) {
        match event {
            Inbox::Stream { ticket, signal } => self.on_stream(ticket, signal),
            Inbox::CooldownElapsed { ticket } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !holds(&session.cooldown, ticket) {
                    tracing::debug!(%ticket, "Ignoring stale cool-down");
                    return;
                }
                session.on_cooldown_elapsed(&mut self.wiring);
            }
            Inbox::Polled { ticket, result } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !holds(&session.poll, ticket) {
                    tracing::debug!(%ticket, "Ignoring stale poll result");
                    return;
                }
                match result {
                    Ok(messages) => {
                        tracing::debug!(
                            conversation = %session.conversation,
                            count = messages.len(),
                            "Applying poll result"
                        );
                        session.snapshot_applied = true;
                        self.store.replace_all(messages);
                    }
                    Err(e) => tracing::warn!(
                        conversation = %session.conversation,
                        "Poll failed, retrying next interval: {}",
                        e
                    ),
                }
            }
            Inbox::InitialLoad { ticket, result } => {
                let Some(session) = self.session.as_mut() else {
                    return;
                };
                if !holds(&session.initial_load, ticket) {
                    return;
                }
                session.initial_load = None;
                match result {
                    Ok(_) if session.snapshot_applied => tracing::debug!(
                        conversation = %session.conversation,
                        "Stream snapshot already applied, discarding initial load"
                    ),
                    Ok(messages) => {
                        session.snapshot_applied = true;
                        self.store.replace_all(messages);
                    }
                    Err(e) => tracing::warn!(
                        conversation = %session.conversation,
                        "Initial load failed: {}",
                        e
                    ),
                }
            }
            Inbox::Submit(event) => self.on_submit_event(event),
        }
    }

    fn on_stream(&mut self, ticket: Ticket, signal: StreamSignal) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if !holds(&session.connection, ticket) {
            tracing::debug!(%ticket, "Ignoring event from a closed stream");
            return;
        }

        match signal {
            StreamSignal::Connected => session.on_connected(),
            StreamSignal::Payload(StreamPayload::Snapshot { data }) => {
                tracing::debug!(
                    conversation = %session.conversation,
                    count = data.len(),
                    "Applying stream snapshot"
                );
                session.snapshot_applied = true;
                self.store.replace_all(data);
            }
            StreamSignal::Payload(StreamPayload::Message { data }) => {
                let id = data.uuid.clone();
                let outcome = self.store.upsert(data);
                tracing::debug!(conversation = %session.conversation, message = %id, ?outcome, "Upsert");
            }
            StreamSignal::Payload(StreamPayload::Heartbeat { .. }) => {}
            StreamSignal::Failed { consecutive, .. } => {
                session.on_failed(&mut self.wiring, consecutive);
            }
            StreamSignal::FallbackRequired { failures } => {
                session.enter_fallback(&mut self.wiring, failures);
            }
        }
    }

    /// Release the current conversation's resources, then acquire the next
    /// one's.
    fn switch_to(&mut self, conversation: Option<ConversationId>) {
        let current = self.session.as_ref().map(|s| &s.conversation);
        if current == conversation.as_ref() && conversation.is_some() {
            return;
        }

        if let Some(session) = self.session.take() {
            tracing::info!(conversation = %session.conversation, "Leaving conversation");
            drop(session);
        }
        self.epoch += 1;
        self.store.reset(conversation.clone());

        if let Some(conversation) = conversation {
            tracing::info!(%conversation, "Syncing conversation");
            self.session = Some(Session::start(&mut self.wiring, conversation));
        }
    }

    fn submit(
        &mut self,
        request: SubmitRequest,
        target: Option<ConversationId>,
        reply: oneshot::Sender<Delivery>,
    ) {
        if request.is_blank() {
            let _ = reply.send(Delivery::rejected(SyncError::EmptyMessage));
            return;
        }

        let active = self.store.conversation().cloned();
        if let Some(expected) = target {
            if active.as_ref() != Some(&expected) {
                tracing::warn!(%expected, ?active, "Refusing submit for an inactive conversation");
                let _ = reply.send(Delivery::rejected(SyncError::ConversationMismatch {
                    expected,
                    active,
                }));
                return;
            }
        }

        let pending = submit::begin(&mut self.store, &request, self.epoch, reply);
        tracing::debug!(
            conversation = ?active,
            provisional = %pending.provisional_id,
            "Submitting message"
        );

        if active.is_some() {
            self.dispatch(active, request, pending);
            return;
        }

        let epoch = self.epoch;
        if let Some(creation) = self.creations.iter_mut().find(|c| c.epoch == epoch) {
            tracing::debug!(
                provisional = %pending.provisional_id,
                "Waiting for the conversation to be created"
            );
            creation.queued.push((request, pending));
            return;
        }

        self.creations.push(PendingCreation {
            epoch,
            creator: pending.provisional_id.clone(),
            queued: Vec::new(),
        });
        self.dispatch(None, request, pending);
    }

    /// Run the network half of a submit. `None` creates the conversation
    /// first.
    fn dispatch(
        &self,
        conversation: Option<ConversationId>,
        request: SubmitRequest,
        pending: PendingSubmit,
    ) {
        let api = self.wiring.api.clone();
        let inbox = self.wiring.inbox.clone();
        tokio::spawn(submit::deliver(
            api,
            conversation,
            request,
            pending,
            move |event| {
                let _ = inbox.send(Inbox::Submit(event));
            },
        ));
    }

    fn on_submit_event(&mut self, event: SubmitEvent) {
        match event {
            SubmitEvent::ConversationCreated {
                epoch,
                conversation,
            } => {
                let queued = match self.creations.iter().position(|c| c.epoch == epoch) {
                    Some(index) => self.creations.swap_remove(index).queued,
                    None => Vec::new(),
                };

                if epoch != self.epoch || self.session.is_some() {
                    tracing::debug!(%conversation, "Conversation created after navigating away");
                } else {
                    tracing::info!(%conversation, "Adopting new conversation");
                    self.store.rebind(conversation.clone());
                    self.session = Some(Session::start(&mut self.wiring, conversation.clone()));
                }

                for (request, pending) in queued {
                    self.dispatch(Some(conversation.clone()), request, pending);
                }
            }
            SubmitEvent::Finished {
                pending,
                conversation,
                result,
            } => {
                if let Some(index) = self
                    .creations
                    .iter()
                    .position(|c| c.creator == pending.provisional_id)
                {
                    // Creation failed; the next queued submit tries again.
                    let mut creation = self.creations.swap_remove(index);
                    if !creation.queued.is_empty() {
                        let (request, next) = creation.queued.remove(0);
                        creation.creator = next.provisional_id.clone();
                        self.creations.push(creation);
                        self.dispatch(None, request, next);
                    }
                }

                if pending.epoch != self.epoch {
                    tracing::debug!(
                        provisional = %pending.provisional_id,
                        "Submit finished after navigating away"
                    );
                    pending.answer(conversation, result);
                    return;
                }
                match result {
                    Ok(messages) => {
                        submit::apply_success(&mut self.store, &pending.provisional_id, &messages);
                        pending.answer(conversation, Ok(messages));
                    }
                    Err(e) => {
                        tracing::warn!(
                            provisional = %pending.provisional_id,
                            "Submit failed, rolling back: {}",
                            e
                        );
                        let PendingSubmit {
                            provisional_id,
                            snapshot,
                            reply,
                            ..
                        } = pending;
                        submit::roll_back(&mut self.store, snapshot, &provisional_id);
                        let _ = reply.send(Delivery {
                            conversation,
                            result: Err(e),
                        });
                    }
                }
            }
        }
    }

    fn publish(&mut self) {
        if self.store.version() != self.published_version {
            self.published_version = self.store.version();
            let messages: Arc<[Message]> = Arc::from(self.store.read());
            self.messages_tx.send_replace(messages);
        }

        let status = match &self.session {
            Some(session) => session.status(),
            None => SyncStatus {
                conversation: self.store.conversation().cloned(),
                ..SyncStatus::idle()
            },
        };
        self.status_tx.send_if_modified(|current| {
            if *current != status {
                tracing::debug!(state = %status.state, fallback = status.fallback_active, "Status");
                *current = status;
                true
            } else {
                false
            }
        });
    }
}

/// Cloneable front end of a running [`SyncController`].
#[derive(Clone)]
pub struct SyncHandle {
    commands: mpsc::Sender<Command>,
    messages: watch::Receiver<Arc<[Message]>>,
    status: watch::Receiver<SyncStatus>,
}

impl SyncHandle {
    /// Switch conversations. Resolves once the previous conversation's
    /// resources are released and the new ones are started.
    pub async fn set_conversation(&self, conversation: Option<ConversationId>) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SetConversation {
                conversation,
                reply,
            })
            .await
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// Send a user message optimistically. Returns the messages the server
    /// created, or the error after the local insert was rolled back.
    pub async fn submit(&self, request: SubmitRequest) -> Result<Vec<Message>> {
        self.deliver(request, None).await?.result
    }

    pub async fn submit_text(&self, content: impl Into<String>) -> Result<Vec<Message>> {
        self.submit(SubmitRequest::new(content)).await
    }

    /// Submit the composer contents of `context`.
    ///
    /// A context bound to a conversation other than the active one is
    /// refused. An unsaved context adopts the issued id as soon as the
    /// conversation exists, even if the post itself fails. On failure the
    /// draft is put back.
    pub async fn submit_context(&self, context: &mut ConversationContext) -> Result<Vec<Message>> {
        let request = context.take_request()?;
        let target = context.conversation().cloned();
        let delivery = match self.deliver(request.clone(), target).await {
            Ok(delivery) => delivery,
            Err(e) => {
                context.restore(request);
                return Err(e);
            }
        };

        if let Some(conversation) = delivery.conversation {
            context.adopt(conversation);
        }
        if delivery.result.is_err() {
            context.restore(request);
        }
        delivery.result
    }

    async fn deliver(
        &self,
        request: SubmitRequest,
        target: Option<ConversationId>,
    ) -> Result<Delivery> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit {
                request,
                target,
                reply,
            })
            .await
            .map_err(|_| SyncError::Shutdown)?;
        rx.await.map_err(|_| SyncError::Shutdown)
    }

    /// Current message list, in display order.
    pub fn messages(&self) -> Arc<[Message]> {
        self.messages.borrow().clone()
    }

    pub fn subscribe_messages(&self) -> watch::Receiver<Arc<[Message]>> {
        self.messages.clone()
    }

    pub fn status(&self) -> SyncStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.clone()
    }

    pub fn fallback_active(&self) -> bool {
        self.status.borrow().fallback_active
    }

    /// Tear everything down and stop the controller.
    pub async fn shutdown(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_err() {
            return Ok(());
        }
        let _ = rx.await;
        Ok(())
    }
}
