//! Client-side state behind the conversation panel and chat window.
//!
//! Sends are written to the open view before the server confirms them and
//! are then reconciled: a confirmed send takes the server's id and
//! timestamp, a rejected one stays visible as failed. While a conversation
//! is open a poller re-fetches its history to cover missed pushes.

use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::api::{ClientConfig, MessagingApi};
use super::error::{ClientError, ClientResult};
use crate::models::conversation::{ConversationSummary, ConversationTab};
use crate::models::message::{FormattedMessage, MessageEvent, MessageKind};
use crate::services::conversations::{filter_conversations, sort_summaries};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Sent,
    Failed(String),
}

/// One bubble in the chat window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub local_id: Uuid,
    pub server_id: Option<String>,
    pub sender_id: String,
    pub sender_name: String,
    pub sender_initial: String,
    pub text: String,
    pub timestamp: Option<String>,
    pub is_me: bool,
    pub state: DeliveryState,
}

impl ChatEntry {
    fn from_server(message: FormattedMessage) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            server_id: Some(message.id),
            sender_id: message.sender_id,
            sender_name: message.sender_name,
            sender_initial: message.sender_initial,
            text: message.text,
            timestamp: Some(message.timestamp),
            is_me: message.is_me,
            state: DeliveryState::Sent,
        }
    }

    fn confirm(&mut self, message: FormattedMessage) {
        self.server_id = Some(message.id);
        self.sender_name = message.sender_name;
        self.sender_initial = message.sender_initial;
        self.timestamp = Some(message.timestamp);
        self.state = DeliveryState::Sent;
    }
}

#[derive(Debug, Clone)]
pub struct OpenConversation {
    pub id: String,
    pub kind: MessageKind,
    pub entries: Vec<ChatEntry>,
    view: Uuid,
}

impl OpenConversation {
    fn is(&self, id: &str, kind: MessageKind) -> bool {
        self.id == id && self.kind == kind
    }

    fn contains_server_id(&self, id: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.server_id.as_deref() == Some(id))
    }
}

#[derive(Debug)]
struct SurfaceState {
    user_id: String,
    conversations: Vec<ConversationSummary>,
    tab: ConversationTab,
    query: String,
    active: Option<OpenConversation>,
}

impl SurfaceState {
    fn summary_mut(&mut self, id: &str, kind: MessageKind) -> Option<&mut ConversationSummary> {
        self.conversations
            .iter_mut()
            .find(|s| s.id == id && s.kind == kind)
    }

    fn record_activity(&mut self, id: &str, kind: MessageKind, text: &str, at: &str, unread: bool) {
        if let Some(summary) = self.summary_mut(id, kind) {
            summary.last_message = text.to_string();
            summary.last_message_at = Some(at.to_string());
            if unread {
                summary.unread_count += 1;
            }
            self.conversations = sort_summaries(std::mem::take(&mut self.conversations));
        }
    }
}

struct Poller {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct MessageSurface<A: MessagingApi> {
    api: Arc<A>,
    config: ClientConfig,
    state: Arc<RwLock<SurfaceState>>,
    poller: Option<Poller>,
}

impl<A: MessagingApi> MessageSurface<A> {
    pub fn new(api: Arc<A>, config: ClientConfig, user_id: impl Into<String>) -> Self {
        Self {
            api,
            config,
            state: Arc::new(RwLock::new(SurfaceState {
                user_id: user_id.into(),
                conversations: Vec::new(),
                tab: ConversationTab::Messages,
                query: String::new(),
                active: None,
            })),
            poller: None,
        }
    }

    /// Reloads both tabs from the server.
    pub async fn refresh(&self) -> ClientResult<()> {
        let (direct, groups) = tokio::try_join!(
            self.api.list_conversations(),
            self.api.list_communities()
        )?;

        let mut state = self.state.write().await;
        state.conversations = sort_summaries(direct.into_iter().chain(groups).collect());
        Ok(())
    }

    pub async fn set_tab(&self, tab: ConversationTab) {
        self.state.write().await.tab = tab;
    }

    pub async fn set_query(&self, query: impl Into<String>) {
        self.state.write().await.query = query.into();
    }

    /// The list currently shown: active tab, narrowed by the search query.
    pub async fn visible_conversations(&self) -> Vec<ConversationSummary> {
        let state = self.state.read().await;
        filter_conversations(&state.conversations, state.tab, &state.query)
    }

    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        self.state.read().await.conversations.clone()
    }

    /// Total unread across both tabs.
    pub async fn unread_badge(&self) -> i64 {
        self.state
            .read()
            .await
            .conversations
            .iter()
            .map(|s| s.unread_count)
            .sum()
    }

    pub async fn active_conversation(&self) -> Option<OpenConversation> {
        self.state.read().await.active.clone()
    }

    pub fn is_polling(&self) -> bool {
        self.poller
            .as_ref()
            .is_some_and(|p| !p.handle.is_finished())
    }

    pub async fn open_conversation(&mut self, id: &str, kind: MessageKind) -> ClientResult<()> {
        self.stop_poller();

        let history = self.api.history(id, kind).await?;
        let view = Uuid::new_v4();

        {
            let mut state = self.state.write().await;
            state.active = Some(OpenConversation {
                id: id.to_string(),
                kind,
                entries: history.into_iter().map(ChatEntry::from_server).collect(),
                view,
            });
            if let Some(summary) = state.summary_mut(id, kind) {
                summary.unread_count = 0;
            }
        }

        self.start_poller(id.to_string(), kind, view);
        Ok(())
    }

    pub async fn close_conversation(&mut self) {
        self.stop_poller();
        self.state.write().await.active = None;
    }

    /// Shows `text` in the open conversation right away, then persists it.
    /// Returns the local id of the entry, which ends up `Sent` or `Failed`.
    pub async fn send_message(
        &self,
        conversation_id: &str,
        kind: MessageKind,
        text: &str,
    ) -> ClientResult<Uuid> {
        if text.trim().is_empty() {
            return Err(ClientError::EmptyMessage);
        }

        let local_id = Uuid::new_v4();
        {
            let mut state = self.state.write().await;
            let user_id = state.user_id.clone();
            let active = state
                .active
                .as_mut()
                .filter(|a| a.is(conversation_id, kind))
                .ok_or(ClientError::NoActiveConversation)?;

            active.entries.push(ChatEntry {
                local_id,
                server_id: None,
                sender_id: user_id,
                sender_name: String::new(),
                sender_initial: String::new(),
                text: text.to_string(),
                timestamp: None,
                is_me: true,
                state: DeliveryState::Pending,
            });
        }

        let result = self.api.send(conversation_id, kind, text).await;

        let mut state = self.state.write().await;
        match result {
            Ok(message) => {
                let (text, at) = (message.text.clone(), message.timestamp.clone());
                if let Some(active) = state.active.as_mut() {
                    let duplicate = active.contains_server_id(&message.id);
                    if duplicate {
                        // A push already showed this message. Keep whichever
                        // entry carries the server id.
                        active
                            .entries
                            .retain(|e| e.local_id != local_id || e.server_id.is_some());
                    } else if let Some(entry) =
                        active.entries.iter_mut().find(|e| e.local_id == local_id)
                    {
                        entry.confirm(message);
                    }
                }
                state.record_activity(conversation_id, kind, &text, &at, false);
                Ok(local_id)
            }
            Err(e) => {
                tracing::warn!("Send to {} failed: {}", conversation_id, e);
                if let Some(entry) = state
                    .active
                    .as_mut()
                    .and_then(|a| a.entries.iter_mut().find(|e| e.local_id == local_id))
                {
                    entry.state = DeliveryState::Failed(e.to_string());
                }
                Err(e)
            }
        }
    }

    /// Handles a `newMessage` push. Messages for the open conversation are
    /// appended once and acknowledged; anything else bumps that
    /// conversation's unread count and preview.
    pub async fn apply_push(&self, event: MessageEvent) -> ClientResult<()> {
        let acknowledge = {
            let mut state = self.state.write().await;
            let user_id = state.user_id.clone();
            let from_me = event.sender_id == user_id;

            let showing = state
                .active
                .as_ref()
                .is_some_and(|a| a.is(&event.conversation_id, event.kind));

            if showing {
                let mut acknowledge = false;
                if let Some(active) = state.active.as_mut() {
                    if !active.contains_server_id(&event.id) {
                        let pending = active.entries.iter_mut().find(|e| {
                            from_me && e.state == DeliveryState::Pending && e.text == event.text
                        });
                        match pending {
                            Some(entry) => entry.confirm(event.for_viewer(&user_id)),
                            None => {
                                active
                                    .entries
                                    .push(ChatEntry::from_server(event.for_viewer(&user_id)));
                                acknowledge = !from_me;
                            }
                        }
                    }
                }
                state.record_activity(
                    &event.conversation_id,
                    event.kind,
                    &event.text,
                    &event.timestamp,
                    false,
                );
                acknowledge
            } else {
                state.record_activity(
                    &event.conversation_id,
                    event.kind,
                    &event.text,
                    &event.timestamp,
                    !from_me,
                );
                false
            }
        };

        if acknowledge {
            self.api.mark_read(&event.id).await?;
        }
        Ok(())
    }

    fn start_poller(&mut self, id: String, kind: MessageKind, view: Uuid) {
        let token = CancellationToken::new();
        let api = self.api.clone();
        let state = self.state.clone();
        let interval = self.config.poll_interval;
        let cancelled = token.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately and history was just loaded.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancelled.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let history = tokio::select! {
                    _ = cancelled.cancelled() => break,
                    result = api.history(&id, kind) => result,
                };

                match history {
                    Ok(history) => {
                        let mut state = state.write().await;
                        match state.active.as_mut() {
                            Some(active) if active.view == view => {
                                merge_history(active, history);
                            }
                            _ => break,
                        }
                    }
                    Err(e) => tracing::debug!("Poll of {} failed: {}", id, e),
                }
            }
        });

        self.poller = Some(Poller { token, handle });
    }

    fn stop_poller(&mut self) {
        if let Some(poller) = self.poller.take() {
            poller.token.cancel();
        }
    }
}

impl<A: MessagingApi> Drop for MessageSurface<A> {
    fn drop(&mut self) {
        self.stop_poller();
    }
}

/// Server history is authoritative. Local entries the server has not
/// confirmed (pending or failed) stay at the end.
fn merge_history(active: &mut OpenConversation, history: Vec<FormattedMessage>) {
    let unconfirmed: Vec<ChatEntry> = active
        .entries
        .drain(..)
        .filter(|e| e.server_id.is_none())
        .collect();

    active.entries = history.into_iter().map(ChatEntry::from_server).collect();
    active.entries.extend(unconfirmed);
}

pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
