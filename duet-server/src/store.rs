//! Durable record of messages, their status and their reactions.
//!
//! [`MessageStore`] is the persistence seam; [`InMemoryMessageStore`] is the
//! implementation the server ships with. Conversations are indexed by
//! `(createdAt, id)` so history pages come out in display order.
//!
//! Status writes are conditional: a store only moves a message's status
//! forward, and the check and the write happen under one lock so two
//! concurrent advances cannot regress each other.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use duet_proto::cursor::Cursor;
use duet_proto::message::{
    ConversationKey, Message, MessageId, MessageStatus, NewMessage, Timestamp, UserId,
};

use crate::error::StoreError;

/// One page of history, oldest message first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Messages ordered by `(createdAt, id)` ascending.
    pub messages: Vec<Message>,
    /// Whether the conversation holds anything older than `messages[0]`.
    pub has_more: bool,
}

impl Page {
    /// Cursor that fetches the page before this one, if there is one.
    #[must_use]
    pub fn next_cursor(&self) -> Option<Cursor> {
        if !self.has_more {
            return None;
        }
        self.messages.first().map(|m| Cursor::before(m.created_at))
    }
}

/// Outcome of a bulk status advance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkUpdate {
    /// How many messages moved.
    pub moved: usize,
    /// Order key of the newest message the update covered, moved or not.
    pub through: Option<(Timestamp, MessageId)>,
}

/// Persistence for chat messages.
///
/// Every method is atomic with respect to the others on the same message.
pub trait MessageStore: Send + Sync {
    /// Persists a new message from `sender` to `receiver`.
    ///
    /// Assigns the id, `createdAt = now` and status `sent`. Fails with
    /// [`StoreError::Invalid`] if the draft has neither text nor image.
    fn append(
        &self,
        sender: &UserId,
        receiver: &UserId,
        draft: NewMessage,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Fetches a single message.
    fn get(&self, id: &MessageId) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Returns up to `limit` of the newest messages created strictly before
    /// `before` (or the newest overall), oldest first.
    ///
    /// If the oldest selected message shares its `createdAt` with further
    /// messages below the limit, those are included too, so a page never
    /// splits a same-millisecond group.
    fn messages_before(
        &self,
        conversation: &ConversationKey,
        before: Option<Timestamp>,
        limit: usize,
    ) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Counts the messages created strictly before `before`.
    fn count_before(
        &self,
        conversation: &ConversationKey,
        before: Timestamp,
    ) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// Advances a message's status to `target` if it is strictly behind.
    ///
    /// Returns the message as stored afterwards, whether or not it moved.
    fn set_status(
        &self,
        id: &MessageId,
        target: MessageStatus,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Advances every message `sender` addressed to `receiver` whose status
    /// is behind `target`.
    ///
    /// Messages appended afterwards always order after the returned
    /// [`BulkUpdate::through`].
    fn set_status_bulk(
        &self,
        sender: &UserId,
        receiver: &UserId,
        target: MessageStatus,
    ) -> impl Future<Output = Result<BulkUpdate, StoreError>> + Send;

    /// Adds `(reactor, emoji)` to the message, or removes it if present.
    ///
    /// Returns the message with its updated reaction set.
    fn toggle_reaction(
        &self,
        id: &MessageId,
        reactor: &UserId,
        emoji: &str,
    ) -> impl Future<Output = Result<Message, StoreError>> + Send;

    /// Returns one page of the conversation ending just before `cursor`.
    ///
    /// `has_more` is true iff the conversation holds at least one message
    /// older than the first one returned.
    fn get_page(
        &self,
        conversation: &ConversationKey,
        cursor: Option<Cursor>,
        limit: usize,
    ) -> impl Future<Output = Result<Page, StoreError>> + Send {
        async move {
            let messages = self
                .messages_before(conversation, cursor.map(|c| c.timestamp()), limit)
                .await?;
            let has_more = match messages.first() {
                Some(oldest) => self.count_before(conversation, oldest.created_at).await? > 0,
                None => false,
            };
            Ok(Page { messages, has_more })
        }
    }
}

/// Runs a store operation, failing with [`StoreError::Timeout`] if it takes
/// longer than `limit`.
///
/// # Errors
///
/// Returns the operation's own error, or [`StoreError::Timeout`].
pub async fn with_timeout<T>(
    limit: Duration,
    op: impl Future<Output = Result<T, StoreError>>,
) -> Result<T, StoreError> {
    tokio::time::timeout(limit, op)
        .await
        .unwrap_or(Err(StoreError::Timeout(limit)))
}

/// Source of creation timestamps.
pub type Clock = Arc<dyn Fn() -> Timestamp + Send + Sync>;

#[derive(Default)]
struct Inner {
    messages: HashMap<MessageId, Message>,
    conversations: HashMap<ConversationKey, BTreeSet<(Timestamp, MessageId)>>,
}

/// In-memory [`MessageStore`] guarded by a single [`RwLock`].
pub struct InMemoryMessageStore {
    inner: RwLock<Inner>,
    clock: Clock,
}

impl Default for InMemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMessageStore {
    /// Creates an empty store stamping messages with the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(Timestamp::now))
    }

    /// Creates an empty store that takes creation times from `clock`.
    #[must_use]
    pub fn with_clock(clock: Clock) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            clock,
        }
    }

    /// Total number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.read().messages.len()
    }

    /// Returns `true` if nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn not_found(id: &MessageId) -> StoreError {
    StoreError::NotFound(format!("message {id}"))
}

impl MessageStore for InMemoryMessageStore {
    async fn append(
        &self,
        sender: &UserId,
        receiver: &UserId,
        draft: NewMessage,
    ) -> Result<Message, StoreError> {
        let draft = draft.normalized();
        draft.validate()?;

        // Stamped under the lock so index order matches insertion order.
        let mut inner = self.inner.write();
        let message = Message {
            id: MessageId::new(),
            sender_id: sender.clone(),
            receiver_id: receiver.clone(),
            text: draft.text,
            image: draft.image,
            created_at: (self.clock)(),
            status: MessageStatus::Sent,
            reactions: Vec::new(),
        };
        inner
            .conversations
            .entry(message.conversation())
            .or_default()
            .insert(message.order_key());
        inner.messages.insert(message.id, message.clone());
        drop(inner);
        Ok(message)
    }

    async fn get(&self, id: &MessageId) -> Result<Message, StoreError> {
        self.inner
            .read()
            .messages
            .get(id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn messages_before(
        &self,
        conversation: &ConversationKey,
        before: Option<Timestamp>,
        limit: usize,
    ) -> Result<Vec<Message>, StoreError> {
        let inner = self.inner.read();
        let Some(index) = inner.conversations.get(conversation) else {
            return Ok(Vec::new());
        };

        let mut keys: Vec<(Timestamp, MessageId)> = Vec::with_capacity(limit);
        let range = match before {
            Some(ts) => index.range(..(ts, MessageId::MIN)),
            None => index.range(..),
        };
        for key in range.rev() {
            if keys.len() >= limit {
                match keys.last() {
                    Some((oldest, _)) if *oldest == key.0 => {}
                    _ => break,
                }
            }
            keys.push(*key);
        }
        keys.reverse();

        Ok(keys
            .iter()
            .filter_map(|(_, id)| inner.messages.get(id).cloned())
            .collect())
    }

    async fn count_before(
        &self,
        conversation: &ConversationKey,
        before: Timestamp,
    ) -> Result<usize, StoreError> {
        Ok(self
            .inner
            .read()
            .conversations
            .get(conversation)
            .map_or(0, |index| index.range(..(before, MessageId::MIN)).count()))
    }

    async fn set_status(
        &self,
        id: &MessageId,
        target: MessageStatus,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.write();
        let message = inner.messages.get_mut(id).ok_or_else(|| not_found(id))?;
        message.advance_status(target);
        Ok(message.clone())
    }

    async fn set_status_bulk(
        &self,
        sender: &UserId,
        receiver: &UserId,
        target: MessageStatus,
    ) -> Result<BulkUpdate, StoreError> {
        let key = ConversationKey::new(sender.clone(), receiver.clone());
        let mut inner = self.inner.write();
        let Inner {
            messages,
            conversations,
        } = &mut *inner;
        let Some(index) = conversations.get(&key) else {
            return Ok(BulkUpdate::default());
        };

        let mut update = BulkUpdate::default();
        for order_key in index {
            let Some(message) = messages.get_mut(&order_key.1) else {
                continue;
            };
            if message.sender_id != *sender {
                continue;
            }
            update.through = Some(*order_key);
            if message.advance_status(target) {
                update.moved += 1;
            }
        }
        Ok(update)
    }

    async fn toggle_reaction(
        &self,
        id: &MessageId,
        reactor: &UserId,
        emoji: &str,
    ) -> Result<Message, StoreError> {
        let mut inner = self.inner.write();
        let message = inner.messages.get_mut(id).ok_or_else(|| not_found(id))?;
        message.toggle_reaction(reactor, emoji);
        Ok(message.clone())
    }
}
