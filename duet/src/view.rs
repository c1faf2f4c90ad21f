//! Local chat state as the client renders it.
//!
//! [`ChatView`] holds the open conversation (sorted by `(createdAt, id)`),
//! the online set, unread messages from other partners and favourites.
//! Server events are merged with [`ChatView::apply_event`]; optimistic
//! edits go through the [`Mutation`] types at the bottom of this module.
//!
//! Read receipts name the newest message they cover, and only stored
//! messages at or before that point become `read`. A message still under
//! its temporary id is never touched by a receipt.

use std::collections::{BTreeSet, HashMap, HashSet};

use duet_proto::api::PageResponse;
use duet_proto::cursor::Cursor;
use duet_proto::event::{ClientEvent, ServerEvent};
use duet_proto::message::{
    ConversationKey, Message, MessageId, MessageStatus, Reaction, Timestamp, UserId,
};
use duet_proto::user::UserSummary;

use crate::reconcile::Mutation;

/// Everything the client shows.
#[derive(Debug, Clone)]
pub struct ChatView {
    me: UserId,
    partners: Vec<UserSummary>,
    partner: Option<UserId>,
    messages: Vec<Message>,
    has_more: bool,
    next_cursor: Option<Cursor>,
    online: BTreeSet<UserId>,
    /// Incoming messages from partners whose conversation is not open.
    inbox: HashMap<UserId, Vec<Message>>,
    favourites: BTreeSet<UserId>,
    /// Bumped each time an authoritative reaction set lands for a message.
    reaction_epochs: HashMap<MessageId, u64>,
    /// Newest `(createdAt, id)` each reader has acknowledged.
    read_through: HashMap<UserId, (Timestamp, MessageId)>,
    /// Temporary ids of sends the server has not stored yet.
    unsent: HashSet<MessageId>,
}

impl ChatView {
    /// An empty view for user `me`.
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            partners: Vec::new(),
            partner: None,
            messages: Vec::new(),
            has_more: false,
            next_cursor: None,
            online: BTreeSet::new(),
            inbox: HashMap::new(),
            favourites: BTreeSet::new(),
            reaction_epochs: HashMap::new(),
            read_through: HashMap::new(),
            unsent: HashSet::new(),
        }
    }

    /// The local user.
    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    /// The partner of the open conversation, if any.
    #[must_use]
    pub const fn partner(&self) -> Option<&UserId> {
        self.partner.as_ref()
    }

    /// Messages of the open conversation, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Looks up a loaded message.
    #[must_use]
    pub fn message(&self, id: &MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == *id)
    }

    fn message_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        self.messages.iter_mut().find(|m| m.id == *id)
    }

    /// Whether older history exists beyond what is loaded.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.has_more
    }

    /// Cursor for the next older page.
    #[must_use]
    pub const fn next_cursor(&self) -> Option<Cursor> {
        self.next_cursor
    }

    /// Users currently connected.
    #[must_use]
    pub const fn online(&self) -> &BTreeSet<UserId> {
        &self.online
    }

    /// Returns `true` if `user` is connected.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.contains(user)
    }

    /// Unread messages from `partner` outside the open conversation.
    #[must_use]
    pub fn unread(&self, partner: &UserId) -> usize {
        self.inbox.get(partner).map_or(0, Vec::len)
    }

    /// Returns `true` if `user` is one of our favourites.
    #[must_use]
    pub fn is_favourite(&self, user: &UserId) -> bool {
        self.favourites.contains(user)
    }

    fn set_favourite(&mut self, user: &UserId, favourite: bool) {
        if favourite {
            self.favourites.insert(user.clone());
        } else {
            self.favourites.remove(user);
        }
    }

    /// Conversation partners, favourites reflected from local state.
    #[must_use]
    pub fn partners(&self) -> Vec<UserSummary> {
        self.partners
            .iter()
            .cloned()
            .map(|mut p| {
                p.is_favourite = self.favourites.contains(&p.id);
                p
            })
            .collect()
    }

    /// Replaces the partner list and favourites with a server listing.
    pub fn set_partners(&mut self, partners: Vec<UserSummary>) {
        self.favourites = partners
            .iter()
            .filter(|p| p.is_favourite)
            .map(|p| p.id.clone())
            .collect();
        self.partners = partners;
    }

    /// Switches to the conversation with `partner`, showing `page` plus
    /// anything the partner sent while the conversation was closed.
    ///
    /// Returns `true` if anything the partner sent us is still unread.
    pub fn open(&mut self, partner: UserId, page: PageResponse) -> bool {
        let arrived = self.inbox.remove(&partner).unwrap_or_default();
        self.messages.clear();
        self.partner = Some(partner.clone());
        self.take_page(page);
        // The page may predate these.
        for message in arrived {
            self.upsert(message);
        }
        self.messages
            .iter()
            .any(|m| m.sender_id == partner && m.status.is_behind(MessageStatus::Read))
    }

    /// Merges an older page into the open conversation.
    pub fn prepend_page(&mut self, page: PageResponse) {
        self.take_page(page);
    }

    fn take_page(&mut self, page: PageResponse) {
        self.has_more = page.has_more;
        self.next_cursor = page.next_cursor;
        for message in page.messages {
            self.upsert(message);
        }
    }

    fn in_open_conversation(&self, message: &Message) -> bool {
        self.partner.as_ref().is_some_and(|p| {
            message.conversation() == ConversationKey::new(self.me.clone(), p.clone())
        })
    }

    /// Whether a read receipt already covers our stored `message`.
    fn receipt_covers(&self, message: &Message) -> bool {
        message.sender_id == self.me
            && !self.unsent.contains(&message.id)
            && self
                .read_through
                .get(&message.receiver_id)
                .is_some_and(|through| message.order_key() <= *through)
    }

    /// Inserts `message` at its timestamp position, or merges it into the
    /// copy already shown. Status never moves backward.
    ///
    /// Returns `false` if the message is not part of the open conversation.
    pub fn upsert(&mut self, mut message: Message) -> bool {
        if !self.in_open_conversation(&message) {
            return false;
        }
        if self.receipt_covers(&message) {
            message.advance_status(MessageStatus::Read);
        }
        if let Some(existing) = self.message_mut(&message.id) {
            let status = existing.status.max(message.status);
            *existing = message;
            existing.status = status;
        } else {
            let key = message.order_key();
            let at = self.messages.partition_point(|m| m.order_key() < key);
            self.messages.insert(at, message);
        }
        true
    }

    /// Removes a loaded message.
    pub fn remove(&mut self, id: &MessageId) -> Option<Message> {
        let at = self.messages.iter().position(|m| m.id == *id)?;
        Some(self.messages.remove(at))
    }

    /// Number of authoritative reaction sets seen for `id`.
    #[must_use]
    pub fn reaction_epoch(&self, id: &MessageId) -> u64 {
        self.reaction_epochs.get(id).copied().unwrap_or(0)
    }

    fn replace_reactions(&mut self, id: &MessageId, reactions: Vec<Reaction>) {
        let waiting = self.inbox.values_mut().flatten();
        if let Some(message) = self.messages.iter_mut().chain(waiting).find(|m| m.id == *id) {
            message.reactions = reactions;
        }
    }

    /// Records that `reader` has read everything up to `through` and
    /// advances the stored messages it covers.
    fn mark_read_through(&mut self, reader: &UserId, through: (Timestamp, MessageId)) {
        let mark = self.read_through.entry(reader.clone()).or_insert(through);
        *mark = (*mark).max(through);
        let mark = *mark;
        for message in &mut self.messages {
            if message.sender_id == self.me
                && message.receiver_id == *reader
                && !self.unsent.contains(&message.id)
                && message.order_key() <= mark
            {
                message.advance_status(MessageStatus::Read);
            }
        }
    }

    /// Merges an authoritative server event.
    ///
    /// Returns the event the client should send back, if any.
    pub fn apply_event(&mut self, event: ServerEvent) -> Option<ClientEvent> {
        match event {
            ServerEvent::PresenceSnapshot { online } => {
                self.online = online.into_iter().collect();
                None
            }
            ServerEvent::NewMessage(message) => self.merge_new_message(message),
            ServerEvent::DeliveryConfirmed { message_id, .. } => {
                if let Some(message) = self.message_mut(&message_id) {
                    message.advance_status(MessageStatus::Delivered);
                }
                None
            }
            ServerEvent::ReadReceipt { reader_id, through } => {
                if let Some(through) = through {
                    self.mark_read_through(&reader_id, through);
                }
                None
            }
            ServerEvent::ReactionUpdated {
                message_id,
                reactions,
            } => {
                *self.reaction_epochs.entry(message_id).or_default() += 1;
                self.replace_reactions(&message_id, reactions);
                None
            }
            ServerEvent::Error { .. } => None,
        }
    }

    fn merge_new_message(&mut self, message: Message) -> Option<ClientEvent> {
        if !message.involves(&self.me) {
            return None;
        }
        let incoming = message.receiver_id == self.me;
        let from = message.sender_id.clone();
        if self.in_open_conversation(&message) {
            self.upsert(message);
            return incoming.then_some(ClientEvent::MarkRead {
                conversation_partner_id: from,
            });
        }
        if incoming {
            let waiting = self.inbox.entry(from).or_default();
            if !waiting.iter().any(|m| m.id == message.id) {
                waiting.push(message);
            }
        }
        None
    }
}

// =============================================================================
// Optimistic mutations
// =============================================================================

/// Shows an outgoing message under a temporary id until the server stores it.
#[derive(Debug)]
pub struct SendMessage {
    draft: Message,
}

impl SendMessage {
    /// Wraps a locally built message carrying a temporary id.
    #[must_use]
    pub const fn new(draft: Message) -> Self {
        Self { draft }
    }

    /// The temporary id shown until commit.
    #[must_use]
    pub const fn temp_id(&self) -> MessageId {
        self.draft.id
    }
}

impl Mutation<ChatView> for SendMessage {
    type Output = Message;

    fn apply(&mut self, view: &mut ChatView) {
        view.unsent.insert(self.draft.id);
        view.upsert(self.draft.clone());
    }

    fn commit(self, view: &mut ChatView, stored: Message) {
        view.unsent.remove(&self.draft.id);
        view.remove(&self.draft.id);
        // Picks up any receipt covering it that beat the response.
        view.upsert(stored);
    }

    fn rollback(self, view: &mut ChatView) {
        view.unsent.remove(&self.draft.id);
        view.remove(&self.draft.id);
    }
}

/// Flips one `(reactor, emoji)` pair on a loaded message.
#[derive(Debug)]
pub struct ToggleReaction {
    message_id: MessageId,
    reactor: UserId,
    emoji: String,
    prior: Option<Vec<Reaction>>,
    epoch: u64,
}

impl ToggleReaction {
    /// Toggles `emoji` by `reactor` on `message_id`.
    #[must_use]
    pub fn new(message_id: MessageId, reactor: UserId, emoji: impl Into<String>) -> Self {
        Self {
            message_id,
            reactor,
            emoji: emoji.into(),
            prior: None,
            epoch: 0,
        }
    }

    /// Whether an authoritative reaction set arrived after `apply`.
    fn superseded(&self, view: &ChatView) -> bool {
        view.reaction_epoch(&self.message_id) != self.epoch
    }
}

impl Mutation<ChatView> for ToggleReaction {
    type Output = Vec<Reaction>;

    fn apply(&mut self, view: &mut ChatView) {
        self.epoch = view.reaction_epoch(&self.message_id);
        if let Some(message) = view.message_mut(&self.message_id) {
            self.prior = Some(message.reactions.clone());
            message.toggle_reaction(&self.reactor, &self.emoji);
        }
    }

    fn commit(self, view: &mut ChatView, reactions: Vec<Reaction>) {
        if !self.superseded(view) {
            view.replace_reactions(&self.message_id, reactions);
        }
    }

    fn rollback(self, view: &mut ChatView) {
        if self.superseded(view) {
            return;
        }
        if let Some(prior) = self.prior {
            view.replace_reactions(&self.message_id, prior);
        }
    }
}

/// Flips whether a user is one of our favourites.
#[derive(Debug)]
pub struct ToggleFavourite {
    user: UserId,
    prior: bool,
}

impl ToggleFavourite {
    /// Toggles `user`.
    #[must_use]
    pub const fn new(user: UserId) -> Self {
        Self { user, prior: false }
    }
}

impl Mutation<ChatView> for ToggleFavourite {
    type Output = bool;

    fn apply(&mut self, view: &mut ChatView) {
        self.prior = view.is_favourite(&self.user);
        view.set_favourite(&self.user, !self.prior);
    }

    fn commit(self, view: &mut ChatView, favourite: bool) {
        view.set_favourite(&self.user, favourite);
    }

    fn rollback(self, view: &mut ChatView) {
        view.set_favourite(&self.user, self.prior);
    }
}
