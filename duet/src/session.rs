//! A signed-in user's chat session.
//!
//! [`ChatSession`] ties the local [`ChatView`] to the server. User actions
//! are applied optimistically through the [`Reconciler`] and settled by the
//! [`ApiClient`] response; server events are merged as they arrive, even
//! while a request is in flight. Anything the user should hear about goes
//! out on the [`Notice`] channel, and events for the server (mark-read) on
//! the outbox channel.

use tokio::sync::mpsc;

use duet_proto::event::{ClientEvent, ServerEvent};
use duet_proto::message::{Message, MessageId, MessageStatus, NewMessage, Timestamp, UserId};
use duet_proto::user::UserSummary;

use crate::api::{ApiClient, ApiError};
use crate::error::ClientError;
use crate::reconcile::Reconciler;
use crate::view::{ChatView, SendMessage, ToggleFavourite, ToggleReaction};

/// A non-blocking notification for the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// An optimistic action failed and was undone.
    Error {
        /// What the user tried to do.
        action: &'static str,
        /// Why it failed.
        reason: String,
        /// Whether trying again may help.
        retryable: bool,
    },
    /// A message arrived in a conversation that is not open.
    Incoming {
        /// Who sent it.
        from: UserId,
    },
    /// The server reported a problem with something we sent.
    Server(String),
}

/// Receiving ends handed out by [`ChatSession::new`].
#[derive(Debug)]
pub struct SessionChannels {
    /// Notifications for the user.
    pub notices: mpsc::UnboundedReceiver<Notice>,
    /// Events to forward to the server's event stream.
    pub outbox: mpsc::UnboundedReceiver<ClientEvent>,
}

/// One user's view of the chat, kept in step with the server.
pub struct ChatSession<A> {
    api: A,
    state: Reconciler<ChatView>,
    notices: mpsc::UnboundedSender<Notice>,
    outbox: mpsc::UnboundedSender<ClientEvent>,
    page_size: usize,
}

impl<A: ApiClient> ChatSession<A> {
    /// Starts a session for `me`.
    pub fn new(api: A, me: UserId, page_size: usize) -> (Self, SessionChannels) {
        let (notices, notice_rx) = mpsc::unbounded_channel();
        let (outbox, outbox_rx) = mpsc::unbounded_channel();
        let session = Self {
            api,
            state: Reconciler::new(ChatView::new(me)),
            notices,
            outbox,
            page_size: page_size.max(1),
        };
        (
            session,
            SessionChannels {
                notices: notice_rx,
                outbox: outbox_rx,
            },
        )
    }

    /// Reads the current view.
    pub fn view<R>(&self, f: impl FnOnce(&ChatView) -> R) -> R {
        self.state.read(f)
    }

    fn notify(&self, notice: Notice) {
        if self.notices.send(notice).is_err() {
            tracing::debug!("notice receiver dropped");
        }
    }

    fn notify_failure(&self, action: &'static str, error: &ApiError) {
        tracing::warn!(action, error = %error, "optimistic update rolled back");
        self.notify(Notice::Error {
            action,
            reason: error.to_string(),
            retryable: error.retryable(),
        });
    }

    fn emit(&self, event: ClientEvent) {
        tracing::debug!(event = event.name(), "queueing client event");
        if self.outbox.send(event).is_err() {
            tracing::debug!("outbox receiver dropped");
        }
    }

    fn open_partner(&self) -> Result<UserId, ClientError> {
        self.state
            .read(|v| v.partner().cloned())
            .ok_or(ClientError::NoConversation)
    }

    /// Reloads the partner list and favourites.
    ///
    /// # Errors
    ///
    /// Returns the API error if the listing fails.
    pub async fn refresh_partners(&self) -> Result<Vec<UserSummary>, ClientError> {
        let partners = self.api.list_partners().await?;
        self.state.update(|v| v.set_partners(partners.clone()));
        Ok(partners)
    }

    /// Opens the conversation with `partner` at its newest page.
    ///
    /// Messages from `partner` that arrive while the page is in flight are
    /// kept and shown with it. Marks the conversation read if anything in
    /// it was unread.
    ///
    /// # Errors
    ///
    /// Returns the API error if the first page cannot be fetched; the
    /// previously open conversation stays open.
    pub async fn open_conversation(&self, partner: &UserId) -> Result<(), ClientError> {
        let page = self.api.fetch_page(partner, None, self.page_size).await?;
        let count = page.messages.len();
        let unread = self.state.update(|v| v.open(partner.clone(), page));
        tracing::debug!(partner = %partner, count, unread, "opened conversation");
        if unread {
            self.emit(ClientEvent::MarkRead {
                conversation_partner_id: partner.clone(),
            });
        }
        Ok(())
    }

    /// Loads the next older page of the open conversation.
    ///
    /// Returns the number of messages the page carried, `0` when there is
    /// nothing older.
    ///
    /// # Errors
    ///
    /// [`ClientError::NoConversation`] if nothing is open, or the API error.
    pub async fn load_older(&self) -> Result<usize, ClientError> {
        let partner = self.open_partner()?;
        let Some(cursor) = self
            .state
            .read(|v| v.has_more().then(|| v.next_cursor()).flatten())
        else {
            return Ok(0);
        };
        let page = self
            .api
            .fetch_page(&partner, Some(cursor), self.page_size)
            .await?;
        let count = page.messages.len();
        self.state.update(|v| {
            // The user may have switched conversations meanwhile.
            if v.partner() == Some(&partner) {
                v.prepend_page(page);
            }
        });
        Ok(count)
    }

    /// Sends a message in the open conversation.
    ///
    /// The message shows immediately under a temporary id and is swapped
    /// for the stored copy once the server accepts it.
    ///
    /// # Errors
    ///
    /// [`ClientError::Validation`] for an empty or oversized draft (nothing
    /// is shown), [`ClientError::NoConversation`], or the API error after
    /// the temporary message has been removed.
    pub async fn send(
        &self,
        text: Option<String>,
        image: Option<String>,
    ) -> Result<Message, ClientError> {
        let partner = self.open_partner()?;
        let draft = NewMessage { text, image }.normalized();
        draft.validate()?;

        let local = Message {
            id: MessageId::new(),
            sender_id: self.state.read(|v| v.me().clone()),
            receiver_id: partner.clone(),
            text: draft.text.clone(),
            image: draft.image.clone(),
            created_at: Timestamp::now(),
            status: MessageStatus::Sent,
            reactions: Vec::new(),
        };
        let pending = self.state.apply(SendMessage::new(local));

        match self.api.send_message(&partner, &draft).await {
            Ok(stored) => {
                tracing::debug!(message_id = %stored.id, status = %stored.status, "message stored");
                self.state.commit(pending, stored.clone());
                Ok(stored)
            }
            Err(e) => {
                self.state.rollback(pending);
                self.notify_failure("send message", &e);
                Err(e.into())
            }
        }
    }

    /// Toggles our `emoji` on a message.
    ///
    /// # Errors
    ///
    /// Returns the API error after the local toggle has been undone.
    pub async fn toggle_reaction(&self, id: MessageId, emoji: &str) -> Result<(), ClientError> {
        let me = self.state.read(|v| v.me().clone());
        let pending = self.state.apply(ToggleReaction::new(id, me, emoji));
        let result = self
            .api
            .toggle_reaction(&id, emoji)
            .await
            .map(|r| r.message.reactions);
        self.state.settle(pending, result).map_err(|e| {
            self.notify_failure("react", &e);
            e.into()
        })
    }

    /// Toggles whether `user` is a favourite. Returns the new state.
    ///
    /// # Errors
    ///
    /// Returns the API error after the local toggle has been undone.
    pub async fn toggle_favourite(&self, user: &UserId) -> Result<bool, ClientError> {
        let pending = self.state.apply(ToggleFavourite::new(user.clone()));
        let result = self
            .api
            .toggle_favourite(user)
            .await
            .map(|r| r.favourite);
        self.state.settle(pending, result).map_err(|e| {
            self.notify_failure("favourite", &e);
            ClientError::from(e)
        })?;
        Ok(self.state.read(|v| v.is_favourite(user)))
    }

    /// Merges an event from the server's event stream.
    pub fn apply_event(&self, event: ServerEvent) {
        tracing::trace!(event = event.name(), "applying server event");
        if let ServerEvent::Error { reason } = event {
            tracing::warn!(reason = %reason, "server reported an error");
            self.notify(Notice::Server(reason));
            return;
        }
        let (follow_up, elsewhere) = self.state.update(|v| {
            let elsewhere = match &event {
                ServerEvent::NewMessage(m)
                    if m.receiver_id == *v.me() && v.partner() != Some(&m.sender_id) =>
                {
                    Some(m.sender_id.clone())
                }
                _ => None,
            };
            (v.apply_event(event), elsewhere)
        });
        if let Some(from) = elsewhere {
            self.notify(Notice::Incoming { from });
        }
        if let Some(event) = follow_up {
            self.emit(event);
        }
    }
}
