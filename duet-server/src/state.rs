//! Shared server state and the chat operations built on it.
//!
//! Every operation returns its result plus a list of [`Outbound`] events;
//! routing those through presence is the last step of each operation, kept
//! apart from the decision of who should hear what.

use duet_proto::api::{FavouriteResponse, PageResponse, ReactionResponse};
use duet_proto::cursor::Cursor;
use duet_proto::event::ClientEvent;
use duet_proto::message::{
    ConversationKey, Message, MessageId, NewMessage, Timestamp, UserId, ValidationError,
    validate_image,
};
use duet_proto::user::{ResolvedReaction, UserSummary};

use crate::auth::Authenticator;
use crate::config::ServerConfig;
use crate::delivery::DeliveryStateMachine;
use crate::error::ChatError;
use crate::media::{MediaUploader, PassthroughUploader};
use crate::presence::{ConnectionHandle, ConnectionId, PresenceRegistry};
use crate::reactions::ReactionAggregator;
use crate::store::{InMemoryMessageStore, MessageStore, with_timeout};
use crate::users::UserDirectory;

/// Everything a request or connection handler needs.
pub struct AppState<S = InMemoryMessageStore> {
    /// Message persistence.
    pub store: S,
    /// Live connections.
    pub presence: PresenceRegistry,
    /// User records.
    pub users: UserDirectory,
    /// Token table.
    pub auth: Authenticator,
    /// Image host.
    pub media: Box<dyn MediaUploader>,
    /// Resolved configuration.
    pub config: ServerConfig,
}

impl AppState<InMemoryMessageStore> {
    /// State backed by an empty in-memory store.
    #[must_use]
    pub fn in_memory(config: ServerConfig) -> Self {
        Self::new(InMemoryMessageStore::new(), config)
    }
}

impl<S: MessageStore> AppState<S> {
    /// Builds state around `store`, seeding users and tokens from `config`.
    #[must_use]
    pub fn new(store: S, config: ServerConfig) -> Self {
        Self {
            store,
            presence: PresenceRegistry::new(),
            users: UserDirectory::from_seeds(&config.users),
            auth: Authenticator::from_seeds(&config.users),
            media: Box::new(PassthroughUploader),
            config,
        }
    }

    /// Replaces the image uploader.
    #[must_use]
    pub fn with_uploader(mut self, media: impl MediaUploader + 'static) -> Self {
        self.media = Box::new(media);
        self
    }

    /// The delivery state machine over this state's store and presence.
    #[must_use]
    pub const fn delivery(&self) -> DeliveryStateMachine<'_, S> {
        DeliveryStateMachine::new(&self.store, &self.presence, self.config.store_timeout)
    }

    /// The reaction aggregator over this state's store.
    #[must_use]
    pub const fn reactions(&self) -> ReactionAggregator<'_, S> {
        ReactionAggregator::new(&self.store, self.config.store_timeout)
    }

    // -----------------------------------------------------------------------
    // Presence
    // -----------------------------------------------------------------------

    /// Registers `user`'s new connection and stamps their last-seen time.
    pub fn connect(&self, user: &UserId, handle: ConnectionHandle) {
        self.presence.on_connect(user, handle);
        self.touch_last_seen(user);
        tracing::info!(user_id = %user, "user connected");
    }

    /// Drops `user`'s connection if it is still `connection`.
    pub fn disconnect(&self, user: &UserId, connection: ConnectionId) {
        if self.presence.on_disconnect(user, connection) {
            self.touch_last_seen(user);
            tracing::info!(user_id = %user, "user disconnected");
        }
    }

    fn touch_last_seen(&self, user: &UserId) {
        if let Err(e) = self.users.touch_last_seen(user, Timestamp::now()) {
            tracing::warn!(user_id = %user, error = %e, "failed to update last seen");
        }
    }

    // -----------------------------------------------------------------------
    // Request-style operations
    // -----------------------------------------------------------------------

    /// Every other user, as seen by `caller`.
    #[must_use]
    pub fn list_partners(&self, caller: &UserId) -> Vec<UserSummary> {
        self.users.list_partners(caller)
    }

    /// One page of the conversation between `caller` and `partner`.
    ///
    /// Reading history never changes message status.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::InvalidCursor`] if `cursor` is present but
    /// undecodable, [`ChatError::NotFound`] for an unknown partner, and
    /// [`ChatError::TransientStore`] on store failure.
    pub async fn fetch_page(
        &self,
        caller: &UserId,
        partner: &UserId,
        cursor: Option<&str>,
        limit: Option<usize>,
    ) -> Result<PageResponse, ChatError> {
        let cursor = Cursor::decode_optional(cursor)?;
        if !self.users.exists(partner) {
            return Err(ChatError::NotFound(format!("user {partner}")));
        }
        let limit = self.config.page_size(limit);
        let conversation = ConversationKey::new(caller.clone(), partner.clone());

        let page = with_timeout(
            self.config.store_timeout,
            self.store.get_page(&conversation, cursor, limit),
        )
        .await?;
        let next_cursor = page.next_cursor();
        Ok(PageResponse {
            messages: page.messages,
            has_more: page.has_more,
            next_cursor,
        })
    }

    /// Creates a message from `sender` to `receiver` and runs delivery.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Validation`] for an empty, oversized or
    /// self-addressed draft, [`ChatError::NotFound`] for an unknown
    /// receiver, [`ChatError::Upload`] if the image cannot be stored, and
    /// [`ChatError::TransientStore`] if the append fails.
    pub async fn send_message(
        &self,
        sender: &UserId,
        receiver: &UserId,
        draft: NewMessage,
    ) -> Result<Message, ChatError> {
        let mut draft = draft.normalized();
        draft.validate()?;
        if sender == receiver {
            return Err(ValidationError::SelfMessage.into());
        }
        if !self.users.exists(receiver) {
            return Err(ChatError::NotFound(format!("user {receiver}")));
        }

        if let Some(image) = draft.image.take() {
            let url = self
                .media
                .upload(&image)
                .await
                .map_err(|e| ChatError::Upload(e.to_string()))?;
            validate_image(&url)?;
            draft.image = Some(url);
        }

        let message = with_timeout(
            self.config.store_timeout,
            self.store.append(sender, receiver, draft),
        )
        .await?;
        tracing::info!(message_id = %message.id, user_id = %sender, "message created");

        let (message, outbound) = self.delivery().on_created(message).await;
        self.presence.route(outbound);
        Ok(message)
    }

    /// Toggles `emoji` from `reactor` on message `id`.
    ///
    /// # Errors
    ///
    /// See [`ReactionAggregator::toggle`].
    pub async fn toggle_reaction(
        &self,
        reactor: &UserId,
        id: &MessageId,
        emoji: &str,
    ) -> Result<ReactionResponse, ChatError> {
        let (message, outbound) = self.reactions().toggle(reactor, id, emoji).await?;
        self.presence.route(outbound);

        let reactions = message
            .reactions
            .iter()
            .map(|r| ResolvedReaction {
                emoji: r.emoji.clone(),
                reactor: self.users.reactor_info(&r.reactor_id),
            })
            .collect();
        Ok(ReactionResponse { message, reactions })
    }

    /// Toggles `target` in `caller`'s favourites.
    ///
    /// # Errors
    ///
    /// See [`UserDirectory::toggle_favourite`].
    pub fn toggle_favourite(
        &self,
        caller: &UserId,
        target: &UserId,
    ) -> Result<FavouriteResponse, ChatError> {
        let change = self.users.toggle_favourite(caller, target)?;
        tracing::debug!(user_id = %caller, target = %target, favourite = change.is_favourite(), "favourite toggled");
        Ok(FavouriteResponse {
            favourite: change.is_favourite(),
            message: change.message().to_string(),
        })
    }

    // -----------------------------------------------------------------------
    // Event-stream operations
    // -----------------------------------------------------------------------

    /// Handles one inbound event from `user`'s connection.
    pub async fn handle_client_event(&self, user: &UserId, event: ClientEvent) {
        tracing::debug!(user_id = %user, event = event.name(), "client event");
        match event {
            ClientEvent::MarkRead {
                conversation_partner_id,
            } => {
                let outbound = self
                    .delivery()
                    .on_mark_read(user, &conversation_partner_id)
                    .await;
                self.presence.route(outbound);
            }
        }
    }
}
