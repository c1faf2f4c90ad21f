//! In-memory user directory: display data, last-seen times and favourites.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use duet_proto::message::{Timestamp, UserId, ValidationError};
use duet_proto::user::{ReactorInfo, UserSummary};

use crate::config::UserSeed;
use crate::error::ChatError;

/// A user account as held by the directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Stable id.
    pub id: UserId,
    /// Display name.
    pub full_name: String,
    /// Contact address. Never leaves the server.
    pub email: String,
    /// Avatar URL.
    pub profile_pic: String,
    /// Last connect or disconnect.
    pub last_seen: Option<Timestamp>,
    /// Users this user has favourited.
    pub favourites: BTreeSet<UserId>,
}

impl UserRecord {
    /// Creates a record with no last-seen time and no favourites.
    #[must_use]
    pub fn new(id: UserId, full_name: impl Into<String>) -> Self {
        Self {
            id,
            full_name: full_name.into(),
            email: String::new(),
            profile_pic: String::new(),
            last_seen: None,
            favourites: BTreeSet::new(),
        }
    }

    fn reactor_info(&self) -> ReactorInfo {
        ReactorInfo {
            id: self.id.clone(),
            full_name: self.full_name.clone(),
            profile_pic: self.profile_pic.clone(),
        }
    }
}

impl From<&UserSeed> for UserRecord {
    fn from(seed: &UserSeed) -> Self {
        Self {
            email: seed.email.clone(),
            profile_pic: seed.profile_pic.clone(),
            ..Self::new(UserId::new(seed.id.clone()), seed.full_name.clone())
        }
    }
}

/// Outcome of a favourite toggle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FavouriteChange {
    /// The target is now a favourite.
    Added,
    /// The target is no longer a favourite.
    Removed,
}

impl FavouriteChange {
    /// Whether the target ended up favourited.
    #[must_use]
    pub const fn is_favourite(self) -> bool {
        matches!(self, Self::Added)
    }

    /// Confirmation text returned to the caller.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Added => "User added to favourites",
            Self::Removed => "User removed from favourites",
        }
    }
}

/// Thread-safe registry of user records.
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<HashMap<UserId, UserRecord>>,
}

impl UserDirectory {
    /// Creates an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a directory holding one record per seed.
    #[must_use]
    pub fn from_seeds(seeds: &[UserSeed]) -> Self {
        let dir = Self::new();
        for seed in seeds {
            dir.insert(UserRecord::from(seed));
        }
        dir
    }

    /// Adds or replaces a record.
    pub fn insert(&self, record: UserRecord) {
        self.users.write().insert(record.id.clone(), record);
    }

    /// Returns `true` if `user` has a record.
    #[must_use]
    pub fn exists(&self, user: &UserId) -> bool {
        self.users.read().contains_key(user)
    }

    /// Returns a copy of the record for `user`.
    #[must_use]
    pub fn get(&self, user: &UserId) -> Option<UserRecord> {
        self.users.read().get(user).cloned()
    }

    /// Every user except `caller`, sorted by display name then id.
    #[must_use]
    pub fn list_partners(&self, caller: &UserId) -> Vec<UserSummary> {
        let users = self.users.read();
        let favourites = users.get(caller).map(|r| &r.favourites);
        let mut partners: Vec<UserSummary> = users
            .values()
            .filter(|r| r.id != *caller)
            .map(|r| UserSummary {
                id: r.id.clone(),
                full_name: r.full_name.clone(),
                profile_pic: r.profile_pic.clone(),
                last_seen: r.last_seen,
                is_favourite: favourites.is_some_and(|f| f.contains(&r.id)),
            })
            .collect();
        drop(users);
        partners.sort_by(|a, b| a.full_name.cmp(&b.full_name).then_with(|| a.id.cmp(&b.id)));
        partners
    }

    /// Records that `user` connected or disconnected at `now`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::NotFound`] if `user` has no record.
    pub fn touch_last_seen(&self, user: &UserId, now: Timestamp) -> Result<(), ChatError> {
        let mut users = self.users.write();
        let record = users
            .get_mut(user)
            .ok_or_else(|| ChatError::NotFound(format!("user {user}")))?;
        record.last_seen = Some(now);
        Ok(())
    }

    /// Adds `target` to `caller`'s favourites, or removes it if present.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::SelfFavourite`] if `caller == target`, or
    /// [`ChatError::NotFound`] if either user is unknown.
    pub fn toggle_favourite(
        &self,
        caller: &UserId,
        target: &UserId,
    ) -> Result<FavouriteChange, ChatError> {
        if caller == target {
            return Err(ValidationError::SelfFavourite.into());
        }
        let mut users = self.users.write();
        if !users.contains_key(target) {
            return Err(ChatError::NotFound(format!("user {target}")));
        }
        let record = users
            .get_mut(caller)
            .ok_or_else(|| ChatError::NotFound(format!("user {caller}")))?;
        if record.favourites.remove(target) {
            Ok(FavouriteChange::Removed)
        } else {
            record.favourites.insert(target.clone());
            Ok(FavouriteChange::Added)
        }
    }

    /// Display information for a reactor.
    ///
    /// A reactor without a record is shown by id.
    #[must_use]
    pub fn reactor_info(&self, user: &UserId) -> ReactorInfo {
        self.users.read().get(user).map_or_else(
            || ReactorInfo {
                id: user.clone(),
                full_name: user.to_string(),
                profile_pic: String::new(),
            },
            UserRecord::reactor_info,
        )
    }
}
