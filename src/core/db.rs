use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context as _};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;
use uuid::Uuid;

use crate::models::models::{
    email_key, toggle_member, toggle_username, username_key, Post, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("username is already taken")]
    UsernameTaken,

    #[error("email is already registered")]
    EmailTaken,

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Document storage for users and posts.
///
/// The two toggles and `consume_reset_token` decide and apply in a single atomic step
/// on backends that support it.
pub trait Db {
    /// Fails when the username or the email is already in use (case-insensitive).
    fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    fn find_user(&self, username: &str) -> anyhow::Result<Option<User>>;

    fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>>;

    /// Replaces any outstanding token for the user. Returns false if the user is gone.
    fn set_reset_token(
        &self,
        username: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Swaps in `password_hash` and clears the token, provided `token` is still live at `now`.
    fn consume_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>>;

    /// Adds `target` to the follower's list or removes it if present.
    fn toggle_following(&self, follower: &str, target: &str) -> anyhow::Result<Option<User>>;

    fn insert_post(&self, post: &Post) -> anyhow::Result<()>;

    fn find_post(&self, id: Uuid) -> anyhow::Result<Option<Post>>;

    /// All posts, in no particular order.
    fn list_posts(&self) -> anyhow::Result<Vec<Post>>;

    /// Posts whose author matches `username` ignoring case.
    fn list_posts_by(&self, username: &str) -> anyhow::Result<Vec<Post>>;

    /// Adds `username` to the post's likes or removes it if present.
    fn toggle_like(&self, id: Uuid, username: &str) -> anyhow::Result<Option<Post>>;
}

#[derive(Clone, Default, Serialize, Deserialize)]
struct Collections {
    /// Keyed by lowercase username.
    users: BTreeMap<String, User>,
    posts: BTreeMap<Uuid, Post>,
}

impl Collections {
    fn user_by_token_mut(&mut self, token: &str) -> Option<&mut User> {
        self.users
            .values_mut()
            .find(|u| u.reset_token.as_deref() == Some(token))
    }
}

/// Process-local store. Optionally mirrored to a JSON snapshot so data survives restarts.
pub struct LocalDb {
    inner: Mutex<Collections>,
    snapshot: Option<PathBuf>,
}

impl LocalDb {
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Collections::default()),
            snapshot: None,
        }
    }

    /// Loads the snapshot at `path` if it exists, then writes it back once to prove the
    /// location is usable. Any failure here is meant to stop the process.
    pub fn open(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let collections = if path.exists() {
            let raw = fs::read(&path)
                .with_context(|| format!("failed to read snapshot {}", path.display()))?;
            serde_json::from_slice(&raw)
                .with_context(|| format!("snapshot {} is corrupt", path.display()))?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            Collections::default()
        };

        persist(&path, &collections)?;
        info!(
            path = %path.display(),
            users = collections.users.len(),
            posts = collections.posts.len(),
            "store opened"
        );

        Ok(Self {
            inner: Mutex::new(collections),
            snapshot: Some(path),
        })
    }

    fn lock(&self) -> anyhow::Result<MutexGuard<'_, Collections>> {
        self.inner.lock().map_err(|_| anyhow!("store lock poisoned"))
    }

    fn read<R>(&self, f: impl FnOnce(&Collections) -> R) -> anyhow::Result<R> {
        let guard = self.lock()?;
        Ok(f(&guard))
    }

    /// Runs a mutation under the lock. With a snapshot, the mutation is applied to a copy
    /// that replaces the live collections only once it has been written out.
    fn write<R>(&self, f: impl FnOnce(&mut Collections) -> R) -> anyhow::Result<R> {
        let mut guard = self.lock()?;
        let Some(path) = &self.snapshot else {
            return Ok(f(&mut guard));
        };

        let mut next = guard.clone();
        let result = f(&mut next);
        persist(path, &next)?;
        *guard = next;
        Ok(result)
    }
}

fn persist(path: &Path, collections: &Collections) -> anyhow::Result<()> {
    let bytes = serde_json::to_vec_pretty(collections)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to replace {}", path.display()))?;
    Ok(())
}

impl Db for LocalDb {
    fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.write(|c| {
            let key = user.key();
            if c.users.contains_key(&key) {
                return Err(StoreError::UsernameTaken);
            }
            if let Some(email) = user.email.as_deref().map(email_key) {
                let taken = c
                    .users
                    .values()
                    .any(|u| u.email.as_deref().map(email_key).as_deref() == Some(email.as_str()));
                if taken {
                    return Err(StoreError::EmailTaken);
                }
            }
            c.users.insert(key, user.clone());
            Ok(())
        })?
    }

    fn find_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        let key = username_key(username);
        self.read(|c| c.users.get(&key).cloned())
    }

    fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        let wanted = email_key(email);
        self.read(|c| {
            c.users
                .values()
                .find(|u| u.email.as_deref().map(email_key).as_deref() == Some(wanted.as_str()))
                .cloned()
        })
    }

    fn set_reset_token(
        &self,
        username: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let key = username_key(username);
        self.write(|c| match c.users.get_mut(&key) {
            Some(user) => {
                user.reset_token = Some(token.to_string());
                user.reset_token_expiry = Some(expires_at);
                true
            }
            None => false,
        })
    }

    fn consume_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        self.write(|c| {
            let user = c.user_by_token_mut(token)?;
            if !user.has_live_reset_token(token, now) {
                return None;
            }
            user.password_hash = password_hash.to_string();
            user.reset_token = None;
            user.reset_token_expiry = None;
            Some(user.clone())
        })
    }

    fn toggle_following(&self, follower: &str, target: &str) -> anyhow::Result<Option<User>> {
        let key = username_key(follower);
        self.write(|c| {
            let user = c.users.get_mut(&key)?;
            toggle_username(&mut user.following, target);
            Some(user.clone())
        })
    }

    fn insert_post(&self, post: &Post) -> anyhow::Result<()> {
        self.write(|c| {
            c.posts.insert(post.id, post.clone());
        })
    }

    fn find_post(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        self.read(|c| c.posts.get(&id).cloned())
    }

    fn list_posts(&self) -> anyhow::Result<Vec<Post>> {
        self.read(|c| c.posts.values().cloned().collect())
    }

    fn list_posts_by(&self, username: &str) -> anyhow::Result<Vec<Post>> {
        let key = username_key(username);
        self.read(|c| {
            c.posts
                .values()
                .filter(|p| username_key(&p.username) == key)
                .cloned()
                .collect()
        })
    }

    fn toggle_like(&self, id: Uuid, username: &str) -> anyhow::Result<Option<Post>> {
        self.write(|c| {
            let post = c.posts.get_mut(&id)?;
            toggle_member(&mut post.likes, username);
            Some(post.clone())
        })
    }
}
