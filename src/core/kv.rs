//! Key-value backend, used by the Spin host.
//!
//! Keys: `user:<lower username>`, `email:<lower email>` -> username key,
//! `reset:<token>` -> username key, `post:<id>`, and `feed` (post ids, newest first).
//! The key-value interface has no conditional writes, so the toggles here are
//! read-modify-write and two racing requests can interleave.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::db::{Db, StoreError};
use crate::models::models::{
    email_key, toggle_member, toggle_username, username_key, Post, User,
};

const FEED_KEY: &str = "feed";

/// Raw byte store underneath [`KvDb`].
pub trait KvStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn exists(&self, key: &str) -> anyhow::Result<bool>;
}

#[cfg(target_arch = "wasm32")]
impl KvStore for spin_sdk::key_value::Store {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(spin_sdk::key_value::Store::get(self, key)?)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::set(self, key, value)?)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        Ok(spin_sdk::key_value::Store::delete(self, key)?)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(spin_sdk::key_value::Store::exists(self, key)?)
    }
}

fn user_key(username: &str) -> String {
    format!("user:{}", username_key(username))
}

fn email_index_key(email: &str) -> String {
    format!("email:{}", email_key(email))
}

fn reset_key(token: &str) -> String {
    format!("reset:{token}")
}

fn post_key(id: Uuid) -> String {
    format!("post:{id}")
}

pub struct KvDb<S> {
    store: S,
}

#[cfg(target_arch = "wasm32")]
impl KvDb<spin_sdk::key_value::Store> {
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(spin_sdk::key_value::Store::open_default()?))
    }
}

impl<S: KvStore> KvDb<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.store.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.store.set(key, &serde_json::to_vec(value)?)
    }

    fn save_user(&self, user: &User) -> anyhow::Result<()> {
        self.set_json(&user_key(&user.username), user)
    }

    fn feed(&self) -> anyhow::Result<Vec<Uuid>> {
        Ok(self.get_json(FEED_KEY)?.unwrap_or_default())
    }
}

impl<S: KvStore> Db for KvDb<S> {
    fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        if self.store.exists(&user_key(&user.username))? {
            return Err(StoreError::UsernameTaken);
        }
        let index = match &user.email {
            Some(email) => {
                let index = email_index_key(email);
                if self.store.exists(&index)? {
                    return Err(StoreError::EmailTaken);
                }
                Some(index)
            }
            None => None,
        };

        // User record first: a dangling index would lock the email out.
        self.save_user(user)?;
        if let Some(index) = index {
            self.set_json(&index, &user.key())?;
        }
        Ok(())
    }

    fn find_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        self.get_json(&user_key(username))
    }

    fn find_user_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
        match self.get_json::<String>(&email_index_key(email))? {
            Some(username) => self.find_user(&username),
            None => Ok(None),
        }
    }

    fn set_reset_token(
        &self,
        username: &str,
        token: &str,
        expires_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let Some(mut user) = self.find_user(username)? else {
            return Ok(false);
        };
        if let Some(old) = user.reset_token.take() {
            self.store.delete(&reset_key(&old))?;
        }
        user.reset_token = Some(token.to_string());
        user.reset_token_expiry = Some(expires_at);
        self.save_user(&user)?;
        self.set_json(&reset_key(token), &user.key())?;
        Ok(true)
    }

    fn consume_reset_token(
        &self,
        token: &str,
        now: DateTime<Utc>,
        password_hash: &str,
    ) -> anyhow::Result<Option<User>> {
        let Some(username) = self.get_json::<String>(&reset_key(token))? else {
            return Ok(None);
        };
        let Some(mut user) = self.find_user(&username)? else {
            return Ok(None);
        };
        if !user.has_live_reset_token(token, now) {
            return Ok(None);
        }

        user.password_hash = password_hash.to_string();
        user.reset_token = None;
        user.reset_token_expiry = None;
        self.save_user(&user)?;
        self.store.delete(&reset_key(token))?;
        Ok(Some(user))
    }

    fn toggle_following(&self, follower: &str, target: &str) -> anyhow::Result<Option<User>> {
        let Some(mut user) = self.find_user(follower)? else {
            return Ok(None);
        };
        toggle_username(&mut user.following, target);
        self.save_user(&user)?;
        Ok(Some(user))
    }

    fn insert_post(&self, post: &Post) -> anyhow::Result<()> {
        self.set_json(&post_key(post.id), post)?;
        let mut feed = self.feed()?;
        feed.insert(0, post.id);
        self.set_json(FEED_KEY, &feed)
    }

    fn find_post(&self, id: Uuid) -> anyhow::Result<Option<Post>> {
        self.get_json(&post_key(id))
    }

    fn list_posts(&self) -> anyhow::Result<Vec<Post>> {
        let mut posts = Vec::new();
        for id in self.feed()? {
            if let Some(post) = self.find_post(id)? {
                posts.push(post);
            }
        }
        Ok(posts)
    }

    fn list_posts_by(&self, username: &str) -> anyhow::Result<Vec<Post>> {
        let key = username_key(username);
        Ok(self
            .list_posts()?
            .into_iter()
            .filter(|p| username_key(&p.username) == key)
            .collect())
    }

    fn toggle_like(&self, id: Uuid, username: &str) -> anyhow::Result<Option<Post>> {
        let Some(mut post) = self.find_post(id)? else {
            return Ok(None);
        };
        toggle_member(&mut post.likes, username);
        self.set_json(&post_key(id), &post)?;
        Ok(Some(post))
    }
}
