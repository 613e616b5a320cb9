use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stored account. Never serialized to clients directly, see [`PublicUser`].
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub password_hash: String,
    #[serde(default)]
    pub following: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_token_expiry: Option<DateTime<Utc>>,
}

impl User {
    pub fn new(username: String, email: Option<String>, password_hash: String) -> Self {
        Self {
            username,
            email,
            password_hash,
            following: Vec::new(),
            reset_token: None,
            reset_token_expiry: None,
        }
    }

    /// Index key for the case-insensitive username lookup.
    pub fn key(&self) -> String {
        username_key(&self.username)
    }

    pub fn has_live_reset_token(&self, token: &str, now: DateTime<Utc>) -> bool {
        match (&self.reset_token, self.reset_token_expiry) {
            (Some(stored), Some(expiry)) => stored == token && expiry > now,
            _ => false,
        }
    }

    pub fn follows(&self, username: &str) -> bool {
        same_username(&self.following, username)
    }
}

pub fn username_key(username: &str) -> String {
    username.trim().to_lowercase()
}

/// True when `names` holds `username` under any letter case.
pub fn same_username(names: &[String], username: &str) -> bool {
    let key = username_key(username);
    names.iter().any(|n| username_key(n) == key)
}

pub fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// The user as clients see it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub following: Vec<String>,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            username: user.username.clone(),
            email: user.email.clone(),
            following: user.following.clone(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: Uuid,
    pub username: String,
    pub text: String,
    pub image: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub likes: Vec<String>,
}

impl Post {
    pub fn new(username: String, text: String, image: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            text,
            image,
            timestamp: Utc::now(),
            likes: Vec::new(),
        }
    }

    pub fn liked_by(&self, username: &str) -> bool {
        self.likes.iter().any(|l| l == username)
    }
}

/// Removes `item` when present, appends it otherwise. Returns true when it was added.
pub fn toggle_member(set: &mut Vec<String>, item: &str) -> bool {
    if let Some(pos) = set.iter().position(|m| m == item) {
        set.remove(pos);
        false
    } else {
        set.push(item.to_string());
        true
    }
}

/// Username flavour of [`toggle_member`]: every entry equal to `username` ignoring case
/// is removed, otherwise `username` is appended as given.
pub fn toggle_username(set: &mut Vec<String>, username: &str) -> bool {
    let key = username_key(username);
    let before = set.len();
    set.retain(|m| username_key(m) != key);
    if set.len() < before {
        return false;
    }
    set.push(username.to_string());
    true
}
