//! Chat Store
//!
//! Durable chat records keyed by chat id, plus per-user sorted indexes:
//!
//! - `chat:{id}` - hash holding the chat fields; `messages` is a JSON string
//! - `user:chat:{user_id}` - sorted set of chat keys scored by creation time
//! - `user:favourite:{user_id}` - sorted set of favourite chat keys
//!
//! Saves are read-modify-write without a version check: the last writer wins.
//! A save never replaces a record owned by another user.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use crate::models::chat::Chat;
use crate::utils::error::{AppError, AppResult};

/// Durable chat persistence
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Load a chat owned by `user_id`.
    async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<Chat>>;

    /// Owner of `chat_id`, whoever that is.
    async fn chat_owner(&self, chat_id: &str) -> AppResult<Option<String>>;

    /// Create or overwrite a chat and index it under its owner.
    ///
    /// Fails with `AppError::Conflict` when the id belongs to another user.
    async fn save_chat(&self, chat: &Chat) -> AppResult<()>;

    /// Chats owned by `user_id`, newest first.
    async fn list_chats(&self, user_id: &str) -> AppResult<Vec<Chat>>;

    async fn set_favourite(&self, user_id: &str, chat_id: &str, favourite: bool) -> AppResult<()>;

    async fn is_favourite(&self, user_id: &str, chat_id: &str) -> AppResult<bool>;

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> AppResult<()>;
}

fn owned_elsewhere(chat_id: &str) -> AppError {
    AppError::conflict(format!("chat {} belongs to another user", chat_id))
}

pub fn chat_key(chat_id: &str) -> String {
    format!("chat:{}", chat_id)
}

pub fn user_chats_key(user_id: &str) -> String {
    format!("user:chat:{}", user_id)
}

pub fn user_favourites_key(user_id: &str) -> String {
    format!("user:favourite:{}", user_id)
}

/// Flatten a chat into hash fields.
pub fn chat_to_fields(chat: &Chat) -> AppResult<Vec<(String, String)>> {
    let mut fields = vec![
        ("id".to_string(), chat.id.clone()),
        ("title".to_string(), chat.title.clone()),
        ("createdAt".to_string(), chat.created_at.to_rfc3339()),
        ("userId".to_string(), chat.user_id.clone()),
        ("path".to_string(), chat.path.clone()),
        ("orgType".to_string(), chat.org_type.clone()),
        ("messages".to_string(), serde_json::to_string(&chat.messages)?),
    ];
    if let Some(share_path) = &chat.share_path {
        fields.push(("sharePath".to_string(), share_path.clone()));
    }
    if let Some(favourite) = chat.is_favourite {
        fields.push(("isFavourite".to_string(), favourite.to_string()));
    }
    Ok(fields)
}

/// Rebuild a chat from hash fields.
pub fn chat_from_fields(mut fields: HashMap<String, String>) -> AppResult<Chat> {
    let mut take = |name: &str| {
        fields
            .remove(name)
            .ok_or_else(|| AppError::storage(format!("chat record is missing field {}", name)))
    };
    let id = take("id")?;
    let created_at = DateTime::parse_from_rfc3339(&take("createdAt")?)
        .map_err(|e| AppError::storage(format!("chat {} has a bad createdAt: {}", id, e)))?
        .with_timezone(&Utc);
    let chat = Chat {
        title: take("title").unwrap_or_default(),
        created_at,
        user_id: take("userId")?,
        path: take("path").unwrap_or_else(|_| format!("/chat/{}", id)),
        org_type: take("orgType").unwrap_or_default(),
        messages: match take("messages") {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(_) => Vec::new(),
        },
        share_path: take("sharePath").ok(),
        is_favourite: take("isFavourite").ok().map(|v| v == "true"),
        id,
    };
    Ok(chat)
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local chat store
#[derive(Default)]
pub struct MemoryChatStore {
    chats: DashMap<String, Chat>,
    favourites: DashMap<String, HashSet<String>>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
    async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<Chat>> {
        Ok(self
            .chats
            .get(chat_id)
            .filter(|c| c.user_id == user_id)
            .map(|c| c.value().clone()))
    }

    async fn chat_owner(&self, chat_id: &str) -> AppResult<Option<String>> {
        Ok(self.chats.get(chat_id).map(|c| c.user_id.clone()))
    }

    async fn save_chat(&self, chat: &Chat) -> AppResult<()> {
        match self.chats.entry(chat.id.clone()) {
            Entry::Occupied(existing) if existing.get().user_id != chat.user_id => {
                Err(owned_elsewhere(&chat.id))
            }
            Entry::Occupied(mut existing) => {
                existing.insert(chat.clone());
                Ok(())
            }
            Entry::Vacant(slot) => {
                slot.insert(chat.clone());
                Ok(())
            }
        }
    }

    async fn list_chats(&self, user_id: &str) -> AppResult<Vec<Chat>> {
        let mut chats: Vec<Chat> = self
            .chats
            .iter()
            .filter(|c| c.user_id == user_id)
            .map(|c| c.value().clone())
            .collect();
        chats.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(chats)
    }

    async fn set_favourite(&self, user_id: &str, chat_id: &str, favourite: bool) -> AppResult<()> {
        let mut set = self.favourites.entry(user_id.to_string()).or_default();
        if favourite {
            set.insert(chat_id.to_string());
        } else {
            set.remove(chat_id);
        }
        drop(set);
        if let Some(mut chat) = self.chats.get_mut(chat_id) {
            chat.is_favourite = Some(favourite);
        }
        Ok(())
    }

    async fn is_favourite(&self, user_id: &str, chat_id: &str) -> AppResult<bool> {
        Ok(self
            .favourites
            .get(user_id)
            .map(|set| set.contains(chat_id))
            .unwrap_or(false))
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> AppResult<()> {
        self.chats.remove_if(chat_id, |_, c| c.user_id == user_id);
        if let Some(mut set) = self.favourites.get_mut(user_id) {
            set.remove(chat_id);
        }
        Ok(())
    }
}

// ============================================================================
// Upstash (Redis over REST)
// ============================================================================

/// Redis commands sent through the Upstash REST pipeline endpoint
pub struct UpstashChatStore {
    client: reqwest::Client,
    url: String,
    token: String,
}

impl UpstashChatStore {
    pub fn new(url: impl Into<String>, token: impl Into<String>) -> AppResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            client,
            url: url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Run commands in one round trip, returning each command's result.
    pub async fn pipeline(&self, commands: Vec<Vec<String>>) -> AppResult<Vec<Value>> {
        let count = commands.len();
        let response = self
            .client
            .post(format!("{}/pipeline", self.url))
            .bearer_auth(&self.token)
            .json(&commands)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::storage(format!(
                "upstash returned HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let replies: Vec<Value> = response.json().await?;
        if replies.len() != count {
            return Err(AppError::storage(format!(
                "upstash returned {} replies for {} commands",
                replies.len(),
                count
            )));
        }
        replies
            .into_iter()
            .map(|reply| match reply.get("error").and_then(Value::as_str) {
                Some(err) => Err(AppError::storage(err.to_string())),
                None => Ok(reply.get("result").cloned().unwrap_or(Value::Null)),
            })
            .collect()
    }

    async fn command(&self, args: Vec<String>) -> AppResult<Value> {
        self.pipeline(vec![args])
            .await?
            .pop()
            .ok_or_else(|| AppError::storage("empty upstash reply"))
    }
}

fn cmd(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Decode an `HGETALL` reply (flat `[field, value, ...]` array).
fn hash_from_reply(reply: &Value) -> HashMap<String, String> {
    let items = reply.as_array().map(Vec::as_slice).unwrap_or(&[]);
    items
        .chunks(2)
        .filter_map(|pair| match pair {
            [Value::String(k), Value::String(v)] => Some((k.clone(), v.clone())),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl ChatStore for UpstashChatStore {
    async fn get_chat(&self, chat_id: &str, user_id: &str) -> AppResult<Option<Chat>> {
        let reply = self.command(cmd(&["HGETALL", &chat_key(chat_id)])).await?;
        let fields = hash_from_reply(&reply);
        if fields.is_empty() {
            return Ok(None);
        }
        let chat = chat_from_fields(fields)?;
        Ok(if chat.user_id == user_id { Some(chat) } else { None })
    }

    async fn chat_owner(&self, chat_id: &str) -> AppResult<Option<String>> {
        let owner = self
            .command(cmd(&["HGET", &chat_key(chat_id), "userId"]))
            .await?;
        Ok(owner.as_str().map(str::to_string))
    }

    async fn save_chat(&self, chat: &Chat) -> AppResult<()> {
        if let Some(owner) = self.chat_owner(&chat.id).await? {
            if owner != chat.user_id {
                return Err(owned_elsewhere(&chat.id));
            }
        }
        let key = chat_key(&chat.id);
        let mut hset = vec!["HSET".to_string(), key.clone()];
        for (field, value) in chat_to_fields(chat)? {
            hset.push(field);
            hset.push(value);
        }
        let zadd = vec![
            "ZADD".to_string(),
            user_chats_key(&chat.user_id),
            chat.created_at.timestamp_millis().to_string(),
            key,
        ];
        self.pipeline(vec![hset, zadd]).await?;
        tracing::debug!(chat_id = %chat.id, messages = chat.messages.len(), "chat saved");
        Ok(())
    }

    async fn list_chats(&self, user_id: &str) -> AppResult<Vec<Chat>> {
        let keys = self
            .command(cmd(&["ZREVRANGE", &user_chats_key(user_id), "0", "-1"]))
            .await?;
        let keys: Vec<String> = keys
            .as_array()
            .map(|a| a.iter().filter_map(|k| k.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let replies = self
            .pipeline(keys.iter().map(|k| cmd(&["HGETALL", k])).collect())
            .await?;
        let mut chats = Vec::with_capacity(replies.len());
        for reply in replies {
            let fields = hash_from_reply(&reply);
            if fields.is_empty() {
                continue;
            }
            match chat_from_fields(fields) {
                Ok(chat) if chat.user_id == user_id => chats.push(chat),
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "skipping unreadable chat record"),
            }
        }
        Ok(chats)
    }

    async fn set_favourite(&self, user_id: &str, chat_id: &str, favourite: bool) -> AppResult<()> {
        let key = chat_key(chat_id);
        let index = if favourite {
            vec![
                "ZADD".to_string(),
                user_favourites_key(user_id),
                Utc::now().timestamp_millis().to_string(),
                key.clone(),
            ]
        } else {
            cmd(&["ZREM", &user_favourites_key(user_id), &key])
        };
        let flag = cmd(&["HSET", &key, "isFavourite", if favourite { "true" } else { "false" }]);
        self.pipeline(vec![index, flag]).await?;
        Ok(())
    }

    async fn is_favourite(&self, user_id: &str, chat_id: &str) -> AppResult<bool> {
        let score = self
            .command(cmd(&["ZSCORE", &user_favourites_key(user_id), &chat_key(chat_id)]))
            .await?;
        Ok(!score.is_null())
    }

    async fn delete_chat(&self, chat_id: &str, user_id: &str) -> AppResult<()> {
        if self.get_chat(chat_id, user_id).await?.is_none() {
            return Err(AppError::not_found(format!("chat {}", chat_id)));
        }
        let key = chat_key(chat_id);
        self.pipeline(vec![
            cmd(&["DEL", &key]),
            cmd(&["ZREM", &user_chats_key(user_id), &key]),
            cmd(&["ZREM", &user_favourites_key(user_id), &key]),
        ])
        .await?;
        Ok(())
    }
}
