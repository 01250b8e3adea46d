use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Link {
    pub id: i64,
    pub short_code: String,
    pub original_url: String,
    /// Public links have no owner
    pub owner_id: Option<String>,
    pub is_active: bool,
    pub expires_at: Option<i64>,
    #[serde(skip_serializing, default)]
    pub password_hash: Option<String>,
    pub clicks_count: i64,
    pub unique_clicks_count: i64,
    pub last_clicked_at: Option<i64>,
    pub created_at: i64,
    pub deleted_at: Option<i64>,
}

impl Link {
    pub fn is_expired_at(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    /// Active and not expired as of `now`
    pub fn can_be_accessed_at(&self, now: i64) -> bool {
        self.is_active && !self.is_expired_at(now)
    }

    pub fn is_password_protected(&self) -> bool {
        self.password_hash
            .as_deref()
            .is_some_and(|hash| !hash.is_empty())
    }
}

/// Input for creating a link through the directory
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewLink {
    pub original_url: String,
    /// Caller-chosen code; a random one is generated when absent
    pub short_code: Option<String>,
    pub owner_id: Option<String>,
    pub expires_at: Option<i64>,
    /// Plain-text password, hashed before it reaches storage
    pub password: Option<String>,
}

/// Row-level insert payload, produced by the directory from a [`NewLink`]
#[derive(Debug, Clone)]
pub struct LinkRecord {
    pub short_code: String,
    pub original_url: String,
    pub owner_id: Option<String>,
    pub expires_at: Option<i64>,
    pub password_hash: Option<String>,
}
