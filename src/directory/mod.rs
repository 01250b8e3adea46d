//! Link lookup and access rules
//!
//! Every redirect resolves its link here. Lookups are served from a moka
//! TTL cache; mutations made through the directory invalidate the entry.

pub mod password;

use chrono::Utc;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::CacheConfig;
use crate::models::{Link, LinkRecord, NewLink};
use crate::storage::{Storage, StorageError};

pub use password::PasswordError;

pub const SHORT_CODE_LENGTH: usize = 6;
const MAX_CUSTOM_CODE_LENGTH: usize = 32;
const MAX_GENERATION_ATTEMPTS: usize = 10;
const SHORT_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("link not found")]
    NotFound,
    #[error("short code '{0}' is already taken")]
    Conflict(String),
    #[error("failed to generate a unique short code after {0} attempts")]
    CodeGeneration(usize),
    #[error("invalid link: {0}")]
    Invalid(String),
    #[error(transparent)]
    Password(#[from] PasswordError),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

pub struct LinkDirectory {
    storage: Arc<dyn Storage>,
    cache: Cache<String, Option<Link>>,
}

impl LinkDirectory {
    pub fn new(storage: Arc<dyn Storage>, config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(Duration::from_secs(config.ttl_secs))
            .build();

        Self { storage, cache }
    }

    /// Find a live link by short code. Soft-deleted links are `NotFound`.
    pub async fn resolve(&self, short_code: &str) -> Result<Link, DirectoryError> {
        if let Some(cached) = self.cache.get(short_code).await {
            return cached.ok_or(DirectoryError::NotFound);
        }

        let link = self.storage.get_link_by_code(short_code).await?;
        self.cache.insert(short_code.to_string(), link.clone()).await;

        link.ok_or(DirectoryError::NotFound)
    }

    /// Read straight from storage and refresh the cache, for callers that
    /// need current counters
    pub async fn resolve_fresh(&self, short_code: &str) -> Result<Link, DirectoryError> {
        let link = self.storage.get_link_by_code(short_code).await?;
        self.cache.insert(short_code.to_string(), link.clone()).await;

        link.ok_or(DirectoryError::NotFound)
    }

    /// Active and not expired
    pub fn can_be_accessed(&self, link: &Link) -> bool {
        link.can_be_accessed_at(Utc::now().timestamp())
    }

    pub fn is_password_protected(&self, link: &Link) -> bool {
        link.is_password_protected()
    }

    /// Unprotected links accept any candidate
    pub fn check_password(&self, link: &Link, candidate: &str) -> bool {
        let Some(hash) = link.password_hash.as_deref().filter(|h| !h.is_empty()) else {
            return true;
        };

        match password::verify_password(candidate, hash) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(short_code = %link.short_code, "Rejecting password check: {}", e);
                false
            }
        }
    }

    pub async fn create(&self, new_link: NewLink) -> Result<Link, DirectoryError> {
        validate_url(&new_link.original_url)?;
        let password_hash = password::hash_new_password(new_link.password.as_deref())?;
        let now = Utc::now().timestamp();

        let mut record = LinkRecord {
            short_code: String::new(),
            original_url: new_link.original_url,
            owner_id: new_link.owner_id,
            expires_at: new_link.expires_at,
            password_hash,
        };

        let link = match new_link.short_code {
            Some(custom) => {
                validate_custom_code(&custom)?;
                record.short_code = custom;
                self.storage
                    .create_link(&record, now)
                    .await
                    .map_err(|e| storage_error(e, &record.short_code))?
            }
            None => self.create_with_generated_code(&mut record, now).await?,
        };

        self.cache.invalidate(&link.short_code).await;
        info!(short_code = %link.short_code, "Created link");
        Ok(link)
    }

    async fn create_with_generated_code(
        &self,
        record: &mut LinkRecord,
        now: i64,
    ) -> Result<Link, DirectoryError> {
        for _ in 0..MAX_GENERATION_ATTEMPTS {
            let code = generate_short_code();
            if self.storage.short_code_exists(&code).await? {
                continue;
            }

            record.short_code = code;
            match self.storage.create_link(record, now).await {
                Ok(link) => return Ok(link),
                // Lost a race for the same code
                Err(StorageError::Conflict) => continue,
                Err(StorageError::Other(e)) => return Err(DirectoryError::Storage(e)),
            }
        }

        Err(DirectoryError::CodeGeneration(MAX_GENERATION_ATTEMPTS))
    }

    pub async fn set_active(&self, short_code: &str, is_active: bool) -> Result<bool, DirectoryError> {
        let updated = self.storage.set_link_active(short_code, is_active).await?;
        self.invalidate(short_code).await;
        Ok(updated)
    }

    pub async fn soft_delete(&self, short_code: &str) -> Result<bool, DirectoryError> {
        let deleted = self
            .storage
            .soft_delete_link(short_code, Utc::now().timestamp())
            .await?;
        self.invalidate(short_code).await;
        Ok(deleted)
    }

    pub async fn invalidate(&self, short_code: &str) {
        self.cache.invalidate(short_code).await;
    }
}

fn storage_error(error: StorageError, short_code: &str) -> DirectoryError {
    match error {
        StorageError::Conflict => DirectoryError::Conflict(short_code.to_string()),
        StorageError::Other(e) => DirectoryError::Storage(e),
    }
}

fn generate_short_code() -> String {
    (0..SHORT_CODE_LENGTH)
        .map(|_| SHORT_CODE_ALPHABET[rand::random_range(0..SHORT_CODE_ALPHABET.len())] as char)
        .collect()
}

fn validate_url(original_url: &str) -> Result<(), DirectoryError> {
    let url = Url::parse(original_url)
        .map_err(|e| DirectoryError::Invalid(format!("'{original_url}' is not a valid URL: {e}")))?;

    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(DirectoryError::Invalid(format!(
            "unsupported URL scheme '{other}'"
        ))),
    }
}

fn validate_custom_code(code: &str) -> Result<(), DirectoryError> {
    if code.is_empty() || code.len() > MAX_CUSTOM_CODE_LENGTH {
        return Err(DirectoryError::Invalid(format!(
            "custom code must be 1-{MAX_CUSTOM_CODE_LENGTH} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(DirectoryError::Invalid(
            "custom code may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::SqliteStorage;

    async fn directory() -> LinkDirectory {
        let storage = SqliteStorage::new("sqlite::memory:", 1).await.unwrap();
        storage.init().await.unwrap();
        LinkDirectory::new(Arc::new(storage), &CacheConfig::default())
    }

    fn new_link(code: Option<&str>) -> NewLink {
        NewLink {
            original_url: "https://example.com/landing".to_string(),
            short_code: code.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_generated_code_shape() {
        let code = generate_short_code();
        assert_eq!(code.len(), SHORT_CODE_LENGTH);
        assert!(code.chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn test_create_and_resolve() {
        let directory = directory().await;
        let link = directory.create(new_link(None)).await.unwrap();
        assert_eq!(link.short_code.len(), SHORT_CODE_LENGTH);

        let resolved = directory.resolve(&link.short_code).await.unwrap();
        assert_eq!(resolved.id, link.id);
        assert!(directory.can_be_accessed(&resolved));
        assert!(!directory.is_password_protected(&resolved));
    }

    #[tokio::test]
    async fn test_custom_code_conflict() {
        let directory = directory().await;
        directory.create(new_link(Some("promo"))).await.unwrap();

        let err = directory.create(new_link(Some("promo"))).await.unwrap_err();
        assert!(matches!(err, DirectoryError::Conflict(code) if code == "promo"));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected() {
        let directory = directory().await;
        assert!(matches!(
            directory.create(new_link(Some("has space"))).await,
            Err(DirectoryError::Invalid(_))
        ));

        let bad_url = NewLink {
            original_url: "ftp://example.com".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            directory.create(bad_url).await,
            Err(DirectoryError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_mutations_invalidate_cache() {
        let directory = directory().await;
        directory.create(new_link(Some("live"))).await.unwrap();
        assert!(directory.resolve("live").await.unwrap().is_active);

        assert!(directory.set_active("live", false).await.unwrap());
        let link = directory.resolve("live").await.unwrap();
        assert!(!directory.can_be_accessed(&link));

        assert!(directory.soft_delete("live").await.unwrap());
        assert!(matches!(
            directory.resolve("live").await,
            Err(DirectoryError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_password_protection() {
        let directory = directory().await;
        let link = directory
            .create(NewLink {
                password: Some("s3cret".to_string()),
                ..new_link(Some("locked"))
            })
            .await
            .unwrap();

        assert!(directory.is_password_protected(&link));
        assert!(directory.check_password(&link, "s3cret"));
        assert!(!directory.check_password(&link, "guess"));
    }
}
