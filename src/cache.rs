// Accès au cache partagé des résultats d'interaction (table `cache`).
use async_trait::async_trait;
use serde::Serialize;
use sqlx::sqlite::SqlitePool;

use crate::database::current_timestamp;
use crate::error::StoreError;
use crate::models::CacheRecord;
use crate::severity::{self, Segment, Severity};
use crate::token::CacheToken;

/// Résultat d'interaction prêt à être affiché.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InteractionResult {
    pub interact: String,
    pub explanation: Option<String>,
    pub severity: Option<Severity>,
    pub segments: Vec<Segment>,
}

impl InteractionResult {
    pub fn new(interact: String, explanation: Option<String>) -> Self {
        Self {
            severity: severity::classify(&interact),
            segments: severity::segments(&interact),
            explanation: explanation.filter(|e| !e.trim().is_empty()),
            interact,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    // Ligne présente avec un résultat non vide.
    Ready(InteractionResult),
    // Ligne présente mais résultat encore vide : traité comme un échec de cache.
    Pending,
    Missing,
}

impl From<Option<CacheRecord>> for CacheLookup {
    fn from(record: Option<CacheRecord>) -> Self {
        match record {
            None => CacheLookup::Missing,
            Some(record) => match record.interact {
                Some(interact) if !interact.trim().is_empty() => {
                    CacheLookup::Ready(InteractionResult::new(interact, record.explanation))
                }
                _ => CacheLookup::Pending,
            },
        }
    }
}

/// Lecture seule : les sessions de calcul n'écrivent jamais dans le cache.
#[async_trait]
pub trait CacheStore: Send + Sync {
    // `Ok(None)` quand aucune ligne ne correspond ; ce n'est pas une erreur.
    async fn fetch(&self, token: &CacheToken) -> Result<Option<CacheRecord>, StoreError>;

    async fn lookup(&self, token: &CacheToken) -> Result<CacheLookup, StoreError> {
        self.fetch(token).await.map(CacheLookup::from)
    }
}

pub struct SqliteCacheStore {
    db: SqlitePool,
}

impl SqliteCacheStore {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    // Écriture du workflow externe une fois le calcul terminé.
    // `INSERT ... ON CONFLICT` garde `created_at` et met à jour le reste.
    pub async fn store(
        &self,
        token: &CacheToken,
        interact: &str,
        explanation: Option<&str>,
    ) -> Result<CacheRecord, StoreError> {
        let now = current_timestamp();
        let record = sqlx::query_as::<_, CacheRecord>(
            "INSERT INTO cache (cache_token, interact, explanation, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(cache_token) DO UPDATE SET
                interact = excluded.interact,
                explanation = excluded.explanation,
                updated_at = excluded.updated_at
             RETURNING cache_token, interact, explanation, created_at, updated_at",
        )
        .bind(token.to_string())
        .bind(interact)
        .bind(explanation)
        .bind(now)
        .bind(now)
        .fetch_one(&self.db)
        .await?;

        Ok(record)
    }
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn fetch(&self, token: &CacheToken) -> Result<Option<CacheRecord>, StoreError> {
        let record = sqlx::query_as::<_, CacheRecord>(
            "SELECT cache_token, interact, explanation, created_at, updated_at
             FROM cache WHERE cache_token = ?",
        )
        .bind(token.to_string())
        .fetch_optional(&self.db)
        .await?;

        Ok(record)
    }
}
