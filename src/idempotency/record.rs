//! Idempotency records
//!
//! A record is written in the same transaction as the movements it guards, so
//! a retried request either finds the stored result or does the work itself.

use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::ledger::{LedgerError, LedgerTx};

/// Stored outcome of one idempotent request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub operation: String,
    pub request_hash: String,
    pub response: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Idempotency Error
#[derive(Debug, thiserror::Error)]
pub enum IdempotencyError {
    #[error("Idempotency key {0} was already used for a different request")]
    HashMismatch(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A request carrying an idempotency key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentRequest {
    pub key: String,
    pub operation: &'static str,
    pub request_hash: String,
}

impl IdempotentRequest {
    /// Bind a key to an operation and the canonical JSON of its command
    pub fn new<C: Serialize>(key: impl Into<String>, operation: &'static str, command: &C) -> Result<Self, IdempotencyError> {
        let body = serde_json::to_vec(command)?;
        let mut scoped = Vec::with_capacity(operation.len() + 1 + body.len());
        scoped.extend_from_slice(operation.as_bytes());
        scoped.push(b':');
        scoped.extend_from_slice(&body);

        Ok(Self {
            key: key.into(),
            operation,
            request_hash: compute_request_hash(&scoped),
        })
    }

    /// Look up a previous result for this key inside the transaction.
    ///
    /// Expired records are ignored; the write below replaces them.
    pub async fn replay<T: DeserializeOwned>(
        &self,
        tx: &mut dyn LedgerTx,
        now: DateTime<Utc>,
    ) -> Result<Option<T>, IdempotencyError> {
        let Some(existing) = tx.idempotency_record(&self.key).await? else {
            return Ok(None);
        };
        if existing.is_expired(now) {
            return Ok(None);
        }
        if existing.request_hash != self.request_hash || existing.operation != self.operation {
            return Err(IdempotencyError::HashMismatch(self.key.clone()));
        }

        tracing::info!(key = %self.key, operation = self.operation, "Replaying idempotent request");
        Ok(Some(serde_json::from_value(existing.response)?))
    }

    /// Store the result of the request in the same transaction
    pub async fn remember<T: Serialize>(
        &self,
        tx: &mut dyn LedgerTx,
        result: &T,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Result<(), IdempotencyError> {
        let record = IdempotencyRecord {
            key: self.key.clone(),
            operation: self.operation.to_string(),
            request_hash: self.request_hash.clone(),
            response: serde_json::to_value(result)?,
            created_at: now,
            expires_at: now + ttl,
        };
        tx.save_idempotency_record(&record).await?;
        Ok(())
    }
}

/// Compute SHA-256 hash of request body for conflict detection
pub fn compute_request_hash(body: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}
