//! Retry and idempotency plumbing shared by the handlers

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Serialize};

use uuid::Uuid;

use crate::domain::{DomainError, ErrorClass};
use crate::error::AppError;
use crate::idempotency::IdempotentRequest;
use crate::ledger::LedgerTx;

/// Attempts per operation, counting the first
pub const MAX_ATTEMPTS: u32 = 3;

/// Run one whole operation, retrying it from scratch on transaction conflicts.
///
/// `attempt` must begin and commit its own transaction so nothing from a
/// failed attempt survives.
pub(crate) async fn with_retry<T, F, Fut>(operation: &'static str, mut attempt: F) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let mut tries = 0;
    loop {
        tries += 1;
        match attempt().await {
            Err(e) if e.is_retryable() && tries < MAX_ATTEMPTS => {
                let delay = Duration::from_millis(50 * tries as u64);
                tracing::warn!(
                    operation,
                    error = %e,
                    "Transaction conflict, retrying (attempt {}/{})",
                    tries,
                    MAX_ATTEMPTS
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                if let Some(domain) = e.domain() {
                    if domain.class() == ErrorClass::Invariant {
                        tracing::error!(operation, error = ?domain, "Balance invariant violation, nothing committed");
                    }
                }
                return Err(e);
            }
            ok => return ok,
        }
    }
}

/// Build the idempotent request for a command when the caller sent a key
pub(crate) fn idempotent<C: Serialize>(
    key: Option<&str>,
    operation: &'static str,
    command: &C,
) -> Result<Option<IdempotentRequest>, AppError> {
    key.map(|k| IdempotentRequest::new(k, operation, command))
        .transpose()
        .map_err(AppError::from)
}

pub(crate) fn not_found(what: &str, id: Uuid) -> DomainError {
    DomainError::HolderNotFound(format!("{} {}", what, id))
}

/// Stored result of an earlier request with the same key, if any
pub(crate) async fn replayed<T: DeserializeOwned>(
    request: Option<&IdempotentRequest>,
    tx: &mut dyn LedgerTx,
    now: DateTime<Utc>,
) -> Result<Option<T>, AppError> {
    match request {
        Some(req) => Ok(req.replay(tx, now).await?),
        None => Ok(None),
    }
}

/// Remember the result under the request's key, then commit
pub(crate) async fn finish<T: Serialize>(
    mut tx: Box<dyn LedgerTx>,
    request: Option<&IdempotentRequest>,
    result: &T,
    now: DateTime<Utc>,
    ttl: chrono::Duration,
) -> Result<(), AppError> {
    if let Some(req) = request {
        req.remember(tx.as_mut(), result, now, ttl).await?;
    }
    tx.commit().await?;
    Ok(())
}
