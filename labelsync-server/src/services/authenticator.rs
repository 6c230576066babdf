//! Six digit access codes with shared-pool lockout
//!
//! A request is accepted when its code matches any active, unlocked
//! credential. A miss counts against every active, unlocked credential;
//! credentials reaching [`LOCKOUT_THRESHOLD`] failures are locked for
//! [`LOCKOUT_MINUTES`]. Verification runs in one transaction behind a
//! process-wide mutex so concurrent misses cannot lose increments.

use chrono::{DateTime, Duration, Utc};
use labelsync_common::{time, Error, Result};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::db::{credentials, ClientCredential};

/// Consecutive failures that lock a credential
pub const LOCKOUT_THRESHOLD: i64 = 5;

/// Lock duration once the threshold is reached
pub const LOCKOUT_MINUTES: i64 = 5;

/// Length of an access code
pub const CODE_LENGTH: usize = 6;

/// Verification failures
#[derive(Debug, Error)]
pub enum AuthError {
    /// Not exactly six ASCII digits; no accounting was done
    #[error("access code must be 6 digits")]
    Malformed,

    /// No active, unlocked credential matched
    #[error("access code rejected")]
    Denied,

    #[error("Database error: {0}")]
    Database(#[from] Error),
}

impl From<sqlx::Error> for AuthError {
    fn from(err: sqlx::Error) -> Self {
        AuthError::Database(err.into())
    }
}

/// True for exactly six ASCII digits
pub fn is_valid_code(code: &str) -> bool {
    code.len() == CODE_LENGTH && code.bytes().all(|b| b.is_ascii_digit())
}

/// SHA-256 hex digest stored in `code_hash`
pub fn hash_code(code: &str) -> String {
    format!("{:x}", Sha256::digest(code.as_bytes()))
}

fn is_locked(credential: &ClientCredential, now: DateTime<Utc>) -> bool {
    credential
        .locked_until
        .as_deref()
        .and_then(|until| time::from_db_timestamp(until).ok())
        .is_some_and(|until| now < until)
}

fn matches(credential: &ClientCredential, code: &str, code_hash: &str) -> bool {
    credential.code_plain.as_deref() == Some(code)
        || credential
            .code_hash
            .as_deref()
            .is_some_and(|h| h.eq_ignore_ascii_case(code_hash))
}

/// Verifies access codes and manages the credential pool (cheap to clone)
#[derive(Clone)]
pub struct AccessAuthenticator {
    pool: SqlitePool,
    lock: Arc<Mutex<()>>,
}

impl AccessAuthenticator {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Verify `code` against the pool at the current time
    pub async fn verify(&self, code: &str) -> std::result::Result<ClientCredential, AuthError> {
        self.verify_at(code, time::now()).await
    }

    /// Verify `code` as of `now`
    pub async fn verify_at(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> std::result::Result<ClientCredential, AuthError> {
        if !is_valid_code(code) {
            return Err(AuthError::Malformed);
        }

        let _guard = self.lock.lock().await;
        let mut tx = self.pool.begin().await?;

        let candidates = credentials::list_active(&mut tx).await?;
        let code_hash = hash_code(code);
        let stamp = time::to_db_timestamp(now);

        if let Some(found) = candidates
            .iter()
            .find(|c| !is_locked(c, now) && matches(c, code, &code_hash))
        {
            credentials::record_success(&mut tx, found.id, &stamp).await?;
            tx.commit().await?;

            debug!(credential_id = found.id, "Access code accepted");
            return Ok(ClientCredential {
                fail_count: 0,
                locked_until: None,
                last_used: Some(stamp),
                ..found.clone()
            });
        }

        let lock_until = time::to_db_timestamp(now + Duration::minutes(LOCKOUT_MINUTES));
        let mut newly_locked = 0;
        for credential in candidates.iter().filter(|c| !is_locked(c, now)) {
            let fail_count = credential.fail_count + 1;
            let locked_until = if fail_count >= LOCKOUT_THRESHOLD {
                newly_locked += 1;
                Some(lock_until.as_str())
            } else {
                None
            };
            credentials::record_failure(&mut tx, credential.id, fail_count, locked_until).await?;
        }
        tx.commit().await?;

        if newly_locked > 0 {
            warn!(locked = newly_locked, "Access credentials locked after repeated failures");
        } else {
            debug!("Access code rejected");
        }
        Err(AuthError::Denied)
    }

    /// Add a credential; only the hash of `code` is stored
    pub async fn create(&self, code: &str, description: &str) -> Result<ClientCredential> {
        let code = code.trim();
        if !is_valid_code(code) {
            return Err(Error::InvalidInput(format!(
                "access code must be {} digits",
                CODE_LENGTH
            )));
        }
        let created_at = time::to_db_timestamp(time::now());
        let id = credentials::insert_credential(&self.pool, &hash_code(code), description.trim(), &created_at)
            .await?;
        info!(credential_id = id, "Access credential created");

        credentials::get_credential(&self.pool, id)
            .await?
            .ok_or_else(|| Error::Internal(format!("credential {} vanished after insert", id)))
    }

    pub async fn list(&self) -> Result<Vec<ClientCredential>> {
        credentials::list_all(&self.pool).await
    }

    /// Enable or disable a credential
    pub async fn set_active(&self, id: i64, active: bool) -> Result<ClientCredential> {
        if !credentials::set_active(&self.pool, id, active).await? {
            return Err(Error::NotFound(format!("credential {}", id)));
        }
        info!(credential_id = id, active, "Access credential updated");
        credentials::get_credential(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("credential {}", id)))
    }

    /// Flip a credential between active and disabled
    pub async fn toggle(&self, id: i64) -> Result<ClientCredential> {
        let current = credentials::get_credential(&self.pool, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("credential {}", id)))?;
        self.set_active(id, !current.active).await
    }

    pub async fn delete(&self, id: i64) -> Result<()> {
        if !credentials::delete_credential(&self.pool, id).await? {
            return Err(Error::NotFound(format!("credential {}", id)));
        }
        info!(credential_id = id, "Access credential deleted");
        Ok(())
    }
}
