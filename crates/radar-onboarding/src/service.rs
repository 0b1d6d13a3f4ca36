use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use radar_kv::{KvError, KvStore};

use crate::error::OnboardingError;
use crate::package::{ComponentKind, EnrollmentPackage, PackageStatus};

const PACKAGE_PREFIX: &str = "onboarding/packages";
const TOKEN_PREFIX: &str = "onboarding/tokens";

// ── Download tokens ───────────────────────────────────────────────────────────

/// A single-use token authorising one download of one package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadToken {
    pub token: String,
    pub package_id: Uuid,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub consumed: bool,
}

fn random_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

// ── Service ───────────────────────────────────────────────────────────────────

/// Lifecycle of signed enrollment packages and their download tokens, backed
/// by the KV plane. Token redemption is single-use, enforced with a CAS
/// update so two concurrent redeemers cannot both win.
pub struct OnboardingService {
    store: Arc<dyn KvStore>,
    secret: Vec<u8>,
    package_ttl: chrono::Duration,
    token_ttl: chrono::Duration,
}

impl OnboardingService {
    pub fn new(
        store: Arc<dyn KvStore>,
        secret: impl Into<Vec<u8>>,
        package_ttl: chrono::Duration,
        token_ttl: chrono::Duration,
    ) -> Self {
        OnboardingService { store, secret: secret.into(), package_ttl, token_ttl }
    }

    fn package_key(id: &Uuid) -> String {
        format!("{}/{}", PACKAGE_PREFIX, id)
    }

    fn token_key(token: &str) -> String {
        format!("{}/{}", TOKEN_PREFIX, token)
    }

    // ── Packages ──────────────────────────────────────────────────────────────

    /// Issue, sign, and persist a new pending package.
    pub async fn issue_package(
        &self,
        partition: &str,
        component: ComponentKind,
        payload: serde_json::Value,
    ) -> Result<EnrollmentPackage, OnboardingError> {
        let package = EnrollmentPackage::issue(
            &self.secret,
            partition,
            component,
            payload,
            self.package_ttl,
        )?;
        self.store_package(&package).await?;
        info!(package = %package.package_id, partition, component = %component, "enrollment package issued");
        Ok(package)
    }

    pub async fn get_package(
        &self,
        package_id: &Uuid,
    ) -> Result<EnrollmentPackage, OnboardingError> {
        let bytes = self
            .store
            .get(&Self::package_key(package_id))
            .await?
            .ok_or_else(|| OnboardingError::PackageNotFound(package_id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Signature + expiry check against the stored copy.
    pub async fn verify_package(
        &self,
        package: &EnrollmentPackage,
    ) -> Result<(), OnboardingError> {
        let stored = self.get_package(&package.package_id).await?;
        if stored.signature != package.signature {
            return Err(OnboardingError::SignatureMismatch);
        }
        stored.verify(&self.secret, Utc::now())
    }

    /// Pending|Delivered → Activated.
    pub async fn mark_activated(&self, package_id: &Uuid) -> Result<(), OnboardingError> {
        self.transition(package_id, PackageStatus::Activated, |status| {
            matches!(status, PackageStatus::Pending | PackageStatus::Delivered)
        })
        .await
    }

    /// Any non-terminal state → Revoked. Revocation always wins.
    pub async fn revoke(&self, package_id: &Uuid) -> Result<(), OnboardingError> {
        self.transition(package_id, PackageStatus::Revoked, |status| {
            !matches!(status, PackageStatus::Revoked)
        })
        .await
    }

    async fn transition(
        &self,
        package_id: &Uuid,
        to: PackageStatus,
        allowed_from: impl Fn(PackageStatus) -> bool,
    ) -> Result<(), OnboardingError> {
        let mut package = self.get_package(package_id).await?;
        if !allowed_from(package.status) {
            return Err(OnboardingError::InvalidTransition {
                from: package.status.to_string(),
                to: to.to_string(),
            });
        }
        package.status = to;
        self.store_package(&package).await?;
        info!(package = %package_id, status = %to, "package transitioned");
        Ok(())
    }

    async fn store_package(&self, package: &EnrollmentPackage) -> Result<(), OnboardingError> {
        let body = Bytes::from(serde_json::to_vec(package)?);
        self.store
            .put(&Self::package_key(&package.package_id), body, None)
            .await?;
        Ok(())
    }

    // ── Download tokens ───────────────────────────────────────────────────────

    /// Mint a single-use download token for a package that is still pending
    /// or delivered and not expired.
    pub async fn issue_download_token(
        &self,
        package_id: &Uuid,
    ) -> Result<DownloadToken, OnboardingError> {
        let package = self.get_package(package_id).await?;
        package.verify(&self.secret, Utc::now())?;
        if !matches!(package.status, PackageStatus::Pending | PackageStatus::Delivered) {
            return Err(OnboardingError::InvalidTransition {
                from: package.status.to_string(),
                to: "download".to_string(),
            });
        }

        let now = Utc::now();
        let token = DownloadToken {
            token: random_token(),
            package_id: *package_id,
            issued_at: now,
            expires_at: now + self.token_ttl,
            consumed: false,
        };
        let body = Bytes::from(serde_json::to_vec(&token)?);
        self.store.create(&Self::token_key(&token.token), body).await?;
        Ok(token)
    }

    /// Exchange a token for its package, consuming it. Exactly one of two
    /// concurrent redemptions succeeds; the package moves to Delivered.
    pub async fn redeem_download_token(
        &self,
        token: &str,
    ) -> Result<EnrollmentPackage, OnboardingError> {
        let key = Self::token_key(token);
        let entry = self
            .store
            .get_entry(&key)
            .await?
            .ok_or(OnboardingError::TokenNotFound)?;
        let mut record: DownloadToken = serde_json::from_slice(&entry.value)?;

        if record.consumed {
            return Err(OnboardingError::TokenConsumed);
        }
        if Utc::now() >= record.expires_at {
            return Err(OnboardingError::Expired(record.package_id.to_string()));
        }

        record.consumed = true;
        let body = Bytes::from(serde_json::to_vec(&record)?);
        match self.store.update(&key, body, entry.revision).await {
            Ok(_) => {}
            // Lost the race: someone else consumed it between read and write.
            Err(KvError::CasConflict { .. }) => return Err(OnboardingError::TokenConsumed),
            Err(err) => return Err(err.into()),
        }

        let package = self.get_package(&record.package_id).await?;
        package.verify(&self.secret, Utc::now())?;
        if package.status == PackageStatus::Pending {
            self.transition(&record.package_id, PackageStatus::Delivered, |status| {
                status == PackageStatus::Pending
            })
            .await?;
        }
        self.get_package(&record.package_id).await
    }
}
