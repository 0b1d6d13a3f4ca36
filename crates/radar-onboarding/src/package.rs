use base64::Engine as _;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::OnboardingError;

type HmacSha256 = Hmac<Sha256>;

// ── Lifecycle ─────────────────────────────────────────────────────────────────

/// Which edge component this package enrolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentKind {
    Agent,
    Poller,
    Checker,
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ComponentKind::Agent => write!(f, "agent"),
            ComponentKind::Poller => write!(f, "poller"),
            ComponentKind::Checker => write!(f, "checker"),
        }
    }
}

/// Package lifecycle.
///
/// Transitions:
///   Pending → Delivered → Activated
///   Pending | Delivered → Revoked
///   Pending | Delivered → Expired (by clock, never stored back)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PackageStatus {
    #[default]
    Pending,
    Delivered,
    Activated,
    Revoked,
    Expired,
}

impl std::fmt::Display for PackageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PackageStatus::Pending => "pending",
            PackageStatus::Delivered => "delivered",
            PackageStatus::Activated => "activated",
            PackageStatus::Revoked => "revoked",
            PackageStatus::Expired => "expired",
        };
        write!(f, "{}", s)
    }
}

// ── Package ───────────────────────────────────────────────────────────────────

/// A signed enrollment package: everything an edge component needs to join a
/// partition, bound to an expiry and an HMAC signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentPackage {
    pub package_id: Uuid,
    pub partition: String,
    pub component: ComponentKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: PackageStatus,
    /// Bootstrap configuration delivered to the component.
    pub payload: serde_json::Value,
    /// Base64url HMAC-SHA256 over the signed subset.
    pub signature: String,
}

/// The subset of fields covered by the signature. Status is deliberately
/// excluded: lifecycle transitions must not invalidate the package.
#[derive(Serialize)]
struct SignedSubset<'a> {
    package_id: &'a Uuid,
    partition: &'a str,
    component: ComponentKind,
    created_at: &'a DateTime<Utc>,
    expires_at: &'a DateTime<Utc>,
    payload: &'a serde_json::Value,
}

impl EnrollmentPackage {
    /// Build and sign a new pending package.
    pub fn issue(
        secret: &[u8],
        partition: impl Into<String>,
        component: ComponentKind,
        payload: serde_json::Value,
        ttl: chrono::Duration,
    ) -> Result<Self, OnboardingError> {
        let now = Utc::now();
        let mut package = EnrollmentPackage {
            package_id: Uuid::new_v4(),
            partition: partition.into(),
            component,
            created_at: now,
            expires_at: now + ttl,
            status: PackageStatus::Pending,
            payload,
            signature: String::new(),
        };
        package.signature = package.compute_signature(secret)?;
        Ok(package)
    }

    fn compute_signature(&self, secret: &[u8]) -> Result<String, OnboardingError> {
        let subset = SignedSubset {
            package_id: &self.package_id,
            partition: &self.partition,
            component: self.component,
            created_at: &self.created_at,
            expires_at: &self.expires_at,
            payload: &self.payload,
        };
        // Struct field order is fixed, so the canonical JSON is deterministic.
        let canonical = serde_json::to_vec(&subset)?;
        let mut mac = HmacSha256::new_from_slice(secret)
            .map_err(|_| OnboardingError::SignatureMismatch)?;
        mac.update(&canonical);
        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    /// Check the signature and the expiry clock. Expired or revoked packages
    /// fail closed.
    pub fn verify(&self, secret: &[u8], now: DateTime<Utc>) -> Result<(), OnboardingError> {
        let expected = self.compute_signature(secret)?;
        if expected != self.signature {
            return Err(OnboardingError::SignatureMismatch);
        }
        if self.status == PackageStatus::Revoked {
            return Err(OnboardingError::Revoked(self.package_id.to_string()));
        }
        if now >= self.expires_at || self.status == PackageStatus::Expired {
            return Err(OnboardingError::Expired(self.package_id.to_string()));
        }
        Ok(())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
