use std::sync::Arc;

use tonic::service::Interceptor;
use tonic::{Request, Status};
use tracing::debug;
use x509_cert::der::Decode as _;
use x509_cert::Certificate;

use radar_config::{RbacConfig, Role};

/// The authenticated caller, resolved by [`AuthInterceptor`] and stashed in
/// request extensions for per-method role checks.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    /// RFC 4514 string form of the client certificate's Subject DN.
    pub subject: String,
    pub role: Role,
}

/// Shared by unary and streaming RPCs: extracts the peer identity from the
/// first client certificate and resolves its role. No certificate is
/// `Unauthenticated`; an identity missing from the role map is
/// `PermissionDenied` before any handler runs.
#[derive(Clone)]
pub struct AuthInterceptor {
    rbac: Arc<RbacConfig>,
}

impl AuthInterceptor {
    pub fn new(rbac: Arc<RbacConfig>) -> Self {
        AuthInterceptor { rbac }
    }
}

impl Interceptor for AuthInterceptor {
    fn call(&mut self, mut request: Request<()>) -> Result<Request<()>, Status> {
        let certs = request
            .peer_certs()
            .ok_or_else(|| Status::unauthenticated("client certificate required"))?;
        let first = certs
            .first()
            .ok_or_else(|| Status::unauthenticated("empty client certificate chain"))?;

        let subject = subject_from_der(first.as_ref())
            .map_err(|reason| Status::unauthenticated(reason))?;
        let role = self
            .rbac
            .role_for(&subject)
            .ok_or_else(|| Status::permission_denied(format!("unknown identity: {subject}")))?;

        debug!(%subject, %role, "caller authenticated");
        request.extensions_mut().insert(CallerIdentity { subject, role });
        Ok(request)
    }
}

/// Stable string identity of a peer certificate: the RFC 4514 rendering of
/// its Subject DN.
pub fn subject_from_der(der: &[u8]) -> Result<String, String> {
    let cert = Certificate::from_der(der)
        .map_err(|e| format!("unparseable client certificate: {e}"))?;
    Ok(cert.tbs_certificate.subject.to_string())
}

/// Per-method role check run at the top of every handler.
pub fn require_role(
    extensions: &tonic::Extensions,
    needs_write: bool,
) -> Result<&CallerIdentity, Status> {
    let identity = extensions
        .get::<CallerIdentity>()
        .ok_or_else(|| Status::unauthenticated("caller identity missing"))?;
    let allowed = if needs_write {
        identity.role.can_write()
    } else {
        identity.role.can_read()
    };
    if !allowed {
        return Err(Status::permission_denied(format!(
            "role {} may not perform this operation",
            identity.role
        )));
    }
    Ok(identity)
}
