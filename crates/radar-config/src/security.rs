use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

// ── TLS material ──────────────────────────────────────────────────────────────

/// File locations of the mTLS trust material. Paths may be relative; callers
/// normalise them against `cert_dir` before use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TlsConfig {
    #[serde(default)]
    pub cert_file: PathBuf,
    #[serde(default)]
    pub key_file: PathBuf,
    #[serde(default)]
    pub ca_file: PathBuf,
    /// CA used to verify client certificates. Falls back to `ca_file` when
    /// absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_ca_file: Option<PathBuf>,
}

impl TlsConfig {
    /// Join every relative path onto `cert_dir`. Absolute paths are kept as-is.
    pub fn normalize(&mut self, cert_dir: &Path) {
        for path in [&mut self.cert_file, &mut self.key_file, &mut self.ca_file] {
            if !path.as_os_str().is_empty() && path.is_relative() {
                *path = cert_dir.join(&*path);
            }
        }
        if let Some(client_ca) = &mut self.client_ca_file {
            if client_ca.is_relative() {
                *client_ca = cert_dir.join(&*client_ca);
            }
        }
    }

    /// The CA bundle used to verify peer client certificates.
    pub fn effective_client_ca(&self) -> &Path {
        self.client_ca_file.as_deref().unwrap_or(&self.ca_file)
    }
}

// ── Security envelope ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SecurityMode {
    /// No transport security. Only acceptable for tests and loopback tooling.
    #[default]
    None,
    /// Mutual TLS: both sides present certificates.
    Mtls,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub mode: SecurityMode,
    /// Base directory joined onto relative TLS paths.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert_dir: Option<PathBuf>,
    #[serde(default)]
    pub tls: TlsConfig,
    /// Expected server name for client-side verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
}

impl SecurityConfig {
    /// Normalise TLS paths and check that an mTLS profile names all of its
    /// trust material. Returns the validated config.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if let Some(cert_dir) = self.cert_dir.clone() {
            self.tls.normalize(&cert_dir);
        }
        if self.mode == SecurityMode::Mtls {
            for (field, path) in [
                ("tls.cert_file", &self.tls.cert_file),
                ("tls.key_file", &self.tls.key_file),
                ("tls.ca_file", &self.tls.ca_file),
            ] {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::invalid(field, "required for mtls mode"));
                }
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_paths_join_cert_dir() {
        let mut tls = TlsConfig {
            cert_file: PathBuf::from("server.pem"),
            key_file: PathBuf::from("server-key.pem"),
            ca_file: PathBuf::from("/etc/radar/root.pem"),
            client_ca_file: None,
        };
        tls.normalize(Path::new("/etc/radar/certs"));
        assert_eq!(tls.cert_file, PathBuf::from("/etc/radar/certs/server.pem"));
        assert_eq!(tls.key_file, PathBuf::from("/etc/radar/certs/server-key.pem"));
        // Absolute paths untouched.
        assert_eq!(tls.ca_file, PathBuf::from("/etc/radar/root.pem"));
    }

    #[test]
    fn mtls_requires_all_three_files() {
        let config = SecurityConfig {
            mode: SecurityMode::Mtls,
            cert_dir: None,
            tls: TlsConfig {
                cert_file: PathBuf::from("cert.pem"),
                key_file: PathBuf::from("key.pem"),
                ca_file: PathBuf::new(),
                client_ca_file: None,
            },
            server_name: None,
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("tls.ca_file"));
    }

    #[test]
    fn none_mode_skips_file_checks() {
        let config = SecurityConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn client_ca_falls_back_to_ca_file() {
        let tls = TlsConfig {
            cert_file: PathBuf::from("c"),
            key_file: PathBuf::from("k"),
            ca_file: PathBuf::from("/ca.pem"),
            client_ca_file: None,
        };
        assert_eq!(tls.effective_client_ca(), Path::new("/ca.pem"));
    }

    #[test]
    fn json_config_normalises_relative_paths() {
        let json = r#"{"mode": "mtls", "cert_dir": "/etc/radar",
                       "tls": {"cert_file": "a.pem", "key_file": "b.pem", "ca_file": "c.pem"}}"#;
        let config: SecurityConfig = serde_json::from_str(json).unwrap();
        let config = config.validate().unwrap();
        assert_eq!(config.tls.cert_file, PathBuf::from("/etc/radar/a.pem"));
    }
}
