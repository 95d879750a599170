//! TLS policy resolution: internal ACME vs. self-signed CA fallback.

use std::path::Path;

use crate::payload::TlsPolicy;

/// Resolve which TLS policy the proxy payload should declare: an internal
/// ACME issuer pointed at the local certificate authority when its root
/// cert is on disk and its ACME directory is reachable, otherwise a
/// fallback to the proxy's own self-signed CA.
pub fn resolve_tls_policy(ca_root_path: &Path, acme_directory_url: &str, acme_reachable: bool) -> TlsPolicy {
    if ca_root_path.exists() && acme_reachable {
        TlsPolicy::InternalAcme {
            directory_url: acme_directory_url.to_string(),
            ca_root_path: ca_root_path.display().to_string(),
        }
    } else {
        TlsPolicy::SelfSigned
    }
}

/// Days remaining until an X.509 certificate (PEM-encoded) expires.
///
/// Used to decide when the proxy's self-signed fallback certificate needs
/// regenerating.
pub fn days_until_expiry(cert_pem: &str) -> crate::Result<i64> {
    use base64::Engine;
    use x509_parser::prelude::*;

    let start = cert_pem
        .find("-----BEGIN CERTIFICATE-----")
        .ok_or_else(|| crate::Error::PushFailed("no certificate found in PEM".into()))?;
    let end = cert_pem
        .find("-----END CERTIFICATE-----")
        .ok_or_else(|| crate::Error::PushFailed("no certificate end marker in PEM".into()))?;
    let section = &cert_pem[start..end + "-----END CERTIFICATE-----".len()];
    let base64_content: String = section.lines().filter(|l| !l.starts_with("-----")).collect();
    let der = base64::engine::general_purpose::STANDARD
        .decode(base64_content)
        .map_err(|e| crate::Error::PushFailed(format!("bad certificate base64: {e}")))?;
    let (_, cert) = X509Certificate::from_der(&der)
        .map_err(|e| crate::Error::PushFailed(format!("bad certificate DER: {e:?}")))?;

    let not_after = cert.validity().not_after.timestamp();
    let expiry = chrono::DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| crate::Error::PushFailed("invalid expiry timestamp".into()))?;
    Ok(expiry.signed_duration_since(chrono::Utc::now()).num_days())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn missing_ca_root_falls_back_to_self_signed() {
        let policy = resolve_tls_policy(&PathBuf::from("/nonexistent/ca.crt"), "https://ca/acme", true);
        assert_eq!(policy, TlsPolicy::SelfSigned);
    }

    #[test]
    fn unreachable_acme_falls_back_to_self_signed_even_with_ca_root() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let policy = resolve_tls_policy(tmp.path(), "https://ca/acme", false);
        assert_eq!(policy, TlsPolicy::SelfSigned);
    }

    #[test]
    fn reachable_acme_with_ca_root_uses_internal_acme() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        let policy = resolve_tls_policy(tmp.path(), "https://ca/acme", true);
        assert!(matches!(policy, TlsPolicy::InternalAcme { .. }));
    }
}
