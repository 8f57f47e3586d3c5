//! Certificate identity extraction
//!
//! Parses just enough of an X.509 certificate to identify it for revocation
//! lookups: issuer, serial number and SHA-256 fingerprint.

use crate::error::{Result, TrustError};

use ring::digest;
use rustls::Certificate;
use x509_parser::prelude::*;

/// SHA-256 over the certificate DER
pub type CertificateFingerprint = [u8; 32];

/// Identifying fields of a parsed certificate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CertificateIdentity {
    pub subject: String,
    pub issuer: String,
    /// Big-endian serial without leading zero bytes
    pub serial: Vec<u8>,
    pub fingerprint: CertificateFingerprint,
    pub not_before: i64,
    pub not_after: i64,
    pub is_ca: bool,
}

impl CertificateIdentity {
    pub fn from_certificate(certificate: &Certificate) -> Result<Self> {
        Self::from_der(&certificate.0)
    }

    pub fn from_der(cert_der: &[u8]) -> Result<Self> {
        let (remaining, parsed) = X509Certificate::from_der(cert_der).map_err(|e| {
            TrustError::InvalidCertificate {
                reason: format!("Certificate parsing failed: {}", e),
            }
        })?;

        if !remaining.is_empty() {
            return Err(TrustError::InvalidCertificate {
                reason: "Certificate contains trailing data".to_string(),
            });
        }

        let is_ca = match parsed.basic_constraints() {
            Ok(Some(basic_constraints)) => basic_constraints.value.ca,
            _ => false,
        };

        Ok(Self {
            subject: parsed.subject().to_string(),
            issuer: normalize_issuer(&parsed.issuer().to_string()),
            serial: normalize_serial(&parsed.tbs_certificate.serial.to_bytes_be()),
            fingerprint: calculate_fingerprint(cert_der),
            not_before: parsed.validity().not_before.timestamp(),
            not_after: parsed.validity().not_after.timestamp(),
            is_ca,
        })
    }

    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.fingerprint)
    }

    pub fn serial_hex(&self) -> String {
        hex::encode(&self.serial)
    }
}

pub fn calculate_fingerprint(cert_der: &[u8]) -> CertificateFingerprint {
    let hash = digest::digest(&digest::SHA256, cert_der);
    let mut fingerprint = [0u8; 32];
    fingerprint.copy_from_slice(hash.as_ref());
    fingerprint
}

/// Serials compare as integers, so `00:0a` and `0a` are the same serial.
pub(crate) fn normalize_serial(serial: &[u8]) -> Vec<u8> {
    let first = serial.iter().position(|&b| b != 0).unwrap_or(serial.len());
    if first == serial.len() {
        vec![0]
    } else {
        serial[first..].to_vec()
    }
}

pub(crate) fn normalize_issuer(issuer: &str) -> String {
    issuer.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::tests::TestPki;

    #[test]
    fn test_identity_of_issued_certificate() {
        let pki = TestPki::new("Identity Test CA");
        let leaf = pki.issue_client("identity-client");

        let identity = CertificateIdentity::from_der(&leaf.der).unwrap();
        let ca_identity = CertificateIdentity::from_der(&pki.ca.der).unwrap();

        assert_eq!(identity.issuer, ca_identity.subject);
        assert!(identity.subject.contains("identity-client"));
        assert!(!identity.is_ca);
        assert!(ca_identity.is_ca);
        assert_eq!(identity.fingerprint, calculate_fingerprint(&leaf.der));
        assert_eq!(identity.fingerprint_hex().len(), 64);
        assert!(identity.not_before < identity.not_after);
    }

    #[test]
    fn test_garbage_is_invalid_certificate() {
        let err = CertificateIdentity::from_der(&[0x30, 0x03, 0x02, 0x01, 0x01]).unwrap_err();
        assert!(matches!(err, TrustError::InvalidCertificate { .. }));
    }

    #[test]
    fn test_serial_normalization() {
        assert_eq!(normalize_serial(&[0, 0, 0x0a, 0x01]), vec![0x0a, 0x01]);
        assert_eq!(normalize_serial(&[0x80]), vec![0x80]);
        assert_eq!(normalize_serial(&[0, 0]), vec![0]);
        assert_eq!(normalize_serial(&[]), vec![0]);
    }
}
