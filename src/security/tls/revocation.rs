//! Revocation index
//!
//! An immutable set of revoked certificate identities built wholesale from a
//! revocation list. Reloads never mutate an index in place: a new index is
//! built and swapped in through [`SharedRevocationIndex`], so readers on the
//! handshake and request paths always see one complete index.
//!
//! Accepted revocation list contents, freely mixed:
//!
//! - DER encoded X.509 CRL, or PEM `X509 CRL` blocks (issuer + serial entries)
//! - `sha256:<hex>` lines (certificate fingerprint entries)
//! - `serial:<hex> issuer:<issuer DN>` lines (issuer + serial entries)
//!
//! Blank lines and lines starting with `#` are ignored. CRL signatures are not
//! checked; the list is consumed as already-resolved revocation status.

use super::certificate::{
    normalize_issuer, normalize_serial, CertificateFingerprint, CertificateIdentity,
};
use crate::config::RevocationFailurePolicy;
use crate::error::{Result, TrustError};

use arc_swap::ArcSwap;
use rustls::Certificate;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};
use x509_parser::prelude::*;

const CRL_PEM_BEGIN: &str = "-----BEGIN X509 CRL-----";
const CRL_PEM_END: &str = "-----END X509 CRL-----";

/// Identity of one revoked certificate.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevocationEntry {
    IssuerSerial { issuer: String, serial: Vec<u8> },
    Fingerprint(CertificateFingerprint),
}

impl RevocationEntry {
    pub fn issuer_serial(issuer: &str, serial: &[u8]) -> Self {
        RevocationEntry::IssuerSerial {
            issuer: normalize_issuer(issuer),
            serial: normalize_serial(serial),
        }
    }

    pub fn fingerprint(fingerprint: CertificateFingerprint) -> Self {
        RevocationEntry::Fingerprint(fingerprint)
    }
}

/// Set of revoked identities with O(1) lookup.
#[derive(Debug, Clone, Default)]
pub struct RevocationIndex {
    entries: HashSet<RevocationEntry>,
}

impl RevocationIndex {
    /// An index that reports nothing as revoked.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build an index from revocation list bytes. No list means an empty,
    /// fail-open index.
    pub fn build(revocation_list: Option<&[u8]>) -> Result<Self> {
        match revocation_list {
            None => Ok(Self::empty()),
            Some(bytes) => Ok(Self::from_entries(parse_revocation_list(bytes)?)),
        }
    }

    pub fn from_entries(entries: impl IntoIterator<Item = RevocationEntry>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Checks issuer + serial and the fingerprint. A certificate that cannot
    /// be parsed is looked up by fingerprint alone.
    pub fn is_revoked(&self, certificate: &Certificate) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        match CertificateIdentity::from_certificate(certificate) {
            Ok(identity) => self.is_identity_revoked(&identity),
            Err(_) => self.entries.contains(&RevocationEntry::Fingerprint(
                super::certificate::calculate_fingerprint(&certificate.0),
            )),
        }
    }

    pub fn is_identity_revoked(&self, identity: &CertificateIdentity) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        self.entries
            .contains(&RevocationEntry::Fingerprint(identity.fingerprint))
            || self.entries.contains(&RevocationEntry::IssuerSerial {
                issuer: identity.issuer.clone(),
                serial: identity.serial.clone(),
            })
    }

    pub fn contains(&self, entry: &RevocationEntry) -> bool {
        self.entries.contains(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of a reload through [`SharedRevocationIndex::reload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadOutcome {
    Replaced { entries: usize },
    /// The new list was malformed and the fail-open policy kept the old index
    KeptPrevious,
}

/// Single-writer, many-reader holder of the current [`RevocationIndex`].
pub struct SharedRevocationIndex {
    current: ArcSwap<RevocationIndex>,
}

impl SharedRevocationIndex {
    pub fn new(index: RevocationIndex) -> Self {
        Self {
            current: ArcSwap::from_pointee(index),
        }
    }

    /// Snapshot of the current index. Hold on to it for the duration of one
    /// decision so that every lookup sees the same index.
    pub fn load(&self) -> Arc<RevocationIndex> {
        self.current.load_full()
    }

    /// Swap in a new index, returning the previous one.
    pub fn replace(&self, index: RevocationIndex) -> Arc<RevocationIndex> {
        self.current.swap(Arc::new(index))
    }

    /// Rebuild from `revocation_list` and swap. On a malformed list the
    /// current index stays in place; `Fatal` reports the error, `FailOpen`
    /// logs it.
    pub fn reload(
        &self,
        revocation_list: Option<&[u8]>,
        policy: RevocationFailurePolicy,
    ) -> Result<ReloadOutcome> {
        match RevocationIndex::build(revocation_list) {
            Ok(index) => {
                let entries = index.len();
                self.replace(index);
                info!(entries, "Revocation index reloaded");
                Ok(ReloadOutcome::Replaced { entries })
            }
            Err(e) => match policy {
                RevocationFailurePolicy::Fatal => Err(e),
                RevocationFailurePolicy::FailOpen => {
                    warn!(
                        error = %e,
                        entries = self.load().len(),
                        "Revocation list rejected, keeping previous revocation index"
                    );
                    Ok(ReloadOutcome::KeptPrevious)
                }
            },
        }
    }
}

impl std::fmt::Debug for SharedRevocationIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedRevocationIndex")
            .field("entries", &self.load().len())
            .finish()
    }
}

fn malformed(reason: impl Into<String>) -> TrustError {
    TrustError::RevocationList {
        reason: reason.into(),
    }
}

fn parse_revocation_list(bytes: &[u8]) -> Result<HashSet<RevocationEntry>> {
    let mut entries = HashSet::new();

    // Binary input can only be a single DER CRL
    if bytes.first() == Some(&0x30) {
        parse_crl_der(bytes, &mut entries)?;
        return Ok(entries);
    }

    let text = std::str::from_utf8(bytes)
        .map_err(|_| malformed("revocation list is neither a DER CRL nor UTF-8 text"))?;

    let mut lines = text.lines().enumerate();
    while let Some((number, raw_line)) = lines.next() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if line == CRL_PEM_BEGIN {
            let mut block = String::from(CRL_PEM_BEGIN);
            block.push('\n');
            let mut closed = false;
            for (_, body_line) in lines.by_ref() {
                let body_line = body_line.trim();
                block.push_str(body_line);
                block.push('\n');
                if body_line == CRL_PEM_END {
                    closed = true;
                    break;
                }
            }
            if !closed {
                return Err(malformed(format!(
                    "line {}: unterminated X509 CRL block",
                    number + 1
                )));
            }
            parse_crl_pem(block.as_bytes(), number + 1, &mut entries)?;
            continue;
        }

        entries.insert(parse_entry_line(line).map_err(|reason| {
            malformed(format!("line {}: {}", number + 1, reason))
        })?);
    }

    Ok(entries)
}

fn parse_entry_line(line: &str) -> std::result::Result<RevocationEntry, String> {
    if let Some(fingerprint) = line.strip_prefix("sha256:") {
        let bytes = decode_hex(fingerprint)?;
        let fingerprint: CertificateFingerprint = bytes
            .try_into()
            .map_err(|_| "sha256 fingerprint must be 32 bytes".to_string())?;
        return Ok(RevocationEntry::Fingerprint(fingerprint));
    }

    if let Some(rest) = line.strip_prefix("serial:") {
        let (serial, issuer) = rest
            .split_once(" issuer:")
            .ok_or_else(|| "serial entry requires ' issuer:<DN>'".to_string())?;
        let serial = decode_hex(serial)?;
        if serial.is_empty() {
            return Err("serial cannot be empty".to_string());
        }
        let issuer = issuer.trim();
        if issuer.is_empty() {
            return Err("issuer cannot be empty".to_string());
        }
        return Ok(RevocationEntry::issuer_serial(issuer, &serial));
    }

    Err(format!("unrecognized revocation entry '{}'", line))
}

fn decode_hex(value: &str) -> std::result::Result<Vec<u8>, String> {
    let cleaned: String = value
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    hex::decode(&cleaned).map_err(|e| format!("invalid hex '{}': {}", value.trim(), e))
}

fn parse_crl_pem(
    block: &[u8],
    line: usize,
    entries: &mut HashSet<RevocationEntry>,
) -> Result<()> {
    let (_, pem) = x509_parser::pem::parse_x509_pem(block)
        .map_err(|e| malformed(format!("line {}: invalid X509 CRL PEM block: {}", line, e)))?;
    parse_crl_der(&pem.contents, entries)
}

fn parse_crl_der(der: &[u8], entries: &mut HashSet<RevocationEntry>) -> Result<()> {
    let (remaining, crl) = CertificateRevocationList::from_der(der)
        .map_err(|e| malformed(format!("invalid CRL: {}", e)))?;

    if !remaining.is_empty() {
        return Err(malformed("CRL contains trailing data"));
    }

    let issuer = crl.issuer().to_string();
    for revoked in crl.iter_revoked_certificates() {
        entries.insert(RevocationEntry::issuer_serial(
            &issuer,
            &revoked.serial().to_bytes_be(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::tests::TestPki;

    #[test]
    fn test_absent_list_is_fail_open() {
        let pki = TestPki::new("Revocation Test CA");
        let leaf = pki.issue_client("client-a");

        let index = RevocationIndex::build(None).unwrap();
        assert!(index.is_empty());
        assert!(!index.is_revoked(&leaf.certificate()));
        assert!(!index.is_revoked(&pki.ca.certificate()));
        assert!(!index.is_revoked(&Certificate(vec![1, 2, 3])));
    }

    #[test]
    fn test_fingerprint_entry_roundtrip() {
        let pki = TestPki::new("Revocation Test CA");
        let revoked = pki.issue_client("revoked-client");
        let other = pki.issue_client("other-client");

        let list = format!(
            "# revoked by ops\n\nsha256:{}\n",
            revoked.identity().fingerprint_hex().to_uppercase()
        );
        let index = RevocationIndex::build(Some(list.as_bytes())).unwrap();

        assert_eq!(index.len(), 1);
        assert!(index.is_revoked(&revoked.certificate()));
        assert!(!index.is_revoked(&other.certificate()));
    }

    #[test]
    fn test_issuer_serial_entry_roundtrip() {
        let pki = TestPki::new("Revocation Test CA");
        let revoked = pki.issue_client("revoked-client");
        let identity = revoked.identity();

        let serial = identity
            .serial
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(":");
        let list = format!("serial:00:{} issuer:{}\n", serial, identity.issuer);
        let index = RevocationIndex::build(Some(list.as_bytes())).unwrap();

        assert!(index.contains(&RevocationEntry::issuer_serial(
            &identity.issuer,
            &identity.serial
        )));
        assert!(index.is_revoked(&revoked.certificate()));

        // Same serial under a different issuer is a different certificate
        let foreign = format!("serial:{} issuer:CN=Somebody Else\n", identity.serial_hex());
        let index = RevocationIndex::build(Some(foreign.as_bytes())).unwrap();
        assert!(!index.is_revoked(&revoked.certificate()));
    }

    #[test]
    fn test_malformed_lines_are_rejected() {
        for list in [
            "not-an-entry",
            "sha256:abcd",
            "sha256:zz",
            "serial:0a",
            "serial:0a issuer:",
            "-----BEGIN X509 CRL-----\nAAAA\n",
        ] {
            let err = RevocationIndex::build(Some(list.as_bytes())).unwrap_err();
            assert!(
                matches!(err, TrustError::RevocationList { .. }),
                "expected malformed list for {:?}",
                list
            );
        }
    }

    #[test]
    fn test_signed_crl_in_der_and_pem() {
        let pki = TestPki::new("CRL Test CA");
        let revoked = pki.issue_client("revoked-by-crl");
        let kept = pki.issue_client("kept");

        let der = pki.ca.crl_der(&[&revoked]);
        let pem = pki.ca.crl_pem(&[&revoked]);

        for (form, bytes) in [("der", der), ("pem", pem.into_bytes())] {
            let index = RevocationIndex::build(Some(bytes.as_slice())).unwrap();
            assert_eq!(index.len(), 1, "form: {}", form);
            assert!(index.is_revoked(&revoked.certificate()), "form: {}", form);
            assert!(!index.is_revoked(&kept.certificate()), "form: {}", form);
            assert!(!index.is_revoked(&pki.ca.certificate()), "form: {}", form);

            let identity = revoked.identity();
            assert!(index.contains(&RevocationEntry::issuer_serial(
                &identity.issuer,
                &identity.serial
            )));
        }
    }

    #[test]
    fn test_malformed_der_crl_is_rejected() {
        let err = RevocationIndex::build(Some(&[0x30, 0x82, 0x00, 0x10, 0x01])).unwrap_err();
        assert!(matches!(err, TrustError::RevocationList { .. }));

        let err = RevocationIndex::build(Some(&[0xff, 0xfe, 0x00])).unwrap_err();
        assert!(matches!(err, TrustError::RevocationList { .. }));
    }

    #[test]
    fn test_shared_index_reload_policies() {
        let pki = TestPki::new("Revocation Test CA");
        let leaf = pki.issue_client("client-a");
        let list = format!("sha256:{}", leaf.identity().fingerprint_hex());

        let shared = SharedRevocationIndex::new(RevocationIndex::empty());
        let before = shared.load();

        let outcome = shared
            .reload(Some(list.as_bytes()), RevocationFailurePolicy::Fatal)
            .unwrap();
        assert_eq!(outcome, ReloadOutcome::Replaced { entries: 1 });
        assert!(shared.load().is_revoked(&leaf.certificate()));

        // Snapshots taken before the swap are unaffected
        assert!(!before.is_revoked(&leaf.certificate()));

        let err = shared
            .reload(Some(b"garbage"), RevocationFailurePolicy::Fatal)
            .unwrap_err();
        assert!(matches!(err, TrustError::RevocationList { .. }));
        assert!(shared.load().is_revoked(&leaf.certificate()));

        let outcome = shared
            .reload(Some(b"garbage"), RevocationFailurePolicy::FailOpen)
            .unwrap();
        assert_eq!(outcome, ReloadOutcome::KeptPrevious);
        assert!(shared.load().is_revoked(&leaf.certificate()));

        let outcome = shared.reload(None, RevocationFailurePolicy::Fatal).unwrap();
        assert_eq!(outcome, ReloadOutcome::Replaced { entries: 0 });
        assert!(!shared.load().is_revoked(&leaf.certificate()));
    }
}
