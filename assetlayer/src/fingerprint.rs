//! Content fingerprints and remote file identifiers.
//!
//! A [`Fingerprint`] is the SHA-256 digest of a file's bytes. It is the
//! primary key for every cache layer and for transfer deduplication, and is
//! rendered as lowercase hex wherever it has to become a name (log fields,
//! on-disk cache files, CLI arguments).

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};
use thiserror::Error;
use url::Url;

/// Size of a fingerprint digest in bytes.
pub const FINGERPRINT_LEN: usize = 32;

/// Errors produced when parsing a fingerprint from text.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    /// The input was not valid hexadecimal.
    #[error("invalid hex digest: {0}")]
    InvalidHex(String),

    /// The decoded digest had the wrong number of bytes.
    #[error("digest has {actual} bytes, expected {expected}")]
    WrongLength { actual: usize, expected: usize },

    /// The URI does not end in a hex digest.
    #[error("no digest in URI: {0}")]
    MissingDigest(String),
}

/// Immutable content digest identifying a file's bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; FINGERPRINT_LEN]);

impl Fingerprint {
    /// Creates a fingerprint from raw digest bytes.
    pub const fn from_bytes(bytes: [u8; FINGERPRINT_LEN]) -> Self {
        Self(bytes)
    }

    /// Computes the fingerprint of a complete buffer.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = FingerprintHasher::new();
        hasher.update(data);
        hasher.finish()
    }

    /// Parses a hex-encoded digest.
    pub fn from_hex(s: &str) -> Result<Self, FingerprintError> {
        let decoded = hex::decode(s.trim()).map_err(|e| FingerprintError::InvalidHex(e.to_string()))?;
        let bytes: [u8; FINGERPRINT_LEN] =
            decoded
                .as_slice()
                .try_into()
                .map_err(|_| FingerprintError::WrongLength {
                    actual: decoded.len(),
                    expected: FINGERPRINT_LEN,
                })?;
        Ok(Self(bytes))
    }

    /// Returns the lowercase hex encoding of the digest.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Returns the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; FINGERPRINT_LEN] {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps log lines readable.
        write!(f, "Fingerprint({}…)", &self.to_hex()[..12])
    }
}

impl FromStr for Fingerprint {
    type Err = FingerprintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Incremental fingerprint computation over streamed chunks.
#[derive(Default)]
pub struct FingerprintHasher {
    inner: Sha256,
}

impl FingerprintHasher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.inner.update(chunk);
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.inner.finalize().into())
    }
}

/// Context under which files are addressed purely by fingerprint.
pub const HASH_CONTEXT: &str = "mhash:///";

/// A fingerprint paired with a URI it can be fetched from.
///
/// Name lookups resolve a human-readable name to one of these.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteFileId {
    pub fingerprint: Fingerprint,
    pub uri: Url,
}

impl RemoteFileId {
    pub fn new(fingerprint: Fingerprint, uri: Url) -> Self {
        Self { fingerprint, uri }
    }

    /// Builds the location of `fingerprint` in the [`HASH_CONTEXT`] namespace.
    pub fn local(fingerprint: Fingerprint) -> Result<Self, url::ParseError> {
        let uri = Url::parse(&format!("{HASH_CONTEXT}{}", fingerprint.to_hex()))?;
        Ok(Self { fingerprint, uri })
    }

    /// Parses a URI whose last path segment is the hex digest.
    pub fn from_uri(uri: Url) -> Result<Self, FingerprintError> {
        let segment = uri
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| FingerprintError::MissingDigest(uri.to_string()))?;
        let fingerprint = Fingerprint::from_hex(segment)?;
        Ok(Self { fingerprint, uri })
    }

    /// Builds the conventional `<context>/<hex>` location for a fingerprint.
    ///
    /// `context` names the service context, e.g. `mhash:///`; the hex digest
    /// is appended as the final path segment.
    pub fn from_context(context: &Url, fingerprint: Fingerprint) -> Result<Self, url::ParseError> {
        let uri = context.join(&fingerprint.to_hex())?;
        Ok(Self { fingerprint, uri })
    }
}

impl fmt::Display for RemoteFileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.uri, self.fingerprint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_id_from_uri() {
        let fp = Fingerprint::compute(b"mesh");
        let uri = Url::parse(&format!("http://cdn.example/files/{}", fp.to_hex())).unwrap();
        let id = RemoteFileId::from_uri(uri.clone()).unwrap();
        assert_eq!(id.fingerprint, fp);
        assert_eq!(id.uri, uri);

        let local = RemoteFileId::local(fp).unwrap();
        assert_eq!(local.uri.as_str(), format!("mhash:///{}", fp.to_hex()));
        assert!(matches!(
            RemoteFileId::from_uri(Url::parse("http://cdn.example/").unwrap()),
            Err(FingerprintError::MissingDigest(_))
        ));
    }

    #[test]
    fn test_compute_matches_known_digest() {
        let fp = Fingerprint::compute(b"");
        assert_eq!(
            fp.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let fp = Fingerprint::compute(b"hello world");
        let parsed: Fingerprint = fp.to_hex().parse().unwrap();
        assert_eq!(parsed, fp);
    }

    #[test]
    fn test_from_hex_rejects_wrong_length() {
        let err = Fingerprint::from_hex("abcd").unwrap_err();
        assert_eq!(
            err,
            FingerprintError::WrongLength {
                actual: 2,
                expected: FINGERPRINT_LEN
            }
        );
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(matches!(
            Fingerprint::from_hex("not-hex"),
            Err(FingerprintError::InvalidHex(_))
        ));
    }

    #[test]
    fn test_incremental_hasher_matches_one_shot() {
        let mut hasher = FingerprintHasher::new();
        hasher.update(b"hello ");
        hasher.update(b"world");
        assert_eq!(hasher.finish(), Fingerprint::compute(b"hello world"));
    }

    #[test]
    fn test_remote_file_id_from_context() {
        let fp = Fingerprint::compute(b"x");
        let ctx = Url::parse("mhash:///").unwrap();
        let id = RemoteFileId::from_context(&ctx, fp).unwrap();
        assert!(id.uri.as_str().ends_with(&fp.to_hex()));
    }
}
