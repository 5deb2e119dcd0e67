//! Storage identity: owner-scoped keys derived from content hashes.
//!
//! SDK clients compute the same values locally, so everything here must
//! stay a pure function of its inputs.

use crate::errors::{ServiceError, ServiceResult};
use sha2::{Digest, Sha256};
use std::fmt;

/// A validated SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Parse a 64-character hex digest.
    ///
    /// Rejects anything that does not decode to exactly 32 bytes, so callers
    /// can tell malformed input apart from unknown content.
    pub fn parse(hex_digest: &str) -> ServiceResult<Self> {
        let bytes = hex::decode(hex_digest)
            .map_err(|err| ServiceError::InvalidHash(format!("`{}`: {}", hex_digest, err)))?;
        let raw: [u8; 32] = bytes.try_into().map_err(|bytes: Vec<u8>| {
            ServiceError::InvalidHash(format!("expected 32 bytes, got {}", bytes.len()))
        })?;
        Ok(Self(raw))
    }

    /// Digest of `data`.
    pub fn of(data: &[u8]) -> Self {
        Self(Sha256::digest(data).into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// `hex(sha256(owner + "/" + hex(content_hash)))`.
pub fn storage_id(owner: &str, content_hash: &ContentHash) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner.as_bytes());
    hasher.update(b"/");
    hasher.update(content_hash.to_hex().as_bytes());
    hex::encode(hasher.finalize())
}

/// Backend path of the bytes for `storage_id`, sharded two levels deep:
/// `{id[0..2]}/{id[2..4]}/{id}`.
pub fn storage_path(storage_id: &str) -> String {
    if storage_id.len() >= 4 && storage_id.is_char_boundary(4) {
        format!("{}/{}/{}", &storage_id[..2], &storage_id[2..4], storage_id)
    } else {
        storage_id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO_SHA: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn parses_and_formats_hex() {
        let hash = ContentHash::parse(HELLO_SHA).unwrap();
        assert_eq!(hash, ContentHash::of(b"hello"));
        assert_eq!(hash.to_hex(), HELLO_SHA);
        assert_eq!(
            ContentHash::parse(&HELLO_SHA.to_uppercase()).unwrap(),
            hash
        );
    }

    #[test]
    fn rejects_bad_hashes() {
        assert!(matches!(
            ContentHash::parse("zz"),
            Err(ServiceError::InvalidHash(_))
        ));
        assert!(matches!(
            ContentHash::parse(&HELLO_SHA[..62]),
            Err(ServiceError::InvalidHash(_))
        ));
        assert!(matches!(
            ContentHash::parse(&format!("{}00", HELLO_SHA)),
            Err(ServiceError::InvalidHash(_))
        ));
        assert!(ContentHash::parse("").is_err());
        // exactly 64 hex characters, no surrounding whitespace
        assert!(matches!(
            ContentHash::parse(&format!(" {} ", HELLO_SHA)),
            Err(ServiceError::InvalidHash(_))
        ));
        assert!(ContentHash::parse(&format!("{}\n", HELLO_SHA)).is_err());
    }

    #[test]
    fn storage_id_is_sha256_of_owner_slash_hex() {
        let hash = ContentHash::of(b"hello");
        let expected = hex::encode(Sha256::digest(format!("ownerA/{}", HELLO_SHA)));
        assert_eq!(storage_id("ownerA", &hash), expected);
        assert_eq!(storage_id("ownerA", &hash), storage_id("ownerA", &hash));
    }

    #[test]
    fn storage_id_is_owner_scoped() {
        let hash = ContentHash::of(b"firmware");
        assert_ne!(storage_id("ownerA", &hash), storage_id("ownerB", &hash));
        assert_ne!(
            storage_id("ownerA", &hash),
            storage_id("ownerA", &ContentHash::of(b"other"))
        );
    }

    #[test]
    fn storage_path_shards_by_prefix() {
        let id = "abcdef0123";
        assert_eq!(storage_path(id), "ab/cd/abcdef0123");
        assert_eq!(storage_path("ab"), "ab");
    }
}
