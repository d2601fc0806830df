//! SHA-256 content verification.
//!
//! Every blob entering the store is hashed and compared against the digest
//! it was requested under; a mismatch is never retried.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest as _, Sha256};

use burrow_common::error::{BurrowError, Result};
use burrow_common::types::Digest;

/// Hashes everything `reader` yields.
///
/// # Errors
///
/// Returns the underlying read error.
pub fn hash_reader(mut reader: impl Read) -> io::Result<(Digest, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = vec![0_u8; 64 * 1024];
    let mut total = 0_u64;
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        total += n as u64;
    }
    Ok((finish(hasher), total))
}

/// Hashes an in-memory buffer.
#[must_use]
pub fn hash_bytes(data: &[u8]) -> Digest {
    let mut hasher = Sha256::new();
    hasher.update(data);
    finish(hasher)
}

/// Computes the SHA-256 digest of a file.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub fn hash_file(path: &Path) -> Result<Digest> {
    tracing::debug!(path = %path.display(), "computing SHA-256 hash");
    let file = File::open(path).map_err(|e| BurrowError::io(path, e))?;
    hash_reader(file)
        .map(|(digest, _)| digest)
        .map_err(|e| BurrowError::io(path, e))
}

/// Validates that a file matches `expected`.
///
/// # Errors
///
/// Returns `BurrowError::Integrity` if the digests differ.
pub fn validate_hash(path: &Path, expected: &Digest) -> Result<()> {
    let actual = hash_file(path)?;
    if &actual != expected {
        return Err(BurrowError::Integrity {
            resource: path.display().to_string(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        });
    }
    Ok(())
}

fn finish(hasher: Sha256) -> Digest {
    Digest::from_bytes(&hasher.finalize().into())
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";

    #[test]
    fn hash_bytes_matches_known_vector() {
        assert_eq!(hash_bytes(b"hello").as_hex(), HELLO);
    }

    #[test]
    fn validate_hash_accepts_matching_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, "hello").expect("write");
        validate_hash(&path, &Digest::parse(HELLO).expect("digest")).expect("valid");
    }

    #[test]
    fn validate_hash_rejects_mismatch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("blob");
        std::fs::write(&path, "tampered").expect("write");
        let err = validate_hash(&path, &Digest::parse(HELLO).expect("digest")).unwrap_err();
        assert_eq!(err.kind(), "integrity");
    }
}
