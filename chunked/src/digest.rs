//! Algorithm-prefixed content digests (`sha256:<hex>`).

use std::fmt;
use std::str::FromStr;

use a3s_storage_core::error::{Result, StorageError};
use sha2::{Digest as _, Sha256, Sha384, Sha512};

/// Supported digest algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
            Algorithm::Sha384 => "sha384",
            Algorithm::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoding of a digest.
    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
            Algorithm::Sha384 => 96,
            Algorithm::Sha512 => 128,
        }
    }

    fn hash_hex(&self, data: &[u8]) -> String {
        match self {
            Algorithm::Sha256 => hex::encode(Sha256::digest(data)),
            Algorithm::Sha384 => hex::encode(Sha384::digest(data)),
            Algorithm::Sha512 => hex::encode(Sha512::digest(data)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Algorithm {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "sha256" => Ok(Algorithm::Sha256),
            "sha384" => Ok(Algorithm::Sha384),
            "sha512" => Ok(Algorithm::Sha512),
            other => Err(StorageError::InvalidDigest(format!(
                "unsupported digest algorithm: {:?}",
                other
            ))),
        }
    }
}

/// A parsed digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    encoded: String,
}

impl Digest {
    /// Compute the digest of `data`.
    pub fn compute(algorithm: Algorithm, data: &[u8]) -> Self {
        Self {
            algorithm,
            encoded: algorithm.hash_hex(data),
        }
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// Lowercase hex part.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Check that `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> Result<()> {
        let actual = Self::compute(self.algorithm, data);
        if actual != *self {
            return Err(StorageError::ChecksumMismatch {
                expected: self.to_string(),
                actual: actual.to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

impl FromStr for Digest {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let (algorithm, encoded) = s
            .split_once(':')
            .ok_or_else(|| StorageError::InvalidDigest(format!("invalid checksum digest format: {:?}", s)))?;
        let algorithm: Algorithm = algorithm.parse()?;

        if encoded.len() != algorithm.hex_len() {
            return Err(StorageError::InvalidDigest(format!(
                "invalid checksum digest length: {:?}",
                s
            )));
        }
        if !encoded.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(StorageError::InvalidDigest(format!(
                "invalid checksum digest format: {:?}",
                s
            )));
        }

        Ok(Self {
            algorithm,
            encoded: encoded.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str =
        "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_parse_and_display() {
        let digest: Digest = EMPTY_SHA256.parse().unwrap();
        assert_eq!(digest.algorithm(), Algorithm::Sha256);
        assert_eq!(digest.to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_compute_matches_known_value() {
        assert_eq!(Digest::compute(Algorithm::Sha256, b"").to_string(), EMPTY_SHA256);
    }

    #[test]
    fn test_verify() {
        let digest = Digest::compute(Algorithm::Sha512, b"toc");
        digest.verify(b"toc").unwrap();

        let err = digest.verify(b"tok").unwrap_err();
        match err {
            StorageError::ChecksumMismatch { expected, actual } => {
                assert_eq!(expected, digest.to_string());
                assert!(actual.starts_with("sha512:"));
                assert_ne!(expected, actual);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_sha384_round_trip() {
        let digest = Digest::compute(Algorithm::Sha384, b"layer");
        let parsed: Digest = digest.to_string().parse().unwrap();
        assert_eq!(parsed, digest);
        assert_eq!(parsed.encoded().len(), 96);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        for bad in [
            "",
            "sha256",
            "md5:d41d8cd98f00b204e9800998ecf8427e",
            "sha256:abc",
            "sha256:E3B0C44298FC1C149AFBF4C8996FB92427AE41E4649B934CA495991B7852B855",
            "sha256:zzb0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855",
        ] {
            let err = bad.parse::<Digest>().unwrap_err();
            assert!(matches!(err, StorageError::InvalidDigest(_)), "{bad}");
        }
    }
}
