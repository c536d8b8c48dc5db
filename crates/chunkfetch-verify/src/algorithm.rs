use std::fmt;
use std::str::FromStr;

use digest::Digest;

use crate::{Result, VerificationError};

/// Digest algorithms a download descriptor may name for verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    pub const ALL: [HashAlgorithm; 5] = [
        HashAlgorithm::Md5,
        HashAlgorithm::Sha1,
        HashAlgorithm::Sha256,
        HashAlgorithm::Sha384,
        HashAlgorithm::Sha512,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Md5 => "MD5",
            Self::Sha1 => "SHA-1",
            Self::Sha256 => "SHA-256",
            Self::Sha384 => "SHA-384",
            Self::Sha512 => "SHA-512",
        }
    }

    /// Length in bytes of a digest produced by this algorithm.
    pub fn digest_len(self) -> usize {
        match self {
            Self::Md5 => 16,
            Self::Sha1 => 20,
            Self::Sha256 => 32,
            Self::Sha384 => 48,
            Self::Sha512 => 64,
        }
    }

    /// One-shot digest of an in-memory buffer.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Md5 => md5::Md5::digest(data).to_vec(),
            Self::Sha1 => sha1::Sha1::digest(data).to_vec(),
            Self::Sha256 => sha2::Sha256::digest(data).to_vec(),
            Self::Sha384 => sha2::Sha384::digest(data).to_vec(),
            Self::Sha512 => sha2::Sha512::digest(data).to_vec(),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.name()) }
}

impl FromStr for HashAlgorithm {
    type Err = VerificationError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha384" => Ok(Self::Sha384),
            "sha512" => Ok(Self::Sha512),
            _ => Err(VerificationError::UnknownAlgorithm(s.to_string())),
        }
    }
}

/// Expected digest of a download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checksum {
    algorithm: HashAlgorithm,
    digest:    Vec<u8>,
}

impl Checksum {
    pub fn new(algorithm: HashAlgorithm, digest: Vec<u8>) -> Result<Self> {
        if digest.len() != algorithm.digest_len() {
            return Err(VerificationError::InvalidLength {
                algorithm: algorithm.name(),
                expected:  algorithm.digest_len(),
                actual:    digest.len(),
            });
        }
        Ok(Self { algorithm, digest })
    }

    /// Parse a hex digest, case-insensitive, surrounding whitespace ignored.
    pub fn from_hex(algorithm: HashAlgorithm, hex_digest: &str) -> Result<Self> {
        let digest = hex::decode(hex_digest.trim())?;
        Self::new(algorithm, digest)
    }

    pub fn algorithm(&self) -> HashAlgorithm { self.algorithm }

    pub fn digest(&self) -> &[u8] { &self.digest }

    pub fn to_hex(&self) -> String { hex::encode(&self.digest) }

    pub fn verify(&self, actual: &[u8]) -> Result<()> {
        if actual == self.digest.as_slice() {
            Ok(())
        } else {
            Err(VerificationError::Mismatch {
                expected: self.digest.clone(),
                actual:   actual.to_vec(),
            })
        }
    }
}
