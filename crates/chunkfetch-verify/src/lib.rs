//! Checksum primitives for chunked downloads.
//!
//! Hashes are computed while data moves to its destination, so an assembled
//! file never has to be read back just to be verified.
//!
//! # Example
//!
//! ```
//! use chunkfetch_verify::{Checksum, HashAlgorithm};
//!
//! let expected = Checksum::from_hex(
//!     HashAlgorithm::Sha256,
//!     "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9",
//! )
//! .unwrap();
//!
//! expected.verify(&HashAlgorithm::Sha256.digest(b"hello world")).unwrap();
//! ```

pub use self::algorithm::{Checksum, HashAlgorithm};
pub use self::error::{Result, VerificationError};
pub use self::hasher::{
    AnyHasher, DigestHasher, Hasher, Md5Hasher, Sha1Hasher, Sha256Hasher, Sha384Hasher,
    Sha512Hasher,
};
pub use self::writer::HashingWriter;

mod algorithm;
mod error;
mod hasher;
mod writer;
