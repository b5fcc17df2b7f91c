//! Whole-file and per-segment digest computation.
//!
//! Generalizes the single-algorithm SHA-256 checksum into the four
//! algorithms the options enumeration recognizes. Computation happens off
//! the hot path (incrementally, streaming) the same way the original
//! single-algorithm checksum read the file in fixed-size chunks rather than
//! loading it whole.
use md5::Md5;
use sha1::Sha1;
use sha2::{Digest as _, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{DlxError, Result};

const BUF_SIZE: usize = 64 * 1024;

/// Digest algorithm recognized by `expected_digest.algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl Algorithm {
    pub fn name(self) -> &'static str {
        match self {
            Algorithm::Md5 => "MD5",
            Algorithm::Sha1 => "SHA-1",
            Algorithm::Sha256 => "SHA-256",
            Algorithm::Sha512 => "SHA-512",
        }
    }
}

/// Incremental hasher over one of the four supported algorithms.
pub enum Hasher {
    Md5(Md5),
    Sha1(Sha1),
    Sha256(Sha256),
    Sha512(Sha512),
}

impl Hasher {
    pub fn new(algorithm: Algorithm) -> Self {
        match algorithm {
            Algorithm::Md5 => Hasher::Md5(Md5::new()),
            Algorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            Algorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            Algorithm::Sha512 => Hasher::Sha512(Sha512::new()),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Md5(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Sha512(h) => h.update(data),
        }
    }

    pub fn finalize_hex(self) -> String {
        match self {
            Hasher::Md5(h) => hex::encode(h.finalize()),
            Hasher::Sha1(h) => hex::encode(h.finalize()),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
            Hasher::Sha512(h) => hex::encode(h.finalize()),
        }
    }
}

/// Computes the digest of a file on disk, reading in bounded chunks.
pub fn digest_path(path: &Path, algorithm: Algorithm) -> Result<String> {
    let mut f = File::open(path)?;
    let mut hasher = Hasher::new(algorithm);
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize_hex())
}

/// Computes a digest and compares it (case-insensitively) to `expected`.
pub fn verify_path(path: &Path, algorithm: Algorithm, expected: &str) -> Result<()> {
    let actual = digest_path(path, algorithm)?;
    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(DlxError::IntegrityMismatch {
            expected: expected.to_string(),
            actual,
        })
    }
}
