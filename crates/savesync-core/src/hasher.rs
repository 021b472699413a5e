//! Streaming file digests.
//!
//! Two configurable algorithms: XxHash64 for speed, BLAKE3 when a strong
//! digest is wanted. Files are read in chunks with shared access — the
//! tracked game may still be writing while we hash.

use crate::config::HashAlgorithm;
use std::fs::File;
use std::hash::Hasher as _;
use std::io::{self, Read};
use std::path::Path;
use twox_hash::XxHash64;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Hex digest of a file's full content, streamed.
pub fn file_digest(path: &Path, algorithm: HashAlgorithm) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    match algorithm {
        HashAlgorithm::XxHash64 => {
            let mut hasher = XxHash64::with_seed(0);
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.write(&buffer[..n]);
            }
            Ok(format!("{:016x}", hasher.finish()))
        }
        HashAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            loop {
                let n = file.read(&mut buffer)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
            }
            Ok(hasher.finalize().to_hex().to_string())
        }
    }
}
