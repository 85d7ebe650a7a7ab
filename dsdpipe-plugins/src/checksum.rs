use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use dsdpipe_core::PipelineError;
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a file, streamed in 64 KiB chunks.
pub fn sha256_file(path: &Path) -> Result<String, PipelineError> {
    let digest = hash_reader(path).map_err(|e| {
        PipelineError::Write(format!("failed to read {} for checksum: {}", path.display(), e))
    })?;
    Ok(hex_encode(&digest))
}

fn hash_reader(path: &Path) -> io::Result<Vec<u8>> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut chunk = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

pub fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
