//! Flat-index persistence (save/load)
//!
//! Binary layout: an 8-byte magic/version prefix, the dimension and vector
//! count, then the raw row-major f32 payload. A blake3 checksum sidecar
//! (`{file}.checksum`) is written last so a crash mid-save is detected on
//! load. The checksums catch accidental corruption (disk errors, partial
//! writes), not tampering.

use std::path::Path;

use super::{FlatIndex, IndexError};
use crate::store::write_atomic;

const MAGIC: &[u8; 4] = b"MNIX";
const VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8; // magic + version + dim + count

impl FlatIndex {
    /// Serialize to `path` atomically (write-temp, rename), then publish the
    /// checksum sidecar. The old index stays intact if anything fails.
    pub fn save(&self, path: &Path) -> Result<(), IndexError> {
        let _span = tracing::info_span!("index_save", vectors = self.ntotal()).entered();

        let mut bytes = Vec::with_capacity(HEADER_LEN + self.raw_data().len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dim() as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.ntotal() as u64).to_le_bytes());
        bytes.extend_from_slice(bytemuck::cast_slice(self.raw_data()));

        let checksum = blake3::hash(&bytes).to_hex().to_string();
        write_atomic(path, &bytes)?;
        write_atomic(&checksum_path(path), checksum.as_bytes())?;

        tracing::info!(
            vectors = self.ntotal(),
            dim = self.dim(),
            path = %path.display(),
            "Vector index saved"
        );
        Ok(())
    }

    /// Load an index, verifying the checksum sidecar when present. A missing
    /// sidecar only warns — indexes written by hand or by older builds stay
    /// loadable.
    pub fn load(path: &Path) -> Result<Self, IndexError> {
        if !path.exists() {
            return Err(IndexError::NotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path)?;
        verify_checksum(path, &bytes)?;

        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "file too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().expect("4 bytes"));
        if version != VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported version {}",
                version
            )));
        }
        let dim = u32::from_le_bytes(bytes[8..12].try_into().expect("4 bytes")) as usize;
        let count = u64::from_le_bytes(bytes[12..20].try_into().expect("8 bytes")) as usize;
        if dim == 0 {
            return Err(IndexError::ZeroDimension);
        }

        let payload = &bytes[HEADER_LEN..];
        let expected_len = dim
            .checked_mul(count)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("vector count overflow".into()))?;
        if payload.len() != expected_len {
            return Err(IndexError::Corrupt(format!(
                "payload is {} bytes, header promises {} ({} x {} vectors)",
                payload.len(),
                expected_len,
                count,
                dim
            )));
        }

        let mut data = vec![0f32; dim * count];
        bytemuck::cast_slice_mut(&mut data).copy_from_slice(payload);

        tracing::info!(vectors = count, dim, path = %path.display(), "Vector index loaded");
        Ok(FlatIndex::from_parts(dim, data))
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }
}

fn checksum_path(path: &Path) -> std::path::PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index".to_string());
    path.with_file_name(format!("{}.checksum", name))
}

fn verify_checksum(path: &Path, bytes: &[u8]) -> Result<(), IndexError> {
    let sidecar = checksum_path(path);
    let expected = match std::fs::read_to_string(&sidecar) {
        Ok(s) => s.trim().to_string(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!(path = %path.display(), "No checksum sidecar for vector index");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };
    let actual = blake3::hash(bytes).to_hex().to_string();
    if actual != expected {
        return Err(IndexError::ChecksumMismatch {
            file: path.display().to_string(),
            expected,
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_index() -> FlatIndex {
        let mut index = FlatIndex::new(3).unwrap();
        index
            .add(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]])
            .unwrap();
        index
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");

        let index = sample_index();
        index.save(&path).unwrap();
        assert!(FlatIndex::exists(&path));

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.ntotal(), 2);
        assert_eq!(loaded.dim(), 3);
        let results = loaded.search(&[1.0, 2.0, 3.0], 1).unwrap();
        assert_eq!(results[0], (0, 0.0));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = FlatIndex::load(&dir.path().join("nope.bin")).unwrap_err();
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        sample_index().save(&path).unwrap();

        // Flip a payload byte without updating the sidecar
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = FlatIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_missing_sidecar_still_loads() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        sample_index().save(&path).unwrap();
        std::fs::remove_file(dir.path().join("index.bin.checksum")).unwrap();

        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.ntotal(), 2);
    }

    #[test]
    fn test_truncated_payload_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        sample_index().save(&path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 4]).unwrap();
        std::fs::remove_file(dir.path().join("index.bin.checksum")).unwrap();

        let err = FlatIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        std::fs::write(&path, b"NOPE00000000000000000000").unwrap();
        let err = FlatIndex::load(&path).unwrap_err();
        assert!(matches!(err, IndexError::Corrupt(_)));
    }

    #[test]
    fn test_empty_index_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index.bin");
        FlatIndex::new(5).unwrap().save(&path).unwrap();
        let loaded = FlatIndex::load(&path).unwrap();
        assert_eq!(loaded.ntotal(), 0);
        assert_eq!(loaded.dim(), 5);
    }
}
