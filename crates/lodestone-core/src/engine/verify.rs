//! Size and SHA-1 checks

use crate::error::DownloadError;
use sha1::{Digest, Sha1};
use std::path::Path;
use tokio::io::AsyncReadExt;

const READ_BUFFER: usize = 64 * 1024;

pub fn sha1_hex(data: &[u8]) -> String {
    hex::encode(Sha1::digest(data))
}

/// Hex SHA-1 of a file, read in chunks
pub async fn sha1_file(path: &Path) -> Result<String, DownloadError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha1::new();
    let mut buffer = vec![0u8; READ_BUFFER];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Check a file against its expected size, then its SHA-1
pub async fn verify_file(
    path: &Path,
    expected_size: Option<u64>,
    expected_sha1: Option<&str>,
) -> Result<(), DownloadError> {
    if let Some(expected) = expected_size {
        let actual = tokio::fs::metadata(path).await?.len();
        if actual != expected {
            return Err(DownloadError::SizeMismatch { expected, actual });
        }
    }

    if let Some(expected) = expected_sha1 {
        let actual = sha1_file(path).await?;
        if !actual.eq_ignore_ascii_case(expected) {
            return Err(DownloadError::HashMismatch {
                expected: expected.to_string(),
                actual,
            });
        }
    }

    Ok(())
}

/// Whether an existing file already satisfies the integrity data.
/// Files with nothing to check against never count as present.
pub async fn is_valid(path: &Path, expected_size: Option<u64>, expected_sha1: Option<&str>) -> bool {
    if expected_size.is_none() && expected_sha1.is_none() {
        return false;
    }
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => verify_file(path, expected_size, expected_sha1).await.is_ok(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn size_is_checked_before_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        tokio::fs::write(&path, b"hello").await.unwrap();

        let err = verify_file(&path, Some(4), Some("nonsense")).await.unwrap_err();
        assert!(matches!(err, DownloadError::SizeMismatch { expected: 4, actual: 5 }));

        let err = verify_file(&path, Some(5), Some("00")).await.unwrap_err();
        assert!(matches!(err, DownloadError::HashMismatch { .. }));

        let hash = sha1_hex(b"hello");
        assert_eq!(hash, "aaf4c61ddcc5e8a2dabede0f3b482cd9aea9434d");
        assert_ok!(verify_file(&path, Some(5), Some(&hash.to_uppercase())).await);
        // Size alone is enough when no hash is known
        assert_ok!(verify_file(&path, Some(5), None).await);
        assert_err!(verify_file(&path, Some(6), None).await);
    }

    #[tokio::test]
    async fn missing_or_unverifiable_files_are_not_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.bin");
        assert!(!is_valid(&path, Some(5), None).await);

        tokio::fs::write(&path, b"hello").await.unwrap();
        assert!(!is_valid(&path, None, None).await);
        assert!(is_valid(&path, Some(5), Some(&sha1_hex(b"hello"))).await);
    }
}
