//! Content checksums used by manifests.
//!
//! A manifest checksum is the lowercase hex digest of the file's bytes,
//! base64-encoded as text, with trailing `=` padding removed. Trimming the
//! padding lets tools that disagree on padding still compare equal.

use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::storage::{FileSystem, StorageLocation};

/// Buffer size for reading files during checksum calculation (64KB).
const BUFFER_SIZE: usize = 64 * 1024;

/// Digest used underneath the base64 armouring.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    /// SHA-1, as produced by the existing manifest tooling.
    #[default]
    Sha1,
    /// SHA-256.
    Sha256,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sha1 => write!(f, "sha1"),
            Self::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha1" | "sha-1" => Ok(Self::Sha1),
            "sha256" | "sha-256" => Ok(Self::Sha256),
            other => Err(format!("unknown checksum algorithm '{}'", other)),
        }
    }
}

fn hex_digest<D: Digest>(reader: &mut dyn Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect())
}

/// Armour a hex digest the way manifests store it.
fn armour(hex: &str) -> String {
    STANDARD
        .encode(hex.to_lowercase())
        .trim_end_matches('=')
        .to_string()
}

/// Compute the manifest checksum of everything readable from `reader`.
pub fn checksum_reader(algorithm: ChecksumAlgorithm, reader: &mut dyn Read) -> io::Result<String> {
    let hex = match algorithm {
        ChecksumAlgorithm::Sha1 => hex_digest::<Sha1>(reader)?,
        ChecksumAlgorithm::Sha256 => hex_digest::<Sha256>(reader)?,
    };
    Ok(armour(&hex))
}

/// Compute the manifest checksum of an in-memory buffer.
pub fn checksum_bytes(algorithm: ChecksumAlgorithm, bytes: &[u8]) -> String {
    let mut reader = bytes;
    // Reading from a slice cannot fail
    checksum_reader(algorithm, &mut reader).unwrap_or_default()
}

/// Checksums files through the [`FileSystem`] collaborator.
#[derive(Clone)]
pub struct ChecksumService {
    fs: Arc<dyn FileSystem>,
    algorithm: ChecksumAlgorithm,
}

impl fmt::Debug for ChecksumService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChecksumService")
            .field("algorithm", &self.algorithm)
            .finish()
    }
}

impl ChecksumService {
    /// Create a checksum service.
    pub fn new(fs: Arc<dyn FileSystem>, algorithm: ChecksumAlgorithm) -> Self {
        Self { fs, algorithm }
    }

    /// The digest in use.
    pub fn algorithm(&self) -> ChecksumAlgorithm {
        self.algorithm
    }

    /// Checksum a file.
    ///
    /// Returns an empty string if the file cannot be read. An empty checksum
    /// never matches a manifest entry, so an unreadable file is re-fetched.
    pub fn checksum(&self, location: StorageLocation, path: &str) -> String {
        let result = self
            .fs
            .open_read(location, path)
            .and_then(|mut reader| checksum_reader(self.algorithm, &mut reader));

        match result {
            Ok(sum) => sum,
            Err(e) => {
                warn!(%location, path, error = %e, "Could not checksum file");
                String::new()
            }
        }
    }

    /// Check that a file exists and its checksum equals `expected`.
    pub fn matches(&self, location: StorageLocation, path: &str, expected: &str) -> bool {
        if expected.is_empty() || !self.fs.exists(location, path) {
            return false;
        }
        let actual = self.checksum(location, path);
        !actual.is_empty() && actual == expected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalFileSystem;
    use proptest::prelude::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_SHA1: &str = "MmFhZTZjMzVjOTRmY2ZiNDE1ZGJlOTVmNDA4YjljZTkxZWU4NDZlZA";
    const HELLO_SHA256: &str =
        "Yjk0ZDI3Yjk5MzRkM2UwOGE1MmU1MmQ3ZGE3ZGFiZmFjNDg0ZWZlMzdhNTM4MGVlOTA4OGY3YWNlMmVmY2RlOQ";

    fn service(algorithm: ChecksumAlgorithm) -> (TempDir, ChecksumService) {
        let temp = TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("bundle")).unwrap();
        fs::create_dir_all(temp.path().join("dlc")).unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(
            temp.path().join("bundle"),
            temp.path().join("dlc"),
        ));
        (temp, ChecksumService::new(fs, algorithm))
    }

    #[test]
    fn test_known_sha1_checksum() {
        assert_eq!(
            checksum_bytes(ChecksumAlgorithm::Sha1, b"hello world"),
            HELLO_SHA1
        );
    }

    #[test]
    fn test_known_sha256_checksum() {
        assert_eq!(
            checksum_bytes(ChecksumAlgorithm::Sha256, b"hello world"),
            HELLO_SHA256
        );
    }

    #[test]
    fn test_padding_is_trimmed() {
        let sum = checksum_bytes(ChecksumAlgorithm::Sha1, b"");
        assert_eq!(sum, "ZGEzOWEzZWU1ZTZiNGIwZDMyNTViZmVmOTU2MDE4OTBhZmQ4MDcwOQ");
        assert!(!sum.ends_with('='));
    }

    #[test]
    fn test_checksum_file_through_storage() {
        let (temp, service) = service(ChecksumAlgorithm::Sha1);
        fs::write(temp.path().join("dlc/a.txt"), b"hello world").unwrap();

        assert_eq!(service.checksum(StorageLocation::Dlc, "a.txt"), HELLO_SHA1);
        assert!(service.matches(StorageLocation::Dlc, "a.txt", HELLO_SHA1));
        assert!(!service.matches(StorageLocation::Package, "a.txt", HELLO_SHA1));
    }

    #[test]
    fn test_missing_file_gives_sentinel() {
        let (_temp, service) = service(ChecksumAlgorithm::Sha1);
        assert_eq!(service.checksum(StorageLocation::Dlc, "missing.txt"), "");
    }

    #[test]
    fn test_empty_expected_never_matches() {
        let (temp, service) = service(ChecksumAlgorithm::Sha1);
        fs::write(temp.path().join("dlc/a.txt"), b"").unwrap();
        assert!(!service.matches(StorageLocation::Dlc, "a.txt", ""));
    }

    #[test]
    fn test_large_input_spans_buffers() {
        let data = vec![0xABu8; 3 * BUFFER_SIZE + 17];
        let whole = checksum_bytes(ChecksumAlgorithm::Sha256, &data);
        let mut reader = std::io::Cursor::new(data);
        let streamed = checksum_reader(ChecksumAlgorithm::Sha256, &mut reader).unwrap();
        assert_eq!(whole, streamed);
    }

    #[test]
    fn test_algorithm_parse() {
        assert_eq!("SHA1".parse::<ChecksumAlgorithm>(), Ok(ChecksumAlgorithm::Sha1));
        assert_eq!(
            "sha-256".parse::<ChecksumAlgorithm>(),
            Ok(ChecksumAlgorithm::Sha256)
        );
        assert!("md5".parse::<ChecksumAlgorithm>().is_err());
    }

    proptest! {
        #[test]
        fn prop_checksum_is_deterministic(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let (temp, service) = service(ChecksumAlgorithm::Sha1);
            fs::write(temp.path().join("dlc/one.bin"), &bytes).unwrap();
            fs::write(temp.path().join("dlc/two.bin"), &bytes).unwrap();

            prop_assert_eq!(
                service.checksum(StorageLocation::Dlc, "one.bin"),
                service.checksum(StorageLocation::Dlc, "two.bin")
            );
        }

        #[test]
        fn prop_single_byte_mutation_changes_checksum(
            bytes in proptest::collection::vec(any::<u8>(), 1..2048),
            index in any::<prop::sample::Index>(),
            flip in 1u8..=255,
        ) {
            let mut mutated = bytes.clone();
            let i = index.index(mutated.len());
            mutated[i] ^= flip;

            prop_assert_ne!(
                checksum_bytes(ChecksumAlgorithm::Sha1, &bytes),
                checksum_bytes(ChecksumAlgorithm::Sha1, &mutated)
            );
        }
    }
}
