use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{Result, UploadError};

/// Blob-metadata key under which the serialized record is stored.
pub const BLOB_METADATA_KEY: &str = "diskmetadata";

const HASH_READ_CHUNK: usize = 1024 * 1024;

/// Descriptive record of the local source file, captured once at upload
/// start and stored on the remote blob. On resume the remote copy is read
/// back and compared field by field against a freshly computed local one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    pub file_name: String,
    /// Size of the image file on disk, in bytes.
    pub file_size: u64,
    /// Declared virtual size of the disk, in bytes.
    pub virtual_size: u64,
    /// Last-modified time of the image file, unix seconds.
    pub last_modified: u64,
    /// Whole-file MD5 digest, base64-encoded.
    pub md5: String,
}

impl UploadMetadata {
    /// Capture the metadata of a local image file. Computes the whole-file
    /// MD5, so this reads the entire file once.
    pub fn from_local_file(path: &Path, virtual_size: u64) -> Result<Self> {
        let meta = std::fs::metadata(path)?;
        let last_modified = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut file = File::open(path)?;
        let mut context = md5::Context::new();
        let mut buf = vec![0u8; HASH_READ_CHUNK];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            context.consume(&buf[..n]);
        }
        let digest = context.compute();

        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown")
            .to_string();

        Ok(Self {
            file_name,
            file_size: meta.len(),
            virtual_size,
            last_modified,
            md5: general_purpose::STANDARD.encode(digest.0),
        })
    }

    /// Raw digest bytes of the stored hash.
    pub fn md5_bytes(&self) -> Result<[u8; 16]> {
        let decoded = general_purpose::STANDARD
            .decode(&self.md5)
            .map_err(|e| UploadError::Io(std::io::Error::other(format!("md5 field: {e}"))))?;
        decoded
            .try_into()
            .map_err(|_| UploadError::Io(std::io::Error::other("md5 field has wrong length")))
    }

    /// Serialize into the flat string map the blob store accepts.
    pub fn to_blob_metadata(&self) -> Result<BTreeMap<String, String>> {
        let json = serde_json::to_string(self)
            .map_err(|e| UploadError::Io(std::io::Error::other(e)))?;
        let mut map = BTreeMap::new();
        map.insert(BLOB_METADATA_KEY.to_string(), json);
        Ok(map)
    }

    /// Read the record back from blob metadata. `Ok(None)` when no record
    /// is attached; a present-but-unparseable record is an error.
    pub fn from_blob_metadata(
        metadata: &BTreeMap<String, String>,
    ) -> std::result::Result<Option<Self>, serde_json::Error> {
        match metadata.get(BLOB_METADATA_KEY) {
            None => Ok(None),
            Some(raw) => serde_json::from_str(raw).map(Some),
        }
    }

    /// Compare against the remote record, collecting every mismatched
    /// field so the operator sees all problems at once.
    pub fn compare(&self, remote: &Self) -> Vec<String> {
        let mut mismatches = Vec::new();
        if self.file_name != remote.file_name {
            mismatches.push(format!(
                "file name mismatch: local '{}', remote '{}'",
                self.file_name, remote.file_name
            ));
        }
        if self.file_size != remote.file_size {
            mismatches.push(format!(
                "file size mismatch: local {}, remote {}",
                self.file_size, remote.file_size
            ));
        }
        if self.virtual_size != remote.virtual_size {
            mismatches.push(format!(
                "virtual disk size mismatch: local {}, remote {}",
                self.virtual_size, remote.virtual_size
            ));
        }
        if self.last_modified != remote.last_modified {
            mismatches.push(format!(
                "last-modified time mismatch: local {}, remote {}",
                self.last_modified, remote.last_modified
            ));
        }
        if self.md5 != remote.md5 {
            mismatches.push(format!(
                "content hash mismatch: local {}, remote {}",
                self.md5, remote.md5
            ));
        }
        mismatches
    }
}
