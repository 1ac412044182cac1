//! Store snapshot file format
//!
//! A snapshot file is a 12-byte header followed by a bincode payload:
//! - magic: 4 bytes (`BWS1`)
//! - format version: 4 bytes (u32, big-endian)
//! - payload_length: 4 bytes (u32, big-endian)

use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::debug;

use bw_core::Object;

/// Size of the snapshot header in bytes
pub const HEADER_SIZE: usize = 12;

const MAGIC: &[u8; 4] = b"BWS1";
const FORMAT_VERSION: u32 = 1;

/// Everything needed to restore a store
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub resource_version: u64,
    pub objects: Vec<Object>,
}

/// Errors reading or writing snapshots
#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("not a burrow snapshot")]
    BadMagic,

    #[error("unsupported snapshot format version {0}")]
    UnsupportedVersion(u32),

    #[error("truncated snapshot: expected {expected} payload bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },

    #[error("snapshot too large: {0} bytes")]
    TooLarge(usize),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Encode a snapshot into bytes
pub fn encode(data: &SnapshotData) -> Result<BytesMut, SnapshotError> {
    let payload = bincode::serialize(data)?;
    let length = u32::try_from(payload.len()).map_err(|_| SnapshotError::TooLarge(payload.len()))?;

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(MAGIC);
    buf.put_u32(FORMAT_VERSION);
    buf.put_u32(length);
    buf.put_slice(&payload);
    Ok(buf)
}

/// Decode a snapshot from bytes
pub fn decode(mut src: &[u8]) -> Result<SnapshotData, SnapshotError> {
    if src.len() < HEADER_SIZE || &src[..4] != MAGIC {
        return Err(SnapshotError::BadMagic);
    }
    src.advance(4);

    let version = src.get_u32();
    if version != FORMAT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }

    let expected = src.get_u32() as usize;
    if src.len() < expected {
        return Err(SnapshotError::Truncated {
            expected,
            actual: src.len(),
        });
    }

    Ok(bincode::deserialize(&src[..expected])?)
}

/// Write a snapshot atomically (temp file, then rename)
pub fn save(path: &Path, data: &SnapshotData) -> Result<(), SnapshotError> {
    let bytes = encode(data)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;

    debug!(
        "Saved snapshot of {} objects at version {} to {}",
        data.objects.len(),
        data.resource_version,
        path.display()
    );
    Ok(())
}

/// Load a snapshot; `None` when the file does not exist
pub fn load(path: &Path) -> Result<Option<SnapshotData>, SnapshotError> {
    match std::fs::read(path) {
        Ok(bytes) => decode(&bytes).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::model::{InstanceSpec, Phase, VolumeSpec};
    use bw_core::{Instance, Resource, Template, TemplateSpec};

    fn sample() -> SnapshotData {
        let template = Template::new(
            "web",
            TemplateSpec {
                image: "ubuntu:24.04".into(),
                volume: VolumeSpec::Claim {
                    size: "1Gi".into(),
                    storage_class: None,
                    mount_path: "/home/dev".into(),
                },
                idle_timeout_secs: Some(600),
                ..Default::default()
            },
        );
        let mut instance = Instance::new(
            "alice-web",
            InstanceSpec {
                owner: "alice".into(),
                template: Some("web".into()),
                ..Default::default()
            },
        );
        instance.status.phase = Phase::Ready;
        instance.status.last_active = Some(1234);

        SnapshotData {
            resource_version: 42,
            objects: vec![template.into_object(), instance.into_object()],
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("store.snapshot");

        assert!(load(&path).unwrap().is_none());

        let data = sample();
        save(&path, &data).unwrap();
        assert_eq!(load(&path).unwrap(), Some(data));
    }

    #[test]
    fn test_rejects_foreign_files() {
        assert!(matches!(
            decode(b"{\"json\": true}"),
            Err(SnapshotError::BadMagic)
        ));

        let mut bytes = encode(&sample()).unwrap();
        bytes[7] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_truncated_payload() {
        let bytes = encode(&sample()).unwrap();
        let cut = &bytes[..bytes.len() - 3];
        assert!(matches!(decode(cut), Err(SnapshotError::Truncated { .. })));
    }
}
