//! Embedded helper payload
//!
//! The helper executable is copied into the crate by `build.rs` and lives
//! for the whole process as an immutable blob.

use bytes::Bytes;

/// Helper executable bytes embedded at build time (empty if none was supplied)
pub static EMBEDDED_HELPER: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/enclave-helper"));

/// Read-only helper executable image
#[derive(Debug, Clone)]
pub struct HelperPayload {
    bytes: Bytes,
}

impl HelperPayload {
    /// The payload embedded into this build
    pub fn embedded() -> Self {
        Self {
            bytes: Bytes::from_static(EMBEDDED_HELPER),
        }
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }
}
