//! Helper output decoding
//!
//! The helper writes exactly one JSON object to stdout. Byte fields are
//! standard base64. Output is decoded incrementally as it arrives, and
//! reading stops at the end of the first complete record.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

use crate::error::DecodeError;

/// Default upper bound on buffered helper output
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Record as it appears on the wire
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelperRecord {
    #[serde(default)]
    pub is_available: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

/// Decoded helper result with raw byte fields
///
/// Fields the operation does not produce are empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationResponse {
    pub is_available: bool,
    pub private_key: Vec<u8>,
    pub public_key: Vec<u8>,
    pub signature: Vec<u8>,
}

impl InvocationResponse {
    pub fn require_private_key(&self) -> Result<&[u8], DecodeError> {
        non_empty(&self.private_key, "privateKey")
    }

    pub fn require_public_key(&self) -> Result<&[u8], DecodeError> {
        non_empty(&self.public_key, "publicKey")
    }

    pub fn require_signature(&self) -> Result<&[u8], DecodeError> {
        non_empty(&self.signature, "signature")
    }

    /// Wire form of this response, byte fields base64-encoded
    pub fn to_record(&self) -> HelperRecord {
        let encode = |bytes: &[u8]| (!bytes.is_empty()).then(|| STANDARD.encode(bytes));
        HelperRecord {
            is_available: Some(self.is_available),
            private_key: encode(&self.private_key),
            public_key: encode(&self.public_key),
            signature: encode(&self.signature),
        }
    }
}

fn non_empty<'a>(bytes: &'a [u8], field: &'static str) -> Result<&'a [u8], DecodeError> {
    if bytes.is_empty() {
        Err(DecodeError::MissingField(field))
    } else {
        Ok(bytes)
    }
}

impl TryFrom<HelperRecord> for InvocationResponse {
    type Error = DecodeError;

    fn try_from(record: HelperRecord) -> Result<Self, Self::Error> {
        Ok(Self {
            is_available: record.is_available.unwrap_or(false),
            private_key: decode_field(record.private_key, "privateKey")?,
            public_key: decode_field(record.public_key, "publicKey")?,
            signature: decode_field(record.signature, "signature")?,
        })
    }
}

fn decode_field(value: Option<String>, field: &'static str) -> Result<Vec<u8>, DecodeError> {
    match value {
        Some(text) if !text.is_empty() => STANDARD
            .decode(text.as_bytes())
            .map_err(|source| DecodeError::Base64 { field, source }),
        _ => Ok(Vec::new()),
    }
}

enum Frame {
    Complete(HelperRecord),
    Incomplete(Option<serde_json::Error>),
}

/// Try to pull the first record off the front of `buf`
fn next_frame(buf: &[u8]) -> Result<Frame, DecodeError> {
    let mut records = serde_json::Deserializer::from_slice(buf).into_iter::<HelperRecord>();
    match records.next() {
        None => Ok(Frame::Incomplete(None)),
        Some(Ok(record)) => {
            let trailing = buf.len() - records.byte_offset();
            if trailing > 0 {
                debug!(trailing, "Ignoring bytes after helper record");
            }
            Ok(Frame::Complete(record))
        }
        Some(Err(e)) if e.is_eof() => Ok(Frame::Incomplete(Some(e))),
        Some(Err(e)) => Err(DecodeError::Malformed(e)),
    }
}

/// Read from `reader` until one complete record has been decoded.
///
/// Returns as soon as the record closes; anything after it is left unread
/// for the caller to drain or drop.
pub async fn decode_stream<R>(mut reader: R, limit: usize) -> Result<InvocationResponse, DecodeError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let n = reader.read(&mut chunk).await.map_err(DecodeError::Read)?;

        if n == 0 {
            return decode_slice(&buf);
        }

        let take = n.min(limit.saturating_sub(buf.len()).saturating_add(1));
        buf.extend_from_slice(&chunk[..take]);

        if let Frame::Complete(record) = next_frame(&buf)? {
            return record.try_into();
        }

        if buf.len() > limit {
            return Err(DecodeError::TooLarge { limit });
        }
    }
}

/// Decode a record from a buffer that will not grow any further
pub fn decode_slice(buf: &[u8]) -> Result<InvocationResponse, DecodeError> {
    match next_frame(buf)? {
        Frame::Complete(record) => record.try_into(),
        Frame::Incomplete(Some(e)) => Err(DecodeError::Truncated(e)),
        Frame::Incomplete(None) => Err(DecodeError::Empty),
    }
}
