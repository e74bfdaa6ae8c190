//! Transaction record model and its on-disk encoding.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Kind of filesystem operation a record describes.
///
/// Encoded as an integer on disk: COPY=0, MOVE=1, DELETE=2, METADATA_UPDATE=3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Copy a source file over its mirror counterpart.
    Copy,
    /// Move a file within the mirror.
    Move,
    /// Remove a file from the mirror.
    Delete,
    /// Re-apply metadata without touching contents.
    MetadataUpdate,
}

/// Raised when an on-disk operation code is out of range.
#[derive(Debug, Error)]
#[error("invalid operation code {0}")]
pub struct InvalidOperationCode(
    /// The offending code.
    pub u8,
);

impl OperationKind {
    /// Integer code used in the on-disk encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Copy => 0,
            Self::Move => 1,
            Self::Delete => 2,
            Self::MetadataUpdate => 3,
        }
    }
}

impl TryFrom<u8> for OperationKind {
    type Error = InvalidOperationCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Copy),
            1 => Ok(Self::Move),
            2 => Ok(Self::Delete),
            3 => Ok(Self::MetadataUpdate),
            other => Err(InvalidOperationCode(other)),
        }
    }
}

impl Serialize for OperationKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for OperationKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::try_from(code).map_err(D::Error::custom)
    }
}

/// Lifecycle state of a transaction.
///
/// Encoded as an integer on disk: PENDING=0, IN_PROGRESS=1, COMPLETED=2,
/// FAILED=3, ROLLED_BACK=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionStatus {
    /// Recorded, work not yet started.
    Pending,
    /// The filesystem operation is underway.
    InProgress,
    /// The operation finished and verified.
    Completed,
    /// The operation failed or failed verification.
    Failed,
    /// Reserved for explicit undo.
    RolledBack,
}

/// Raised when an on-disk status code is out of range.
#[derive(Debug, Error)]
#[error("invalid status code {0}")]
pub struct InvalidStatusCode(
    /// The offending code.
    pub u8,
);

impl TransactionStatus {
    /// Integer code used in the on-disk encoding.
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::InProgress => 1,
            Self::Completed => 2,
            Self::Failed => 3,
            Self::RolledBack => 4,
        }
    }

    /// True for PENDING and IN_PROGRESS, the states recovery cares about.
    #[must_use]
    pub const fn is_unsettled(self) -> bool {
        matches!(self, Self::Pending | Self::InProgress)
    }
}

impl TryFrom<u8> for TransactionStatus {
    type Error = InvalidStatusCode;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Self::Pending),
            1 => Ok(Self::InProgress),
            2 => Ok(Self::Completed),
            3 => Ok(Self::Failed),
            4 => Ok(Self::RolledBack),
            other => Err(InvalidStatusCode(other)),
        }
    }
}

impl Serialize for TransactionStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.code())
    }
}

impl<'de> Deserialize<'de> for TransactionStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let code = u8::deserialize(deserializer)?;
        Self::try_from(code).map_err(D::Error::custom)
    }
}

/// Milliseconds since the Unix epoch.
#[must_use]
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// One durable record of one state of one operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique id, `tx-<ms_epoch>-<counter>`.
    pub id: String,
    /// Operation the record describes.
    pub operation: OperationKind,
    /// Absolute source path.
    #[serde(rename = "sourcePath")]
    pub source_path: String,
    /// Absolute destination path.
    #[serde(rename = "destPath")]
    pub dest_path: String,
    /// State of the operation as of this record.
    pub status: TransactionStatus,
    /// Milliseconds since the Unix epoch when the record was written.
    pub timestamp: i64,
    /// Failure description, empty on success paths.
    #[serde(rename = "errorMessage")]
    pub error_message: String,
    /// Verified content digest, when one is known.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub checksum: Option<String>,
}

impl TransactionRecord {
    /// Wall-clock age of the record.
    #[must_use]
    pub fn age(&self) -> Duration {
        let elapsed_ms = now_ms().saturating_sub(self.timestamp);
        Duration::from_millis(elapsed_ms.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TransactionRecord {
        TransactionRecord {
            id: "tx-1700000000000-7".to_string(),
            operation: OperationKind::Copy,
            source_path: "/s/a.txt".to_string(),
            dest_path: "/d/a.txt".to_string(),
            status: TransactionStatus::Completed,
            timestamp: 1_700_000_000_123,
            error_message: String::new(),
            checksum: Some("5d41402abc4b2a76b9719d911017c592".to_string()),
        }
    }

    #[test]
    fn wire_format_uses_camel_case_names_and_integer_codes() {
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&sample()).expect("encode"))
                .expect("parse");

        assert_eq!(json["id"], "tx-1700000000000-7");
        assert_eq!(json["operation"], 0);
        assert_eq!(json["sourcePath"], "/s/a.txt");
        assert_eq!(json["destPath"], "/d/a.txt");
        assert_eq!(json["status"], 2);
        assert_eq!(json["timestamp"], 1_700_000_000_123i64);
        assert_eq!(json["errorMessage"], "");
        assert_eq!(json["checksum"], "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn checksum_key_is_omitted_when_absent() {
        let mut record = sample();
        record.checksum = None;
        let encoded = serde_json::to_string(&record).expect("encode");
        assert!(!encoded.contains("checksum"));

        let decoded: TransactionRecord = serde_json::from_str(&encoded).expect("decode");
        assert_eq!(decoded.checksum, None);
    }

    #[test]
    fn decoding_rejects_out_of_range_codes() {
        let line = r#"{"id":"tx-1-1","operation":9,"sourcePath":"/s","destPath":"/d","status":0,"timestamp":0,"errorMessage":""}"#;
        assert!(serde_json::from_str::<TransactionRecord>(line).is_err());

        let line = r#"{"id":"tx-1-1","operation":0,"sourcePath":"/s","destPath":"/d","status":7,"timestamp":0,"errorMessage":""}"#;
        assert!(serde_json::from_str::<TransactionRecord>(line).is_err());
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let record = sample();
        let decoded: TransactionRecord =
            serde_json::from_str(&serde_json::to_string(&record).expect("encode"))
                .expect("decode");
        assert_eq!(decoded, record);
    }

    #[test]
    fn age_of_fresh_record_is_small() {
        let record = TransactionRecord {
            timestamp: now_ms(),
            ..sample()
        };
        assert!(record.age() < Duration::from_secs(5));
    }
}
