//! Kinds of content, the signals computed from them, and the submissions that request hashing.
//!
//! Submissions arrive as JSON objects discriminated by an explicit `kind` field:
//!
//! ```json
//! {"kind": "url", "content_id": "c1", "content_type": "photo", "url": "https://example.com/1.jpg"}
//! {"kind": "s3_image", "content_id": "c2", "bucket": "uploads", "key": "images/c2.jpg"}
//! {"kind": "bank", "bank_id": "b1", "bank_member_id": "m1", "content_type": "video"}
//! ```

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors that can occur when parsing submissions or signal types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid submission: {0}")]
    InvalidSubmission(#[from] serde_json::Error),
    #[error("unknown signal type: {0}")]
    UnknownSignalType(String),
}

/// A kind of hash that can be computed from content.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    /// Perceptual photo hash (256 bits, hex-encoded).
    Pdq,
    /// MD5 of a video's bytes (hex-encoded).
    VideoMd5,
}

impl SignalType {
    /// Every supported signal type.
    pub const ALL: [SignalType; 2] = [SignalType::Pdq, SignalType::VideoMd5];

    /// The stable name of this signal type.
    pub fn name(&self) -> &'static str {
        match self {
            SignalType::Pdq => "pdq",
            SignalType::VideoMd5 => "video_md5",
        }
    }

    /// The record type buckets and snapshots of this signal type are stored under.
    pub fn record_type(&self) -> String {
        format!("{}_hashes", self.name())
    }

    /// Return the signal type stored under `record_type`, if any.
    pub fn from_record_type(record_type: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|signal_type| signal_type.record_type() == record_type)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SignalType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|signal_type| signal_type.name() == s)
            .ok_or_else(|| Error::UnknownSignalType(s.to_string()))
    }
}

/// A kind of content that can be submitted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Photo,
    Video,
}

impl ContentType {
    /// The signal types that can be computed from this kind of content.
    pub fn signal_types(&self) -> &'static [SignalType] {
        match self {
            ContentType::Photo => &[SignalType::Pdq],
            ContentType::Video => &[SignalType::VideoMd5],
        }
    }

    /// Returns true if `signal_type` can be computed from this kind of content.
    pub fn supports(&self, signal_type: SignalType) -> bool {
        self.signal_types().contains(&signal_type)
    }
}

/// A hash computed from submitted content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    pub signal_type: SignalType,
    pub value: String,
}

impl Signal {
    /// Create a new [Signal].
    pub fn new(signal_type: SignalType, value: impl Into<String>) -> Self {
        Self {
            signal_type,
            value: value.into(),
        }
    }
}

/// A request to hash a piece of content.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Submission {
    /// Content fetched from a URL.
    Url {
        content_id: String,
        content_type: ContentType,
        url: String,
    },

    /// An image stored in an object storage bucket.
    S3Image {
        content_id: String,
        bucket: String,
        key: String,
    },

    /// Content added to a bank. Signals from bank submissions are stored with the bank member and
    /// are never buffered into buckets.
    Bank {
        bank_id: String,
        bank_member_id: String,
        content_type: ContentType,
    },
}

impl Submission {
    /// Parse a submission from a JSON message.
    pub fn from_json(message: &str) -> Result<Self, Error> {
        Ok(serde_json::from_str(message)?)
    }

    /// The kind of content submitted.
    pub fn content_type(&self) -> ContentType {
        match self {
            Submission::Url { content_type, .. } => *content_type,
            Submission::S3Image { .. } => ContentType::Photo,
            Submission::Bank { content_type, .. } => *content_type,
        }
    }

    /// The identifier hash records of this submission are written with (if any).
    pub fn content_id(&self) -> Option<&str> {
        match self {
            Submission::Url { content_id, .. } | Submission::S3Image { content_id, .. } => {
                Some(content_id.as_str())
            }
            Submission::Bank { .. } => None,
        }
    }

    /// The identifier used to refer to this submission in logs.
    pub fn object_id(&self) -> &str {
        match self {
            Submission::Url { content_id, .. } | Submission::S3Image { content_id, .. } => {
                content_id.as_str()
            }
            Submission::Bank { bank_id, .. } => bank_id.as_str(),
        }
    }
}
