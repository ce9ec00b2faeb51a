//! Live scans
//!
//! A scan lives for exactly one authentication attempt. Its feature memory
//! is zeroized when it is dropped, and the core never writes it anywhere.
//! The JSON envelope exists only for the capture hand-off between the
//! sensor helper and the PAM adapter.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::template::FeatureVector;
use crate::FORMAT_VERSION;

/// Magic string identifying a scan hand-off envelope
pub const SCAN_MAGIC: &str = "FINGWIT-SCAN";

/// A single live capture
#[derive(Debug, Clone, PartialEq)]
pub struct Scan {
    features: FeatureVector,
    captured_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct ScanEnvelope {
    magic: String,
    version: u32,
    captured_at: DateTime<Utc>,
    features: FeatureVector,
}

impl Scan {
    pub fn new(features: FeatureVector, captured_at: DateTime<Utc>) -> Self {
        Self {
            features,
            captured_at,
        }
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Time elapsed since capture (negative if captured in the future)
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.captured_at
    }

    /// Encode as a hand-off envelope
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let envelope = ScanEnvelope {
            magic: SCAN_MAGIC.to_string(),
            version: FORMAT_VERSION,
            captured_at: self.captured_at,
            features: self.features.clone(),
        };
        Ok(serde_json::to_vec(&envelope)?)
    }

    /// Decode a hand-off envelope
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let envelope: ScanEnvelope = serde_json::from_slice(bytes)?;
        if envelope.magic != SCAN_MAGIC {
            return Err(Error::InvalidMagic {
                expected: SCAN_MAGIC.to_string(),
                found: envelope.magic,
            });
        }
        if envelope.version == 0 || envelope.version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(envelope.version));
        }
        Ok(Self {
            features: envelope.features,
            captured_at: envelope.captured_at,
        })
    }
}
