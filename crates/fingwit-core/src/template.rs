//! Enrolled templates and the persisted per-user template record
//!
//! Record layout (JSON):
//! ```text
//! FIELD        TYPE            NOTES
//! ──────────────────────────────────────────────────────────────
//! magic        string          "FINGWIT-TPL"
//! version      u32             FORMAT_VERSION
//! owner        string          user name, must match every template
//! updated_at   RFC 3339        time of last enrollment change
//! templates    [Template]      at most MAX_TEMPLATES_PER_USER
//! checksum     hex string      SHA256 over (owner, updated_at, templates)
//! ```
//!
//! A record is either fully valid or rejected. Callers never see a subset
//! of the templates of a damaged record.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};
use crate::types::{Finger, TemplateId, UserId};
use crate::{FEATURE_DIM, FORMAT_VERSION, MAX_TEMPLATES_PER_USER};

/// Magic string identifying a fingwit template record
pub const RECORD_MAGIC: &str = "FINGWIT-TPL";

/// Fixed-size biometric feature vector
///
/// Zeroized on drop. `Debug` never prints the values.
#[derive(Clone, PartialEq, Zeroize, ZeroizeOnDrop)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    /// Create a feature vector, checking dimension and finiteness
    pub fn new(values: Vec<f32>) -> Result<Self> {
        if values.len() != FEATURE_DIM {
            return Err(Error::FeatureLength {
                expected: FEATURE_DIM,
                actual: values.len(),
            });
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::NonFiniteFeature);
        }
        Ok(Self(values))
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }

    /// Euclidean norm, accumulated in f64
    pub fn norm(&self) -> f64 {
        self.0
            .iter()
            .map(|&v| f64::from(v) * f64::from(v))
            .sum::<f64>()
            .sqrt()
    }
}

impl fmt::Debug for FeatureVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureVector([{} values])", self.0.len())
    }
}

impl Serialize for FeatureVector {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FeatureVector {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let values = Vec::<f32>::deserialize(deserializer)?;
        FeatureVector::new(values).map_err(serde::de::Error::custom)
    }
}

/// An enrolled fingerprint reference
///
/// Immutable once created. Re-enrolling a finger produces a new template
/// with a new ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    id: TemplateId,
    owner: UserId,
    finger: Finger,
    features: FeatureVector,
    enrolled_at: DateTime<Utc>,
    format_version: u32,
}

impl Template {
    /// Create a new template with a fresh ID
    pub fn new(
        owner: UserId,
        finger: Finger,
        features: FeatureVector,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self::from_parts(TemplateId::generate(), owner, finger, features, enrolled_at)
    }

    /// Create a template with an explicit ID
    pub fn from_parts(
        id: TemplateId,
        owner: UserId,
        finger: Finger,
        features: FeatureVector,
        enrolled_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            finger,
            features,
            enrolled_at,
            format_version: FORMAT_VERSION,
        }
    }

    pub fn id(&self) -> TemplateId {
        self.id
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn finger(&self) -> Finger {
        self.finger
    }

    pub fn features(&self) -> &FeatureVector {
        &self.features
    }

    pub fn enrolled_at(&self) -> DateTime<Utc> {
        self.enrolled_at
    }

    pub fn format_version(&self) -> u32 {
        self.format_version
    }
}

/// Minimal view used to check magic and version before a full parse
#[derive(Deserialize)]
struct RecordHeader {
    magic: String,
    version: u32,
}

#[derive(Serialize)]
struct ChecksumPayload<'a> {
    owner: &'a UserId,
    updated_at: &'a DateTime<Utc>,
    templates: &'a [Template],
}

/// All templates enrolled for one user, as persisted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateRecord {
    magic: String,
    version: u32,
    owner: UserId,
    updated_at: DateTime<Utc>,
    templates: Vec<Template>,
    checksum: String,
}

impl TemplateRecord {
    /// Create an empty record for a user
    pub fn new(owner: UserId, updated_at: DateTime<Utc>) -> Result<Self> {
        Self::from_templates(owner, Vec::new(), updated_at)
    }

    /// Create a sealed record from a set of templates
    pub fn from_templates(
        owner: UserId,
        templates: Vec<Template>,
        updated_at: DateTime<Utc>,
    ) -> Result<Self> {
        let mut record = Self {
            magic: RECORD_MAGIC.to_string(),
            version: FORMAT_VERSION,
            owner,
            updated_at,
            templates,
            checksum: String::new(),
        };
        record.seal()?;
        record.validate()?;
        Ok(record)
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn checksum(&self) -> &str {
        &self.checksum
    }

    pub fn templates(&self) -> &[Template] {
        &self.templates
    }

    pub fn into_templates(self) -> Vec<Template> {
        self.templates
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Fingers currently enrolled, in enrollment order
    pub fn fingers(&self) -> Vec<Finger> {
        self.templates.iter().map(Template::finger).collect()
    }

    /// Insert a template, replacing any template for the same finger
    ///
    /// Returns the replaced template, if any.
    pub fn upsert(&mut self, template: Template, now: DateTime<Utc>) -> Result<Option<Template>> {
        if template.owner() != &self.owner {
            return Err(Error::OwnerMismatch {
                expected: self.owner.to_string(),
                found: template.owner().to_string(),
            });
        }

        let replaced = match self
            .templates
            .iter()
            .position(|t| t.finger() == template.finger())
        {
            Some(index) => Some(std::mem::replace(&mut self.templates[index], template)),
            None => {
                if self.templates.len() >= MAX_TEMPLATES_PER_USER {
                    return Err(Error::TooManyTemplates {
                        count: self.templates.len() + 1,
                        max: MAX_TEMPLATES_PER_USER,
                    });
                }
                self.templates.push(template);
                None
            }
        };

        self.updated_at = now;
        self.seal()?;
        Ok(replaced)
    }

    /// Remove the template for a finger
    pub fn remove_finger(&mut self, finger: Finger, now: DateTime<Utc>) -> Result<Option<Template>> {
        let removed = match self.templates.iter().position(|t| t.finger() == finger) {
            Some(index) => Some(self.templates.remove(index)),
            None => return Ok(None),
        };
        self.updated_at = now;
        self.seal()?;
        Ok(removed)
    }

    /// Validate structure and integrity
    pub fn validate(&self) -> Result<()> {
        if self.magic != RECORD_MAGIC {
            return Err(Error::InvalidMagic {
                expected: RECORD_MAGIC.to_string(),
                found: self.magic.clone(),
            });
        }

        if self.version == 0 || self.version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(self.version));
        }

        if self.templates.len() > MAX_TEMPLATES_PER_USER {
            return Err(Error::TooManyTemplates {
                count: self.templates.len(),
                max: MAX_TEMPLATES_PER_USER,
            });
        }

        let mut ids = HashSet::new();
        let mut fingers = HashSet::new();
        for template in &self.templates {
            if template.owner() != &self.owner {
                return Err(Error::OwnerMismatch {
                    expected: self.owner.to_string(),
                    found: template.owner().to_string(),
                });
            }
            if template.format_version() == 0 || template.format_version() > FORMAT_VERSION {
                return Err(Error::UnsupportedVersion(template.format_version()));
            }
            if !ids.insert(template.id()) {
                return Err(Error::DuplicateTemplate(template.id().to_string()));
            }
            if !fingers.insert(template.finger()) {
                return Err(Error::DuplicateTemplate(template.finger().to_string()));
            }
        }

        if self.compute_checksum()? != self.checksum {
            return Err(Error::ChecksumMismatch(self.owner.to_string()));
        }

        Ok(())
    }

    /// Serialize to JSON bytes for writing to the store
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse and fully validate a record read from the store
    pub fn from_json(bytes: &[u8], expected_owner: &UserId) -> Result<Self> {
        // Check magic and version first so a newer schema is reported as such
        let header: RecordHeader = serde_json::from_slice(bytes)?;
        if header.magic != RECORD_MAGIC {
            return Err(Error::InvalidMagic {
                expected: RECORD_MAGIC.to_string(),
                found: header.magic,
            });
        }
        if header.version == 0 || header.version > FORMAT_VERSION {
            return Err(Error::UnsupportedVersion(header.version));
        }

        let record: TemplateRecord = serde_json::from_slice(bytes)?;
        if &record.owner != expected_owner {
            return Err(Error::OwnerMismatch {
                expected: expected_owner.to_string(),
                found: record.owner.to_string(),
            });
        }
        record.validate()?;
        Ok(record)
    }

    fn seal(&mut self) -> Result<()> {
        self.checksum = self.compute_checksum()?;
        Ok(())
    }

    fn compute_checksum(&self) -> Result<String> {
        let payload = ChecksumPayload {
            owner: &self.owner,
            updated_at: &self.updated_at,
            templates: &self.templates,
        };
        let bytes = serde_json::to_vec(&payload)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}
