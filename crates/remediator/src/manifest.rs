//! Workload manifest mutation.
//!
//! Only `spec.replicas` is understood. Everything else is carried through an
//! insertion-ordered YAML mapping so unrelated keys keep their values and
//! their order. Comments are not preserved by the YAML representation and are
//! dropped on re-serialisation.

use serde_yaml::{Mapping, Value};
use thiserror::Error;

const SPEC_KEY: &str = "spec";
const REPLICAS_KEY: &str = "replicas";

/// Manifest does not have the shape a scale-down needs.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("manifest is not valid YAML: {0}")]
    Parse(#[source] serde_yaml::Error),

    #[error("manifest root is not a mapping")]
    NotAMapping,

    #[error("manifest has no top-level `spec`")]
    MissingSpec,

    #[error("manifest `spec` is not a mapping")]
    SpecNotAMapping,

    #[error("failed to serialise manifest: {0}")]
    Serialize(#[source] serde_yaml::Error),
}

/// A parsed manifest with a top-level `spec` mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Manifest {
    document: Mapping,
    trailing_newline: bool,
}

impl Manifest {
    /// Parse manifest text, checking that `spec` is a mapping.
    pub fn parse(text: &str) -> Result<Self, ManifestError> {
        let value: Value = serde_yaml::from_str(text).map_err(ManifestError::Parse)?;
        let Value::Mapping(document) = value else {
            return Err(ManifestError::NotAMapping);
        };

        match document.get(SPEC_KEY) {
            None => return Err(ManifestError::MissingSpec),
            Some(Value::Mapping(_)) => {}
            Some(_) => return Err(ManifestError::SpecNotAMapping),
        }

        Ok(Self {
            document,
            trailing_newline: text.ends_with('\n'),
        })
    }

    fn spec(&self) -> Result<&Mapping, ManifestError> {
        self.document
            .get(SPEC_KEY)
            .ok_or(ManifestError::MissingSpec)?
            .as_mapping()
            .ok_or(ManifestError::SpecNotAMapping)
    }

    fn spec_mut(&mut self) -> Result<&mut Mapping, ManifestError> {
        self.document
            .get_mut(SPEC_KEY)
            .ok_or(ManifestError::MissingSpec)?
            .as_mapping_mut()
            .ok_or(ManifestError::SpecNotAMapping)
    }

    /// Current `spec.replicas`, if present and a non-negative integer.
    pub fn replicas(&self) -> Result<Option<u64>, ManifestError> {
        Ok(self.spec()?.get(REPLICAS_KEY).and_then(Value::as_u64))
    }

    /// Set `spec.replicas`. An existing key keeps its position; a new one is
    /// appended to `spec`.
    pub fn set_replicas(&mut self, replicas: u64) -> Result<(), ManifestError> {
        self.spec_mut()?
            .insert(Value::from(REPLICAS_KEY), Value::from(replicas));
        Ok(())
    }

    /// Serialise back to YAML, keeping the input's trailing-newline style.
    pub fn to_yaml(&self) -> Result<String, ManifestError> {
        let mut text = serde_yaml::to_string(&self.document).map_err(ManifestError::Serialize)?;
        if !self.trailing_newline {
            while text.ends_with('\n') {
                text.pop();
            }
        }
        Ok(text)
    }
}

/// Result of a scale-down mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaledManifest {
    pub content: String,
    pub previous_replicas: Option<u64>,
}

impl ScaledManifest {
    /// Whether the manifest was already scaled to zero before mutation.
    pub fn was_already_zero(&self) -> bool {
        self.previous_replicas == Some(0)
    }
}

/// Set `spec.replicas` to zero and re-serialise.
pub fn set_replicas_to_zero(text: &str) -> Result<ScaledManifest, ManifestError> {
    let mut manifest = Manifest::parse(text)?;
    let previous_replicas = manifest.replicas()?;
    manifest.set_replicas(0)?;

    Ok(ScaledManifest {
        content: manifest.to_yaml()?,
        previous_replicas,
    })
}
