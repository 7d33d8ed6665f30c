//! Transformation steps
//!
//! An asset's bytes flow through an ordered [`TransformChain`] of
//! [`TransformStep`]s. The first failing step fails the asset; the
//! remaining steps are not run.
//!
//! Built-in steps:
//! - [`RejectEmpty`]: refuses zero-length assets
//! - [`DicomPreamble`]: checks the Part 10 preamble and `DICM` magic
//! - [`ParityPasses`]: staged passes where only some sub-operations apply
//! - [`ProvenanceStamp`]: records source key and content fingerprint

use async_trait::async_trait;
use dicomflow_core::{AssetProcessingError, Fingerprint, StepError};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Asset bytes plus whatever the steps learned about them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssetData {
    /// Key of the source asset
    pub source_key: String,
    /// Current bytes
    pub bytes: Vec<u8>,
    /// Metadata attached by steps
    pub metadata: BTreeMap<String, String>,
    /// Labels of the operations applied so far, in order
    pub applied: Vec<String>,
}

impl AssetData {
    /// Wrap freshly fetched bytes
    #[inline]
    #[must_use]
    pub fn new(source_key: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            source_key: source_key.into(),
            bytes,
            ..Self::default()
        }
    }
}

/// One transformation step
#[async_trait]
pub trait TransformStep: Send + Sync {
    /// Step name, used in errors and logs
    fn name(&self) -> &str;

    /// Transform the asset or reject it
    async fn apply(&self, data: AssetData) -> Result<AssetData, StepError>;
}

/// Ordered sequence of steps
#[derive(Clone, Default)]
pub struct TransformChain {
    steps: Vec<Arc<dyn TransformStep>>,
}

impl std::fmt::Debug for TransformChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.steps.iter().map(|step| step.name().to_string()))
            .finish()
    }
}

impl TransformChain {
    /// Create empty chain (passes bytes through unchanged)
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Chain used when none is configured
    #[must_use]
    pub fn standard() -> Self {
        Self::new()
            .with_step(RejectEmpty)
            .with_step(ParityPasses::default())
            .with_step(ProvenanceStamp)
    }

    /// With step appended
    #[inline]
    #[must_use]
    pub fn with_step(mut self, step: impl TransformStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Number of steps
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Check if the chain has no steps
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Step names in execution order
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|step| step.name()).collect()
    }

    /// Run every step in order
    ///
    /// # Errors
    /// `AssetProcessingError::Step` naming the first step that failed
    pub async fn run(&self, mut data: AssetData) -> Result<AssetData, AssetProcessingError> {
        for step in &self.steps {
            tracing::debug!("Applying step {} on {}", step.name(), data.source_key);
            data = step
                .apply(data)
                .await
                .map_err(|source| AssetProcessingError::Step {
                    step: step.name().to_string(),
                    source,
                })?;
        }
        Ok(data)
    }
}

/// Refuses zero-length assets
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectEmpty;

#[async_trait]
impl TransformStep for RejectEmpty {
    fn name(&self) -> &str {
        "reject_empty"
    }

    async fn apply(&self, data: AssetData) -> Result<AssetData, StepError> {
        if data.bytes.is_empty() {
            return Err(StepError::new("asset is empty"));
        }
        Ok(data)
    }
}

/// Checks the DICOM Part 10 header: 128-byte preamble followed by `DICM`
#[derive(Debug, Clone, Copy, Default)]
pub struct DicomPreamble;

impl DicomPreamble {
    const PREAMBLE_LEN: usize = 128;
    const MAGIC: &'static [u8; 4] = b"DICM";
}

#[async_trait]
impl TransformStep for DicomPreamble {
    fn name(&self) -> &str {
        "dicom_preamble"
    }

    async fn apply(&self, mut data: AssetData) -> Result<AssetData, StepError> {
        let magic_end = Self::PREAMBLE_LEN + Self::MAGIC.len();
        match data.bytes.get(Self::PREAMBLE_LEN..magic_end) {
            Some(magic) if magic == Self::MAGIC => {
                data.metadata
                    .insert("format".to_string(), "dicom-part10".to_string());
                Ok(data)
            }
            Some(_) => Err(StepError::new("missing DICM magic after preamble")),
            None => Err(StepError::new(format!(
                "asset too short for a DICOM header ({} bytes)",
                data.bytes.len()
            ))),
        }
    }
}

/// Staged passes where a sub-operation applies only when `stage * op` is even
///
/// Applied passes are recorded as `stage-{i}/op-{j}` in [`AssetData::applied`];
/// skipped ones are logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParityPasses {
    /// Number of stages
    pub stages: usize,
    /// Sub-operations per stage
    pub sub_operations: usize,
}

impl ParityPasses {
    /// Create with explicit bounds
    #[inline]
    #[must_use]
    pub fn new(stages: usize, sub_operations: usize) -> Self {
        Self {
            stages,
            sub_operations,
        }
    }

    /// Check if sub-operation `op` of `stage` applies
    #[inline]
    #[must_use]
    pub fn applies(stage: usize, op: usize) -> bool {
        (stage * op) % 2 == 0
    }
}

impl Default for ParityPasses {
    fn default() -> Self {
        Self::new(5, 3)
    }
}

#[async_trait]
impl TransformStep for ParityPasses {
    fn name(&self) -> &str {
        "parity_passes"
    }

    async fn apply(&self, mut data: AssetData) -> Result<AssetData, StepError> {
        for stage in 0..self.stages {
            tracing::info!("Applying stage {} on {}", stage, data.source_key);
            for op in 0..self.sub_operations {
                if Self::applies(stage, op) {
                    data.applied.push(format!("stage-{stage}/op-{op}"));
                } else {
                    tracing::debug!("Skipping op {} of stage {} on {}", op, stage, data.source_key);
                }
            }
        }
        Ok(data)
    }
}

/// Records the source key and the fingerprint of the bytes reaching it
#[derive(Debug, Clone, Copy, Default)]
pub struct ProvenanceStamp;

#[async_trait]
impl TransformStep for ProvenanceStamp {
    fn name(&self) -> &str {
        "provenance_stamp"
    }

    async fn apply(&self, mut data: AssetData) -> Result<AssetData, StepError> {
        let fingerprint = Fingerprint::compute(&data.bytes);
        data.metadata
            .insert("source_key".to_string(), data.source_key.clone());
        data.metadata
            .insert("fingerprint".to_string(), fingerprint.to_hex());
        Ok(data)
    }
}
