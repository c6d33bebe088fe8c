//! Transformer definitions as loaded from the host's configuration source.
//!
//! Configuration records ([`TransformerConfig`]) are whatever the collaborator
//! produces, already parsed; [`TransformerDefinition`] is the immutable form
//! the registry serves queries from. Definitions never change once built; a
//! reload produces a whole new set.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::types::{MediaType, SizeLimit};

/// One supported `(source, target)` media type pair in a configuration
/// record, with a maximum source size in bytes (negative means unlimited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportedSourceAndTargetConfig {
    pub source_media_type: MediaType,
    pub target_media_type: MediaType,
    #[serde(default = "unlimited_bytes")]
    pub max_source_size_bytes: i64,
}

fn unlimited_bytes() -> i64 {
    -1
}

/// One step of a pipeline. Intermediate steps declare the media type they
/// produce; the final step's output is the pair's target and is left `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStepConfig {
    pub transformer_name: String,
    #[serde(default)]
    pub target_media_type: Option<MediaType>,
}

/// A transformer definition record from the configuration source. A record
/// with `pipeline` set chains other transformers; its own
/// `supported_source_and_target` list declares the end-to-end pairs it
/// offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransformerConfig {
    pub transformer_name: String,
    #[serde(default)]
    pub supported_source_and_target: Vec<SupportedSourceAndTargetConfig>,
    #[serde(default)]
    pub transform_options: Vec<String>,
    #[serde(default)]
    pub pipeline: Option<Vec<PipelineStepConfig>>,
}

/// An immutable supported pair with its resolved size limit. For pipelines
/// the limit already folds in the most restrictive step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedSourceAndTarget {
    pub source: MediaType,
    pub target: MediaType,
    pub max_size: SizeLimit,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineStep {
    pub transformer_name: String,
    /// `None` only on the final step, whose output is the pair's target.
    pub target: Option<MediaType>,
}

/// An immutable transformer definition. Built wholesale by the registry's
/// `load`; never mutated in place.
#[derive(Debug, Clone)]
pub struct TransformerDefinition {
    pub name: String,
    pub supported: Vec<SupportedSourceAndTarget>,
    pub option_names: BTreeSet<String>,
    pub pipeline: Option<Vec<PipelineStep>>,
}

impl TransformerDefinition {
    pub fn is_pipeline(&self) -> bool {
        self.pipeline.is_some()
    }

    /// The first declared pair matching `(source, target)`, if any.
    pub fn supported_pair(
        &self,
        source: &MediaType,
        target: &MediaType,
    ) -> Option<&SupportedSourceAndTarget> {
        self.supported
            .iter()
            .find(|pair| &pair.source == source && &pair.target == target)
    }

    /// Whether the declared option vocabulary covers every requested name.
    pub fn understands_options<'a>(&self, requested: impl IntoIterator<Item = &'a str>) -> bool {
        requested
            .into_iter()
            .all(|name| self.option_names.contains(name))
    }
}
