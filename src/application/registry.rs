//! Transform capability registry.
//!
//! Holds one immutable [`RegistrySnapshot`] at a time and answers
//! support/size-limit queries from it. A reload builds a whole new snapshot
//! and swaps the pointer; readers always observe either the fully-old or
//! fully-new generation, never a mix. A failed reload keeps the previous
//! snapshot serving.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use metrics::counter;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::application::options::non_limit_option_names;
use crate::application::repos::{ConfigSourceError, TransformerConfigSource};
use crate::config::RegistrySettings;
use crate::domain::transformer::{
    PipelineStep, PipelineStepConfig, SupportedSourceAndTarget, TransformerConfig,
    TransformerDefinition,
};
use crate::domain::types::{MediaType, SizeLimit};

const METRIC_REGISTRY_RELOAD: &str = "riflesso_registry_reload_total";
const METRIC_REGISTRY_RELOAD_FAILED: &str = "riflesso_registry_reload_failed_total";

#[derive(Debug, Error)]
pub enum RegistryConfigError {
    #[error("transformer `{name}` is declared more than once")]
    DuplicateTransformer { name: String },
    #[error("pipeline `{pipeline}` has no steps")]
    EmptyPipeline { pipeline: String },
    #[error("pipeline `{pipeline}` references unknown transformer `{step}`")]
    UnknownPipelineStep { pipeline: String, step: String },
    #[error("pipeline `{pipeline}` step `{step}` is itself a pipeline; nesting is not supported")]
    NestedPipeline { pipeline: String, step: String },
    #[error("pipeline `{pipeline}` intermediate step `{step}` declares no target media type")]
    MissingStepTarget { pipeline: String, step: String },
    #[error(
        "pipeline `{pipeline}` does not chain for `{source_type}` -> `{target}`: step `{step}` does not support `{hop_source}` -> `{hop_target}`"
    )]
    BrokenChain {
        pipeline: String,
        source_type: MediaType,
        target: MediaType,
        step: String,
        hop_source: MediaType,
        hop_target: MediaType,
    },
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Config(#[from] RegistryConfigError),
    #[error(transparent)]
    Source(#[from] ConfigSourceError),
}

/// One immutable generation of the registry's data.
#[derive(Debug)]
pub struct RegistrySnapshot {
    definitions: HashMap<String, Arc<TransformerDefinition>>,
    /// `(source, target)` to candidate transformer names: single-step
    /// transformers first, declaration order within each rank.
    index: HashMap<(MediaType, MediaType), Vec<String>>,
}

impl RegistrySnapshot {
    /// Parses configuration records into one immutable snapshot.
    ///
    /// Pipelines are validated here: every step must name a known
    /// single-step transformer and the intermediate media types must chain
    /// for every declared `(source, target)` pair. The effective size bound
    /// of a pipeline pair is the most restrictive bound across its steps
    /// (and the pair's own declared bound).
    pub fn load(configs: &[TransformerConfig]) -> Result<Self, RegistryConfigError> {
        let mut definitions: HashMap<String, Arc<TransformerDefinition>> = HashMap::new();
        let mut declaration_order: Vec<String> = Vec::with_capacity(configs.len());

        // Single-step transformers first; pipelines resolve against them.
        for config in configs.iter().filter(|c| c.pipeline.is_none()) {
            let definition = Self::build_single_step(config);
            if definitions
                .insert(definition.name.clone(), Arc::new(definition))
                .is_some()
            {
                return Err(RegistryConfigError::DuplicateTransformer {
                    name: config.transformer_name.clone(),
                });
            }
        }
        for config in configs.iter() {
            let Some(steps) = &config.pipeline else {
                continue;
            };
            let definition = Self::build_pipeline(config, steps, &definitions)?;
            if definitions
                .insert(definition.name.clone(), Arc::new(definition))
                .is_some()
            {
                return Err(RegistryConfigError::DuplicateTransformer {
                    name: config.transformer_name.clone(),
                });
            }
        }
        declaration_order.extend(configs.iter().map(|c| c.transformer_name.clone()));

        let mut index: HashMap<(MediaType, MediaType), Vec<(usize, usize, String)>> =
            HashMap::new();
        for (declared_at, name) in declaration_order.iter().enumerate() {
            let definition = &definitions[name];
            let rank = usize::from(definition.is_pipeline());
            for pair in &definition.supported {
                index
                    .entry((pair.source.clone(), pair.target.clone()))
                    .or_default()
                    .push((rank, declared_at, name.clone()));
            }
        }
        let index = index
            .into_iter()
            .map(|(key, mut candidates)| {
                candidates.sort();
                let names = candidates.into_iter().map(|(_, _, name)| name).collect();
                (key, names)
            })
            .collect();

        Ok(Self { definitions, index })
    }

    fn build_single_step(config: &TransformerConfig) -> TransformerDefinition {
        TransformerDefinition {
            name: config.transformer_name.clone(),
            supported: config
                .supported_source_and_target
                .iter()
                .map(|pair| SupportedSourceAndTarget {
                    source: pair.source_media_type.clone(),
                    target: pair.target_media_type.clone(),
                    max_size: SizeLimit::from_config_bytes(pair.max_source_size_bytes),
                })
                .collect(),
            option_names: config.transform_options.iter().cloned().collect(),
            pipeline: None,
        }
    }

    fn build_pipeline(
        config: &TransformerConfig,
        steps: &[PipelineStepConfig],
        single_steps: &HashMap<String, Arc<TransformerDefinition>>,
    ) -> Result<TransformerDefinition, RegistryConfigError> {
        let pipeline_name = &config.transformer_name;
        if steps.is_empty() {
            return Err(RegistryConfigError::EmptyPipeline {
                pipeline: pipeline_name.clone(),
            });
        }

        let mut resolved_steps = Vec::with_capacity(steps.len());
        for (position, step) in steps.iter().enumerate() {
            let step_definition = single_steps.get(&step.transformer_name).ok_or_else(|| {
                RegistryConfigError::UnknownPipelineStep {
                    pipeline: pipeline_name.clone(),
                    step: step.transformer_name.clone(),
                }
            })?;
            if step_definition.is_pipeline() {
                return Err(RegistryConfigError::NestedPipeline {
                    pipeline: pipeline_name.clone(),
                    step: step.transformer_name.clone(),
                });
            }
            let is_last = position == steps.len() - 1;
            if !is_last && step.target_media_type.is_none() {
                return Err(RegistryConfigError::MissingStepTarget {
                    pipeline: pipeline_name.clone(),
                    step: step.transformer_name.clone(),
                });
            }
            resolved_steps.push(PipelineStep {
                transformer_name: step.transformer_name.clone(),
                target: step.target_media_type.clone(),
            });
        }

        let mut supported = Vec::with_capacity(config.supported_source_and_target.len());
        for pair in &config.supported_source_and_target {
            let mut bound = SizeLimit::from_config_bytes(pair.max_source_size_bytes);
            let mut hop_source = pair.source_media_type.clone();
            for step in &resolved_steps {
                let hop_target = step
                    .target
                    .clone()
                    .unwrap_or_else(|| pair.target_media_type.clone());
                let step_definition = &single_steps[&step.transformer_name];
                let hop = step_definition
                    .supported_pair(&hop_source, &hop_target)
                    .ok_or_else(|| RegistryConfigError::BrokenChain {
                        pipeline: pipeline_name.clone(),
                        source_type: pair.source_media_type.clone(),
                        target: pair.target_media_type.clone(),
                        step: step.transformer_name.clone(),
                        hop_source: hop_source.clone(),
                        hop_target: hop_target.clone(),
                    })?;
                bound = bound.most_restrictive(hop.max_size);
                hop_source = hop_target;
            }
            supported.push(SupportedSourceAndTarget {
                source: pair.source_media_type.clone(),
                target: pair.target_media_type.clone(),
                max_size: bound,
            });
        }

        Ok(TransformerDefinition {
            name: pipeline_name.clone(),
            supported,
            option_names: config.transform_options.iter().cloned().collect(),
            pipeline: Some(resolved_steps),
        })
    }

    pub fn transformer(&self, name: &str) -> Option<&TransformerDefinition> {
        self.definitions.get(name).map(Arc::as_ref)
    }

    pub fn transformer_count(&self) -> usize {
        self.definitions.len()
    }

    /// The size bound of the first candidate able to perform the transform,
    /// or `None` when the pair is unsupported or no candidate understands
    /// the requested options.
    ///
    /// Candidates whose declared option vocabulary does not cover every
    /// requested non-limit option name are skipped. Single-step transformers
    /// outrank pipelines; within a rank the transformer declared first in
    /// configuration wins. No best-fit heuristic: the ordering is stable and
    /// deterministic.
    pub fn max_size(
        &self,
        source: &MediaType,
        target: &MediaType,
        options: &std::collections::BTreeMap<String, String>,
        rendition_name: &str,
    ) -> Option<SizeLimit> {
        let requested: Vec<&str> = non_limit_option_names(options).collect();
        let candidates = self.index.get(&(source.clone(), target.clone()))?;
        for name in candidates {
            let definition = &self.definitions[name];
            if !definition.understands_options(requested.iter().copied()) {
                debug!(
                    target = "application::registry",
                    transformer = %name,
                    rendition = %rendition_name,
                    "candidate skipped: options not understood"
                );
                continue;
            }
            if let Some(pair) = definition.supported_pair(source, target) {
                return Some(pair.max_size);
            }
        }
        None
    }

    /// Whether a source of `size` bytes can be transformed at all.
    pub fn is_supported(
        &self,
        source: &MediaType,
        size: u64,
        target: &MediaType,
        options: &std::collections::BTreeMap<String, String>,
        rendition_name: &str,
    ) -> bool {
        self.max_size(source, target, options, rendition_name)
            .is_some_and(|limit| limit.permits(size))
    }
}

/// The live registry: current snapshot plus reload machinery.
pub struct TransformRegistry {
    source: Arc<dyn TransformerConfigSource>,
    settings: RegistrySettings,
    snapshot: RwLock<Arc<RegistrySnapshot>>,
    generation: AtomicU64,
}

impl TransformRegistry {
    /// Performs the initial load; the registry never serves a query before
    /// a snapshot exists.
    pub async fn new(
        source: Arc<dyn TransformerConfigSource>,
        settings: RegistrySettings,
    ) -> Result<Arc<Self>, RegistryError> {
        let configs = source.load_transformer_definitions().await?;
        let snapshot = RegistrySnapshot::load(&configs)?;
        info!(
            target = "application::registry",
            transformers = snapshot.transformer_count(),
            "transform registry loaded"
        );
        Ok(Arc::new(Self {
            source,
            settings,
            snapshot: RwLock::new(Arc::new(snapshot)),
            generation: AtomicU64::new(1),
        }))
    }

    /// The current snapshot. Cheap; callers needing a consistent view across
    /// several queries should hold on to the returned `Arc`.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.snapshot.read().expect("snapshot lock poisoned").clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn max_size(
        &self,
        source: &MediaType,
        target: &MediaType,
        options: &std::collections::BTreeMap<String, String>,
        rendition_name: &str,
    ) -> Option<SizeLimit> {
        self.snapshot().max_size(source, target, options, rendition_name)
    }

    pub fn is_supported(
        &self,
        source: &MediaType,
        size: u64,
        target: &MediaType,
        options: &std::collections::BTreeMap<String, String>,
        rendition_name: &str,
    ) -> bool {
        self.snapshot()
            .is_supported(source, size, target, options, rendition_name)
    }

    /// Re-reads the configuration source and swaps in a new snapshot.
    ///
    /// Returns `true` when a new generation went live. Any failure is
    /// logged and the previous snapshot keeps serving; a bad reload must
    /// never take the registry offline.
    pub async fn refresh(&self) -> bool {
        let configs = match self.source.load_transformer_definitions().await {
            Ok(configs) => configs,
            Err(error) => {
                warn!(
                    target = "application::registry",
                    error = %error,
                    "registry refresh failed reading configuration; keeping previous snapshot"
                );
                counter!(METRIC_REGISTRY_RELOAD_FAILED).increment(1);
                return false;
            }
        };
        match RegistrySnapshot::load(&configs) {
            Ok(snapshot) => {
                let transformers = snapshot.transformer_count();
                *self.snapshot.write().expect("snapshot lock poisoned") = Arc::new(snapshot);
                let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                counter!(METRIC_REGISTRY_RELOAD).increment(1);
                info!(
                    target = "application::registry",
                    generation, transformers, "transform registry refreshed"
                );
                true
            }
            Err(error) => {
                warn!(
                    target = "application::registry",
                    error = %error,
                    "registry refresh produced invalid configuration; keeping previous snapshot"
                );
                counter!(METRIC_REGISTRY_RELOAD_FAILED).increment(1);
                false
            }
        }
    }

    /// Spawns the periodic refresh task when enabled by settings. Dropping
    /// the returned guard stops the task.
    pub fn spawn_refresh_task(self: &Arc<Self>) -> RefreshTaskGuard {
        if !self.settings.refresh_enabled {
            return RefreshTaskGuard { handle: None };
        }
        let registry = Arc::clone(self);
        let interval = self.settings.refresh_interval();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The immediate first tick would reload right after `new`.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.refresh().await;
            }
        });
        RefreshTaskGuard {
            handle: Some(handle),
        }
    }
}

/// Aborts the background refresh task on drop.
pub struct RefreshTaskGuard {
    handle: Option<JoinHandle<()>>,
}

impl Drop for RefreshTaskGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::domain::transformer::{PipelineStepConfig, SupportedSourceAndTargetConfig};

    fn pair(source: &str, target: &str, max: i64) -> SupportedSourceAndTargetConfig {
        SupportedSourceAndTargetConfig {
            source_media_type: MediaType::from(source),
            target_media_type: MediaType::from(target),
            max_source_size_bytes: max,
        }
    }

    fn single(name: &str, pairs: Vec<SupportedSourceAndTargetConfig>, options: &[&str]) -> TransformerConfig {
        TransformerConfig {
            transformer_name: name.to_string(),
            supported_source_and_target: pairs,
            transform_options: options.iter().map(|s| s.to_string()).collect(),
            pipeline: None,
        }
    }

    fn pipeline(
        name: &str,
        pairs: Vec<SupportedSourceAndTargetConfig>,
        options: &[&str],
        steps: Vec<(&str, Option<&str>)>,
    ) -> TransformerConfig {
        TransformerConfig {
            transformer_name: name.to_string(),
            supported_source_and_target: pairs,
            transform_options: options.iter().map(|s| s.to_string()).collect(),
            pipeline: Some(
                steps
                    .into_iter()
                    .map(|(step, target)| PipelineStepConfig {
                        transformer_name: step.to_string(),
                        target_media_type: target.map(MediaType::from),
                    })
                    .collect(),
            ),
        }
    }

    fn no_options() -> BTreeMap<String, String> {
        BTreeMap::new()
    }

    #[test]
    fn max_size_returns_declared_bound() {
        let snapshot = RegistrySnapshot::load(&[single(
            "resize",
            vec![pair("image/png", "image/jpeg", 1_000_000)],
            &[],
        )])
        .expect("valid config");

        assert_eq!(
            snapshot.max_size(
                &MediaType::from("image/png"),
                &MediaType::from("image/jpeg"),
                &no_options(),
                "thumb"
            ),
            Some(SizeLimit::Bytes(1_000_000))
        );
        assert_eq!(
            snapshot.max_size(
                &MediaType::from("image/png"),
                &MediaType::from("image/gif"),
                &no_options(),
                "thumb"
            ),
            None
        );
    }

    #[test]
    fn is_supported_applies_exclusive_bound() {
        let snapshot = RegistrySnapshot::load(&[single(
            "resize",
            vec![pair("image/png", "image/jpeg", 1_000_000)],
            &[],
        )])
        .expect("valid config");

        let png = MediaType::from("image/png");
        let jpeg = MediaType::from("image/jpeg");
        assert!(snapshot.is_supported(&png, 500_000, &jpeg, &no_options(), "thumb"));
        assert!(!snapshot.is_supported(&png, 2_000_000, &jpeg, &no_options(), "thumb"));
    }

    #[test]
    fn pipeline_bound_is_minimum_across_steps() {
        let snapshot = RegistrySnapshot::load(&[
            single(
                "officeToPdf",
                vec![pair("application/msword", "application/pdf", 5_000_000)],
                &[],
            ),
            single(
                "pdfToImage",
                vec![pair("application/pdf", "image/png", 2_000_000)],
                &[],
            ),
            pipeline(
                "officeToImage",
                vec![pair("application/msword", "image/png", -1)],
                &[],
                vec![("officeToPdf", Some("application/pdf")), ("pdfToImage", None)],
            ),
        ])
        .expect("valid config");

        assert_eq!(
            snapshot.max_size(
                &MediaType::from("application/msword"),
                &MediaType::from("image/png"),
                &no_options(),
                "preview"
            ),
            Some(SizeLimit::Bytes(2_000_000))
        );
    }

    #[test]
    fn unlimited_steps_do_not_constrain_a_pipeline() {
        let snapshot = RegistrySnapshot::load(&[
            single("a", vec![pair("x/a", "x/b", -1)], &[]),
            single("b", vec![pair("x/b", "x/c", -1)], &[]),
            pipeline(
                "ab",
                vec![pair("x/a", "x/c", -1)],
                &[],
                vec![("a", Some("x/b")), ("b", None)],
            ),
        ])
        .expect("valid config");

        assert_eq!(
            snapshot.max_size(
                &MediaType::from("x/a"),
                &MediaType::from("x/c"),
                &no_options(),
                "r"
            ),
            Some(SizeLimit::Unlimited)
        );
    }

    #[test]
    fn single_step_outranks_pipeline_for_the_same_pair() {
        let snapshot = RegistrySnapshot::load(&[
            single("viaPdfStep1", vec![pair("x/a", "x/pdf", -1)], &[]),
            single("viaPdfStep2", vec![pair("x/pdf", "x/b", -1)], &[]),
            pipeline(
                "viaPdf",
                vec![pair("x/a", "x/b", 100)],
                &[],
                vec![("viaPdfStep1", Some("x/pdf")), ("viaPdfStep2", None)],
            ),
            single("direct", vec![pair("x/a", "x/b", 200)], &[]),
        ])
        .expect("valid config");

        // `direct` is declared after the pipeline but wins because it is a
        // single step.
        assert_eq!(
            snapshot.max_size(
                &MediaType::from("x/a"),
                &MediaType::from("x/b"),
                &no_options(),
                "r"
            ),
            Some(SizeLimit::Bytes(200))
        );
    }

    #[test]
    fn declaration_order_breaks_ties() {
        let snapshot = RegistrySnapshot::load(&[
            single("first", vec![pair("x/a", "x/b", 111)], &[]),
            single("second", vec![pair("x/a", "x/b", 222)], &[]),
        ])
        .expect("valid config");

        assert_eq!(
            snapshot.max_size(
                &MediaType::from("x/a"),
                &MediaType::from("x/b"),
                &no_options(),
                "r"
            ),
            Some(SizeLimit::Bytes(111))
        );
    }

    #[test]
    fn option_superset_filter_skips_candidates() {
        let snapshot = RegistrySnapshot::load(&[
            single("plain", vec![pair("x/a", "x/b", 111)], &[]),
            single("resizing", vec![pair("x/a", "x/b", 222)], &["resizeWidth", "resizeHeight"]),
        ])
        .expect("valid config");

        let options = BTreeMap::from([("resizeWidth".to_string(), "100".to_string())]);
        assert_eq!(
            snapshot.max_size(
                &MediaType::from("x/a"),
                &MediaType::from("x/b"),
                &options,
                "r"
            ),
            Some(SizeLimit::Bytes(222))
        );
    }

    #[test]
    fn limit_options_do_not_affect_matching() {
        let snapshot = RegistrySnapshot::load(&[single("plain", vec![pair("x/a", "x/b", 111)], &[])])
            .expect("valid config");

        let options = BTreeMap::from([
            ("timeout".to_string(), "30000".to_string()),
            ("maxSourceSizeKBytes".to_string(), "500".to_string()),
        ]);
        assert_eq!(
            snapshot.max_size(
                &MediaType::from("x/a"),
                &MediaType::from("x/b"),
                &options,
                "r"
            ),
            Some(SizeLimit::Bytes(111))
        );
    }

    #[test]
    fn unknown_pipeline_step_is_a_configuration_error() {
        let error = RegistrySnapshot::load(&[pipeline(
            "broken",
            vec![pair("x/a", "x/b", -1)],
            &[],
            vec![("missing", None)],
        )])
        .expect_err("unknown step");
        assert!(matches!(
            error,
            RegistryConfigError::UnknownPipelineStep { .. }
        ));
    }

    #[test]
    fn non_chaining_pipeline_is_a_configuration_error() {
        let error = RegistrySnapshot::load(&[
            single("a", vec![pair("x/a", "x/b", -1)], &[]),
            single("b", vec![pair("x/OTHER", "x/c", -1)], &[]),
            pipeline(
                "ab",
                vec![pair("x/a", "x/c", -1)],
                &[],
                vec![("a", Some("x/b")), ("b", None)],
            ),
        ])
        .expect_err("types do not chain");
        assert!(matches!(error, RegistryConfigError::BrokenChain { .. }));
    }

    #[test]
    fn duplicate_transformer_is_a_configuration_error() {
        let error = RegistrySnapshot::load(&[
            single("dup", vec![pair("x/a", "x/b", -1)], &[]),
            single("dup", vec![pair("x/a", "x/c", -1)], &[]),
        ])
        .expect_err("duplicate names");
        assert!(matches!(
            error,
            RegistryConfigError::DuplicateTransformer { .. }
        ));
    }

    #[test]
    fn intermediate_step_without_target_is_rejected() {
        let error = RegistrySnapshot::load(&[
            single("a", vec![pair("x/a", "x/b", -1)], &[]),
            single("b", vec![pair("x/b", "x/c", -1)], &[]),
            pipeline(
                "ab",
                vec![pair("x/a", "x/c", -1)],
                &[],
                vec![("a", None), ("b", None)],
            ),
        ])
        .expect_err("intermediate step needs a target");
        assert!(matches!(
            error,
            RegistryConfigError::MissingStepTarget { .. }
        ));
    }
}
