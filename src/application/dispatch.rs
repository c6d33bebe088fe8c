//! Transform backends and the switching client that picks between them.
//!
//! A backend answers "can you do this, and up to what source size" and
//! accepts job submissions. The switching client consults the primary
//! backend first, falling back to an optional secondary, and reports which
//! one accepted so the later submission goes to the same backend instead of
//! re-running the check.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::application::options;
use crate::application::registry::TransformRegistry;
use crate::application::repos::{DispatchError, TransformSubmitter};
use crate::domain::rendition::RenditionDefinition;
use crate::domain::types::{Fingerprint, ItemId, MediaType, SizeLimit};

/// Which backend of a [`SwitchingTransformClient`] accepted a support check.
/// Returned to the caller and passed back on submit; support decisions are
/// never stashed in ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedBy {
    Primary,
    Secondary,
}

#[async_trait]
pub trait TransformBackend: Send + Sync {
    /// The effective source size bound for rendering `definition` from
    /// `source`, `None` when the backend cannot do it at all.
    fn max_size(&self, source: &MediaType, definition: &RenditionDefinition) -> Option<SizeLimit>;

    fn is_supported(
        &self,
        source: &MediaType,
        size: u64,
        definition: &RenditionDefinition,
    ) -> bool {
        self.max_size(source, definition)
            .is_some_and(|limit| limit.permits(size))
    }

    async fn submit(
        &self,
        item: ItemId,
        definition: &RenditionDefinition,
        fingerprint: Fingerprint,
    ) -> Result<(), DispatchError>;
}

/// Backend driven by the transform capability registry, handing accepted
/// jobs to a [`TransformSubmitter`].
pub struct RegistryTransformBackend {
    registry: Arc<TransformRegistry>,
    submitter: Arc<dyn TransformSubmitter>,
}

impl RegistryTransformBackend {
    pub fn new(registry: Arc<TransformRegistry>, submitter: Arc<dyn TransformSubmitter>) -> Self {
        Self {
            registry,
            submitter,
        }
    }
}

#[async_trait]
impl TransformBackend for RegistryTransformBackend {
    fn max_size(&self, source: &MediaType, definition: &RenditionDefinition) -> Option<SizeLimit> {
        let bound = self.registry.max_size(
            source,
            &definition.target_media_type,
            &definition.options,
            &definition.rendition_name,
        )?;
        // The rendition definition may tighten, never widen, the
        // transformer-declared bound.
        Some(match definition.max_source_size_bytes {
            Some(bytes) => bound.most_restrictive(SizeLimit::Bytes(bytes)),
            None => bound,
        })
    }

    async fn submit(
        &self,
        item: ItemId,
        definition: &RenditionDefinition,
        fingerprint: Fingerprint,
    ) -> Result<(), DispatchError> {
        // The flat option map is translated before the job leaves the
        // process; a definition no parameter shape understands is rejected
        // here rather than by the remote engine.
        let options = options::convert(&definition.rendition_name, &definition.options)
            .map_err(|err| DispatchError::rejected(err.to_string()))?;
        self.submitter
            .submit(item, definition, options, fingerprint)
            .await
    }
}

/// Primary/secondary pair of backends behind a single client surface.
pub struct SwitchingTransformClient {
    primary: Arc<dyn TransformBackend>,
    secondary: Option<Arc<dyn TransformBackend>>,
}

impl SwitchingTransformClient {
    pub fn new(
        primary: Arc<dyn TransformBackend>,
        secondary: Option<Arc<dyn TransformBackend>>,
    ) -> Self {
        Self { primary, secondary }
    }

    /// Client with no fallback; every job goes to the one backend.
    pub fn single(backend: Arc<dyn TransformBackend>) -> Self {
        Self::new(backend, None)
    }

    /// Asks the primary backend first, then the secondary. The returned
    /// token must be passed back to [`submit`](Self::submit) so the job goes
    /// to the backend that said yes.
    pub fn check_supported(
        &self,
        source: &MediaType,
        size: u64,
        definition: &RenditionDefinition,
    ) -> Option<SupportedBy> {
        if self.primary.is_supported(source, size, definition) {
            return Some(SupportedBy::Primary);
        }
        if let Some(secondary) = &self.secondary {
            if secondary.is_supported(source, size, definition) {
                debug!(
                    target = "application::dispatch",
                    rendition = %definition.rendition_name,
                    "primary backend declined, secondary accepted"
                );
                return Some(SupportedBy::Secondary);
            }
        }
        None
    }

    pub async fn submit(
        &self,
        by: SupportedBy,
        item: ItemId,
        definition: &RenditionDefinition,
        fingerprint: Fingerprint,
    ) -> Result<(), DispatchError> {
        match by {
            SupportedBy::Primary => self.primary.submit(item, definition, fingerprint).await,
            SupportedBy::Secondary => match &self.secondary {
                Some(secondary) => secondary.submit(item, definition, fingerprint).await,
                None => Err(DispatchError::unavailable(
                    "no secondary backend configured",
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedBackend {
        limit: Option<SizeLimit>,
        submissions: AtomicUsize,
    }

    impl FixedBackend {
        fn new(limit: Option<SizeLimit>) -> Arc<Self> {
            Arc::new(Self {
                limit,
                submissions: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl TransformBackend for FixedBackend {
        fn max_size(&self, _: &MediaType, _: &RenditionDefinition) -> Option<SizeLimit> {
            self.limit
        }

        async fn submit(
            &self,
            _: ItemId,
            _: &RenditionDefinition,
            _: Fingerprint,
        ) -> Result<(), DispatchError> {
            self.submissions.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn definition() -> RenditionDefinition {
        RenditionDefinition::new("doclib", MediaType::from("image/png"), BTreeMap::new())
    }

    #[test]
    fn primary_wins_when_both_support() {
        let client = SwitchingTransformClient::new(
            FixedBackend::new(Some(SizeLimit::Unlimited)),
            Some(FixedBackend::new(Some(SizeLimit::Unlimited)) as Arc<dyn TransformBackend>),
        );
        assert_eq!(
            client.check_supported(&MediaType::from("image/png"), 10, &definition()),
            Some(SupportedBy::Primary)
        );
    }

    #[test]
    fn secondary_is_consulted_when_primary_declines() {
        let client = SwitchingTransformClient::new(
            FixedBackend::new(None),
            Some(FixedBackend::new(Some(SizeLimit::Unlimited)) as Arc<dyn TransformBackend>),
        );
        assert_eq!(
            client.check_supported(&MediaType::from("image/png"), 10, &definition()),
            Some(SupportedBy::Secondary)
        );
    }

    #[test]
    fn neither_backend_supporting_yields_none() {
        let client = SwitchingTransformClient::single(FixedBackend::new(None));
        assert_eq!(
            client.check_supported(&MediaType::from("image/png"), 10, &definition()),
            None
        );
    }

    #[test]
    fn size_bound_is_exclusive() {
        let client =
            SwitchingTransformClient::single(FixedBackend::new(Some(SizeLimit::Bytes(100))));
        let definition = definition();
        assert!(client
            .check_supported(&MediaType::from("image/png"), 99, &definition)
            .is_some());
        assert!(client
            .check_supported(&MediaType::from("image/png"), 100, &definition)
            .is_none());
    }

    #[tokio::test]
    async fn submit_routes_by_token() {
        let primary = FixedBackend::new(Some(SizeLimit::Unlimited));
        let secondary = FixedBackend::new(Some(SizeLimit::Unlimited));
        let client = SwitchingTransformClient::new(
            primary.clone(),
            Some(secondary.clone() as Arc<dyn TransformBackend>),
        );

        client
            .submit(
                SupportedBy::Secondary,
                ItemId::random(),
                &definition(),
                Fingerprint::ABSENT,
            )
            .await
            .expect("submits");
        assert_eq!(primary.submissions.load(Ordering::SeqCst), 0);
        assert_eq!(secondary.submissions.load(Ordering::SeqCst), 1);
    }
}
