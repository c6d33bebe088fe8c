//! The rendition coordinator: decides whether a rendition needs rendering,
//! defers dispatch to unit-of-work commit, and applies transform results as
//! they come back.
//!
//! Requests within one [`UnitOfWork`] are debounced per `(item, rendition)`
//! pair; only the last request survives to commit. Completions re-entering
//! through [`RenditionCoordinator::consume`] are matched by fingerprint
//! against the item's current content and silently discarded when stale, so
//! out-of-order arrival can never overwrite a newer rendition.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::application::dispatch::{SupportedBy, SwitchingTransformClient};
use crate::application::error::{RenderOutcome, RenditionError};
use crate::application::repos::{
    AttachmentUpdate, ContentGraph, GraphError, PreventionRegistry, RenditionAttachment,
};
use crate::config::RenditionSettings;
use crate::domain::rendition::{RenditionDefinition, RenditionDefinitionRegistry};
use crate::domain::types::{Fingerprint, ItemId};

const METRIC_TRANSFORM_SUBMITTED: &str = "riflesso_transform_submitted_total";
const METRIC_CONSUME_APPLIED: &str = "riflesso_consume_applied_total";
const METRIC_CONSUME_STALE: &str = "riflesso_consume_stale_total";
const METRIC_CONSUME_FAILED: &str = "riflesso_consume_failed_total";

struct DeferredDispatch {
    definition: Arc<RenditionDefinition>,
    supported_by: SupportedBy,
    requested_at: OffsetDateTime,
}

/// Collects render requests until commit. One unit of work spans whatever
/// the host considers a transactional boundary; requests made against it
/// dispatch nothing until [`RenditionCoordinator::commit`] runs, and a unit
/// dropped without commit dispatches nothing at all.
#[derive(Default)]
pub struct UnitOfWork {
    pending: DashMap<(ItemId, String), DeferredDispatch>,
}

impl UnitOfWork {
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

pub struct RenditionCoordinator {
    graph: Arc<dyn ContentGraph>,
    definitions: Arc<RenditionDefinitionRegistry>,
    prevention: Arc<dyn PreventionRegistry>,
    client: SwitchingTransformClient,
    settings: RenditionSettings,
}

impl RenditionCoordinator {
    pub fn new(
        graph: Arc<dyn ContentGraph>,
        definitions: Arc<RenditionDefinitionRegistry>,
        prevention: Arc<dyn PreventionRegistry>,
        client: SwitchingTransformClient,
        settings: RenditionSettings,
    ) -> Self {
        Self {
            graph,
            definitions,
            prevention,
            client,
            settings,
        }
    }

    pub fn begin(&self) -> UnitOfWork {
        UnitOfWork::default()
    }

    /// Requests a rendition of `item`. Nothing is dispatched yet; a
    /// `Scheduled` outcome means the request is recorded in `uow` and will
    /// be re-validated and submitted when the unit commits.
    pub async fn render(
        &self,
        uow: &UnitOfWork,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<RenderOutcome, RenditionError> {
        if !self.settings.is_enabled() {
            debug!(
                target = "application::coordinator::render",
                %item,
                rendition = rendition_name,
                "rendition pipeline is disabled"
            );
            return Ok(RenderOutcome::Disabled);
        }

        for class in self.graph.content_classes(item).await? {
            if self.prevention.is_content_class_registered(&class) {
                debug!(
                    target = "application::coordinator::render",
                    %item,
                    rendition = rendition_name,
                    class = %class,
                    "renditions prevented by content class"
                );
                return Ok(RenderOutcome::Prevented { class });
            }
        }

        let definition = self.definitions.get(rendition_name).ok_or_else(|| {
            RenditionError::UnknownRendition {
                name: rendition_name.to_string(),
            }
        })?;

        let Some(source) = self.graph.content_media_type(item).await? else {
            return Ok(RenderOutcome::Unsupported);
        };
        let size = self.graph.content_size(item).await?;
        let Some(supported_by) = self.client.check_supported(&source, size, &definition) else {
            debug!(
                target = "application::coordinator::render",
                %item,
                rendition = rendition_name,
                source = %source,
                size,
                "no backend supports the transform"
            );
            return Ok(RenderOutcome::Unsupported);
        };

        let fingerprint = self.current_fingerprint(item).await?;
        let attachment = self.graph.rendition_attachment(item, rendition_name).await?;
        if let Some(attachment) = &attachment {
            if attachment.managed && attachment.fingerprint == Some(fingerprint) {
                return Ok(RenderOutcome::AlreadyUpToDate);
            }
        }

        let replaced = uow
            .pending
            .insert(
                (item, rendition_name.to_string()),
                DeferredDispatch {
                    definition,
                    supported_by,
                    requested_at: OffsetDateTime::now_utc(),
                },
            )
            .is_some();
        debug!(
            target = "application::coordinator::render",
            %item,
            rendition = rendition_name,
            replaced,
            "render scheduled for commit"
        );
        Ok(RenderOutcome::Scheduled)
    }

    /// Dispatches everything the unit of work collected.
    ///
    /// Each pending request is re-validated against the item's current
    /// content first: the fingerprint submitted is the one read *now*, and
    /// a rendition that became up to date since the request is skipped.
    /// Commit runs after the host's own transaction has completed, so
    /// failures here cannot reach the caller; they are logged and counted.
    pub async fn commit(&self, uow: UnitOfWork) {
        for ((item, rendition_name), dispatch) in uow.pending.into_iter() {
            let fingerprint = match self.current_fingerprint(item).await {
                Ok(fingerprint) => fingerprint,
                Err(error) => {
                    error!(
                        target = "application::coordinator::commit",
                        %item,
                        rendition = %rendition_name,
                        error = %error,
                        "could not read current content at commit; dropping request"
                    );
                    continue;
                }
            };
            match self.graph.rendition_attachment(item, &rendition_name).await {
                Ok(Some(attachment))
                    if attachment.managed && attachment.fingerprint == Some(fingerprint) =>
                {
                    debug!(
                        target = "application::coordinator::commit",
                        %item,
                        rendition = %rendition_name,
                        "rendition became up to date before commit; skipping"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(error) => {
                    error!(
                        target = "application::coordinator::commit",
                        %item,
                        rendition = %rendition_name,
                        error = %error,
                        "could not read attachment at commit; dropping request"
                    );
                    continue;
                }
            }

            match self
                .client
                .submit(dispatch.supported_by, item, &dispatch.definition, fingerprint)
                .await
            {
                Ok(()) => {
                    counter!(METRIC_TRANSFORM_SUBMITTED).increment(1);
                    info!(
                        target = "application::coordinator::commit",
                        %item,
                        rendition = %rendition_name,
                        %fingerprint,
                        requested_at = %dispatch.requested_at,
                        "transform submitted"
                    );
                }
                Err(error) => {
                    error!(
                        target = "application::coordinator::commit",
                        %item,
                        rendition = %rendition_name,
                        error = %error,
                        "transform submission failed"
                    );
                }
            }
        }
    }

    /// Accepts a transform completion. `content` is `None` when the
    /// transform failed; the attachment is still written so the same failure
    /// is not retried on every read, it just never becomes available.
    ///
    /// A completion whose `fingerprint` no longer matches the item's current
    /// content is discarded without touching the attachment. Errors never
    /// surface to the caller: the engine delivering the result cannot act on
    /// them anyway.
    pub async fn consume(
        &self,
        item: ItemId,
        content: Option<Bytes>,
        definition: &RenditionDefinition,
        fingerprint: Fingerprint,
    ) {
        let rendition_name = definition.rendition_name.as_str();
        let current = match self.current_fingerprint(item).await {
            Ok(current) => current,
            Err(error) => {
                error!(
                    target = "application::coordinator::consume",
                    %item,
                    rendition = rendition_name,
                    error = %error,
                    "could not read current content; result dropped"
                );
                counter!(METRIC_CONSUME_FAILED).increment(1);
                return;
            }
        };
        if fingerprint != current {
            debug!(
                target = "application::coordinator::consume",
                %item,
                rendition = rendition_name,
                %fingerprint,
                %current,
                "stale transform result discarded"
            );
            counter!(METRIC_CONSUME_STALE).increment(1);
            return;
        }

        let mut attempts_left = self.settings.consume_retry_attempts.max(1);
        loop {
            attempts_left -= 1;
            match self.apply(item, content.clone(), definition, fingerprint).await {
                Ok(()) => {
                    counter!(METRIC_CONSUME_APPLIED).increment(1);
                    info!(
                        target = "application::coordinator::consume",
                        %item,
                        rendition = rendition_name,
                        failed = content.is_none(),
                        "transform result applied"
                    );
                    return;
                }
                Err(error @ GraphError::Transient { .. }) if attempts_left > 0 => {
                    warn!(
                        target = "application::coordinator::consume",
                        %item,
                        rendition = rendition_name,
                        attempts_left,
                        error = %error,
                        "transient failure applying transform result; retrying"
                    );
                }
                Err(error) => {
                    error!(
                        target = "application::coordinator::consume",
                        %item,
                        rendition = rendition_name,
                        error = %error,
                        "could not apply transform result"
                    );
                    counter!(METRIC_CONSUME_FAILED).increment(1);
                    return;
                }
            }
        }
    }

    async fn apply(
        &self,
        item: ItemId,
        content: Option<Bytes>,
        definition: &RenditionDefinition,
        fingerprint: Fingerprint,
    ) -> Result<(), GraphError> {
        let source_modified_at = self.graph.source_modified_at(item).await?;
        self.graph
            .create_or_update_attachment(
                item,
                &definition.rendition_name,
                AttachmentUpdate {
                    fingerprint,
                    content,
                    media_type: definition.target_media_type.clone(),
                    source_modified_at,
                },
            )
            .await
    }

    /// The named rendition, only when it is currently available.
    pub async fn rendition_by_name(
        &self,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<Option<RenditionAttachment>, RenditionError> {
        let Some(attachment) = self.graph.rendition_attachment(item, rendition_name).await? else {
            return Ok(None);
        };
        let current = self.current_fingerprint(item).await?;
        Ok(Self::is_available(&attachment, current).then_some(attachment))
    }

    /// All currently available renditions of the item, in name order.
    pub async fn renditions(
        &self,
        item: ItemId,
    ) -> Result<Vec<(String, RenditionAttachment)>, RenditionError> {
        let current = self.current_fingerprint(item).await?;
        let attachments = self.graph.rendition_attachments(item).await?;
        Ok(attachments
            .into_iter()
            .filter(|(_, attachment)| Self::is_available(attachment, current))
            .collect())
    }

    pub async fn is_rendition_available(
        &self,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<bool, RenditionError> {
        Ok(self.rendition_by_name(item, rendition_name).await?.is_some())
    }

    /// Whether the named attachment belongs to this pipeline. Attachments
    /// written by older rendition systems are never managed and must be left
    /// alone.
    pub async fn is_managed_rendition(
        &self,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<bool, RenditionError> {
        if !self.settings.is_enabled() {
            return Ok(false);
        }
        let attachment = self.graph.rendition_attachment(item, rendition_name).await?;
        Ok(attachment.is_some_and(|attachment| attachment.managed))
    }

    /// Content-change observer: re-renders every managed rendition of the
    /// item. New items are skipped; they have no renditions yet and their
    /// first renditions are requested explicitly.
    pub async fn on_content_update(
        &self,
        item: ItemId,
        was_new: bool,
    ) -> Result<(), RenditionError> {
        if was_new {
            debug!(
                target = "application::coordinator::on_content_update",
                %item,
                "new item; no renditions to refresh"
            );
            return Ok(());
        }

        let uow = self.begin();
        for (rendition_name, attachment) in self.graph.rendition_attachments(item).await? {
            if !attachment.managed {
                continue;
            }
            if let Err(error) = self.render(&uow, item, &rendition_name).await {
                warn!(
                    target = "application::coordinator::on_content_update",
                    %item,
                    rendition = %rendition_name,
                    error = %error,
                    "could not re-render after content update"
                );
            }
        }
        self.commit(uow).await;
        Ok(())
    }

    fn is_available(attachment: &RenditionAttachment, current: Fingerprint) -> bool {
        attachment.managed
            && attachment.content.is_some()
            && attachment.fingerprint == Some(current)
    }

    async fn current_fingerprint(&self, item: ItemId) -> Result<Fingerprint, GraphError> {
        let token = self.graph.content_token(item).await?;
        Ok(token
            .map(|token| Fingerprint::from_token(&token))
            .unwrap_or(Fingerprint::ABSENT))
    }
}
