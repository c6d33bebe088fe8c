//! Collaborator traits describing the host systems this crate talks to: the
//! content graph, the transformer configuration source, the rendition
//! prevention registry and the transform submitter.
//!
//! All of these are implemented by the embedding host; `infra::memory`
//! provides in-memory implementations backing the tests.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use time::OffsetDateTime;

use crate::application::options::TransformOptions;
use crate::domain::rendition::RenditionDefinition;
use crate::domain::transformer::TransformerConfig;
use crate::domain::types::{ContentClass, ContentToken, Fingerprint, ItemId, MediaType};

#[derive(Debug, Error, Clone)]
pub enum GraphError {
    #[error("content item `{item}` not found")]
    NotFound { item: ItemId },
    #[error("transient graph failure: {message}")]
    Transient { message: String },
    #[error("graph failure: {message}")]
    Fatal { message: String },
}

impl GraphError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal {
            message: message.into(),
        }
    }
}

/// A rendition attachment as stored on the source item.
///
/// An attachment is *available* only when it carries content and its stored
/// fingerprint equals the source's current fingerprint. A failed transform
/// leaves an attachment with a fingerprint but no content, so it is not
/// silently retried as "up to date" yet never served either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionAttachment {
    pub fingerprint: Option<Fingerprint>,
    pub content: Option<Bytes>,
    pub media_type: Option<MediaType>,
    /// Set when the attachment was written by this pipeline. Attachments
    /// from older rendition systems never carry it and are ignored by the
    /// availability checks.
    pub managed: bool,
    /// Source modification instant recorded when the rendition was applied.
    pub source_modified_at: Option<OffsetDateTime>,
}

/// The full state written by one `consume` apply step. The graph persists it
/// atomically per item and marks the attachment as managed.
#[derive(Debug, Clone)]
pub struct AttachmentUpdate {
    pub fingerprint: Fingerprint,
    pub content: Option<Bytes>,
    pub media_type: MediaType,
    pub source_modified_at: Option<OffsetDateTime>,
}

/// The host's content graph.
///
/// Mutations run inside the host's retryable per-item transactional
/// boundary, with source-item side effects suppressed: attaching a rendition
/// must not touch the source's own modification metadata.
#[async_trait]
pub trait ContentGraph: Send + Sync {
    /// The content-addressing token of the item's current content, `None`
    /// when the item has no content.
    async fn content_token(&self, item: ItemId) -> Result<Option<ContentToken>, GraphError>;

    async fn content_media_type(&self, item: ItemId) -> Result<Option<MediaType>, GraphError>;

    /// Size of the current content in bytes; zero when there is none.
    async fn content_size(&self, item: ItemId) -> Result<u64, GraphError>;

    /// Every content class of the item (its type plus aspects).
    async fn content_classes(&self, item: ItemId) -> Result<Vec<ContentClass>, GraphError>;

    async fn source_modified_at(&self, item: ItemId)
    -> Result<Option<OffsetDateTime>, GraphError>;

    async fn rendition_attachment(
        &self,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<Option<RenditionAttachment>, GraphError>;

    /// All attachments on the item, in stable (name) order.
    async fn rendition_attachments(
        &self,
        item: ItemId,
    ) -> Result<Vec<(String, RenditionAttachment)>, GraphError>;

    async fn create_or_update_attachment(
        &self,
        item: ItemId,
        rendition_name: &str,
        update: AttachmentUpdate,
    ) -> Result<(), GraphError>;
}

#[derive(Debug, Error)]
#[error("transformer configuration source failed: {message}")]
pub struct ConfigSourceError {
    pub message: String,
}

impl ConfigSourceError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Source of transformer definition records, re-read on every registry
/// refresh.
#[async_trait]
pub trait TransformerConfigSource: Send + Sync {
    async fn load_transformer_definitions(&self) -> Result<Vec<TransformerConfig>, ConfigSourceError>;
}

/// Content classes registered here are excluded from renditioning entirely.
pub trait PreventionRegistry: Send + Sync {
    fn is_content_class_registered(&self, class: &ContentClass) -> bool;
}

#[derive(Debug, Error, Clone)]
pub enum DispatchError {
    #[error("transform backend rejected submission: {message}")]
    Rejected { message: String },
    #[error("transform backend unavailable: {message}")]
    Unavailable { message: String },
}

impl DispatchError {
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            message: message.into(),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }
}

/// Fire-and-forget hand-off of a transform job to an external engine. The
/// definition's flat option map has already been translated into `options`;
/// the host is expected to eventually re-enter the coordinator's `consume`
/// with the result and the fingerprint given here.
#[async_trait]
pub trait TransformSubmitter: Send + Sync {
    async fn submit(
        &self,
        item: ItemId,
        definition: &RenditionDefinition,
        options: TransformOptions,
        fingerprint: Fingerprint,
    ) -> Result<(), DispatchError>;
}
