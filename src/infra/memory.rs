//! In-memory implementations of the collaborator traits.
//!
//! These back the integration tests and make the crate runnable without a
//! real content graph behind it. The graph supports injecting transient
//! write failures so retry behaviour can be exercised.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use dashmap::DashMap;
use time::OffsetDateTime;

use crate::application::options::TransformOptions;
use crate::application::repos::{
    AttachmentUpdate, ConfigSourceError, ContentGraph, DispatchError, GraphError,
    PreventionRegistry, RenditionAttachment, TransformSubmitter, TransformerConfigSource,
};
use crate::domain::rendition::RenditionDefinition;
use crate::domain::transformer::TransformerConfig;
use crate::domain::types::{ContentClass, ContentToken, Fingerprint, ItemId, MediaType};

#[derive(Debug, Clone, Default)]
struct ItemState {
    token: Option<ContentToken>,
    media_type: Option<MediaType>,
    size: u64,
    classes: Vec<ContentClass>,
    modified_at: Option<OffsetDateTime>,
    attachments: BTreeMap<String, RenditionAttachment>,
}

/// Content graph held entirely in memory.
#[derive(Default)]
pub struct InMemoryContentGraph {
    items: DashMap<ItemId, ItemState>,
    transient_update_failures: AtomicU32,
}

impl InMemoryContentGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an item with content; returns its id.
    pub fn add_item(&self, token: &str, media_type: &str, size: u64) -> ItemId {
        let item = ItemId::random();
        self.items.insert(
            item,
            ItemState {
                token: Some(ContentToken::new(token)),
                media_type: Some(MediaType::from(media_type)),
                size,
                classes: Vec::new(),
                modified_at: Some(OffsetDateTime::now_utc()),
                attachments: BTreeMap::new(),
            },
        );
        item
    }

    /// Creates an item with no content yet.
    pub fn add_empty_item(&self) -> ItemId {
        let item = ItemId::random();
        self.items.insert(item, ItemState::default());
        item
    }

    /// Replaces the item's content, as an upload would.
    pub fn set_content(&self, item: ItemId, token: &str, media_type: &str, size: u64) {
        let mut state = self.items.get_mut(&item).expect("item exists");
        state.token = Some(ContentToken::new(token));
        state.media_type = Some(MediaType::from(media_type));
        state.size = size;
        state.modified_at = Some(OffsetDateTime::now_utc());
    }

    pub fn add_class(&self, item: ItemId, class: &str) {
        let mut state = self.items.get_mut(&item).expect("item exists");
        state.classes.push(ContentClass::new(class));
    }

    /// Plants an attachment directly, bypassing the pipeline. `managed:
    /// false` attachments model renditions left behind by an older system.
    pub fn plant_attachment(
        &self,
        item: ItemId,
        rendition_name: &str,
        attachment: RenditionAttachment,
    ) {
        let mut state = self.items.get_mut(&item).expect("item exists");
        state.attachments.insert(rendition_name.to_string(), attachment);
    }

    pub fn attachment(&self, item: ItemId, rendition_name: &str) -> Option<RenditionAttachment> {
        self.items
            .get(&item)
            .and_then(|state| state.attachments.get(rendition_name).cloned())
    }

    /// The fingerprint the graph would report for the item's current content.
    pub fn current_fingerprint(&self, item: ItemId) -> Fingerprint {
        self.items
            .get(&item)
            .and_then(|state| state.token.as_ref().map(Fingerprint::from_token))
            .unwrap_or(Fingerprint::ABSENT)
    }

    /// The next `count` attachment writes fail with a transient error.
    pub fn fail_next_updates(&self, count: u32) {
        self.transient_update_failures.store(count, Ordering::SeqCst);
    }

    fn with_item<T>(
        &self,
        item: ItemId,
        read: impl FnOnce(&ItemState) -> T,
    ) -> Result<T, GraphError> {
        self.items
            .get(&item)
            .map(|state| read(&state))
            .ok_or(GraphError::NotFound { item })
    }
}

#[async_trait]
impl ContentGraph for InMemoryContentGraph {
    async fn content_token(&self, item: ItemId) -> Result<Option<ContentToken>, GraphError> {
        self.with_item(item, |state| state.token.clone())
    }

    async fn content_media_type(&self, item: ItemId) -> Result<Option<MediaType>, GraphError> {
        self.with_item(item, |state| state.media_type.clone())
    }

    async fn content_size(&self, item: ItemId) -> Result<u64, GraphError> {
        self.with_item(item, |state| state.size)
    }

    async fn content_classes(&self, item: ItemId) -> Result<Vec<ContentClass>, GraphError> {
        self.with_item(item, |state| state.classes.clone())
    }

    async fn source_modified_at(
        &self,
        item: ItemId,
    ) -> Result<Option<OffsetDateTime>, GraphError> {
        self.with_item(item, |state| state.modified_at)
    }

    async fn rendition_attachment(
        &self,
        item: ItemId,
        rendition_name: &str,
    ) -> Result<Option<RenditionAttachment>, GraphError> {
        self.with_item(item, |state| state.attachments.get(rendition_name).cloned())
    }

    async fn rendition_attachments(
        &self,
        item: ItemId,
    ) -> Result<Vec<(String, RenditionAttachment)>, GraphError> {
        self.with_item(item, |state| {
            state
                .attachments
                .iter()
                .map(|(name, attachment)| (name.clone(), attachment.clone()))
                .collect()
        })
    }

    async fn create_or_update_attachment(
        &self,
        item: ItemId,
        rendition_name: &str,
        update: AttachmentUpdate,
    ) -> Result<(), GraphError> {
        if self
            .transient_update_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(GraphError::transient("injected write failure"));
        }
        let mut state = self.items.get_mut(&item).ok_or(GraphError::NotFound { item })?;
        state.attachments.insert(
            rendition_name.to_string(),
            RenditionAttachment {
                fingerprint: Some(update.fingerprint),
                content: update.content,
                media_type: Some(update.media_type),
                managed: true,
                source_modified_at: update.source_modified_at,
            },
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmittedJob {
    pub item: ItemId,
    pub rendition_name: String,
    pub options: TransformOptions,
    pub fingerprint: Fingerprint,
}

/// Submitter that records every job instead of transforming anything.
#[derive(Default)]
pub struct RecordingSubmitter {
    jobs: Mutex<Vec<SubmittedJob>>,
}

impl RecordingSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn submissions(&self) -> Vec<SubmittedJob> {
        self.jobs.lock().expect("job lock poisoned").clone()
    }

    pub fn submission_count(&self) -> usize {
        self.jobs.lock().expect("job lock poisoned").len()
    }
}

#[async_trait]
impl TransformSubmitter for RecordingSubmitter {
    async fn submit(
        &self,
        item: ItemId,
        definition: &RenditionDefinition,
        options: TransformOptions,
        fingerprint: Fingerprint,
    ) -> Result<(), DispatchError> {
        self.jobs.lock().expect("job lock poisoned").push(SubmittedJob {
            item,
            rendition_name: definition.rendition_name.clone(),
            options,
            fingerprint,
        });
        Ok(())
    }
}

/// Configuration source serving whatever records were last set. Can be
/// switched into a failing mode to exercise reload error handling.
#[derive(Default)]
pub struct StaticConfigSource {
    configs: RwLock<Vec<TransformerConfig>>,
    failing: RwLock<bool>,
}

impl StaticConfigSource {
    pub fn new(configs: Vec<TransformerConfig>) -> Self {
        Self {
            configs: RwLock::new(configs),
            failing: RwLock::new(false),
        }
    }

    pub fn set_configs(&self, configs: Vec<TransformerConfig>) {
        *self.configs.write().expect("config lock poisoned") = configs;
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.write().expect("config lock poisoned") = failing;
    }
}

#[async_trait]
impl TransformerConfigSource for StaticConfigSource {
    async fn load_transformer_definitions(
        &self,
    ) -> Result<Vec<TransformerConfig>, ConfigSourceError> {
        if *self.failing.read().expect("config lock poisoned") {
            return Err(ConfigSourceError::new("configuration source offline"));
        }
        Ok(self.configs.read().expect("config lock poisoned").clone())
    }
}

/// Prevention registry over a plain set of content classes.
#[derive(Default)]
pub struct InMemoryPreventionRegistry {
    classes: RwLock<HashSet<ContentClass>>,
}

impl InMemoryPreventionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, class: &str) {
        self.classes
            .write()
            .expect("class lock poisoned")
            .insert(ContentClass::new(class));
    }

    pub fn deregister(&self, class: &str) {
        self.classes
            .write()
            .expect("class lock poisoned")
            .remove(&ContentClass::new(class));
    }
}

impl PreventionRegistry for InMemoryPreventionRegistry {
    fn is_content_class_registered(&self, class: &ContentClass) -> bool {
        self.classes
            .read()
            .expect("class lock poisoned")
            .contains(class)
    }
}
