//! Rendition definitions and the lookup registry consumed by the
//! coordinator. Construction of the definitions themselves belongs to the
//! host; this crate only looks them up by name.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use super::types::MediaType;

/// Flat option names understood across transformers. Renditions carry these
/// as plain string pairs; the options translator maps them onto structured
/// parameter shapes.
pub mod option_names {
    pub const WIDTH: &str = "width";
    pub const HEIGHT: &str = "height";
    pub const THUMBNAIL: &str = "thumbnail";
    pub const RESIZE_WIDTH: &str = "resizeWidth";
    pub const RESIZE_HEIGHT: &str = "resizeHeight";
    pub const RESIZE_PERCENTAGE: &str = "resizePercentage";
    pub const ALLOW_ENLARGEMENT: &str = "allowEnlargement";
    pub const MAINTAIN_ASPECT_RATIO: &str = "maintainAspectRatio";
    pub const AUTO_ORIENT: &str = "autoOrient";

    pub const CROP_GRAVITY: &str = "cropGravity";
    pub const CROP_WIDTH: &str = "cropWidth";
    pub const CROP_HEIGHT: &str = "cropHeight";
    pub const CROP_PERCENTAGE: &str = "cropPercentage";
    pub const CROP_X_OFFSET: &str = "cropXOffset";
    pub const CROP_Y_OFFSET: &str = "cropYOffset";

    pub const PAGE: &str = "page";
    pub const START_PAGE: &str = "startPage";
    pub const END_PAGE: &str = "endPage";

    pub const OFFSET: &str = "offset";
    pub const DURATION: &str = "duration";

    pub const FLASH_VERSION: &str = "flashVersion";
    pub const INCLUDE_CONTENTS: &str = "includeContents";

    pub const TIMEOUT: &str = "timeout";
    pub const MAX_SOURCE_SIZE_K_BYTES: &str = "maxSourceSizeKBytes";
}

/// A named derived-rendition recipe: what to produce and with which options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenditionDefinition {
    pub rendition_name: String,
    pub target_media_type: MediaType,
    pub options: BTreeMap<String, String>,
    /// Overrides the transformer-declared source size bound when set.
    pub max_source_size_bytes: Option<u64>,
}

impl RenditionDefinition {
    pub fn new(
        rendition_name: impl Into<String>,
        target_media_type: MediaType,
        options: BTreeMap<String, String>,
    ) -> Self {
        Self {
            rendition_name: rendition_name.into(),
            target_media_type,
            options,
            max_source_size_bytes: None,
        }
    }

    pub fn with_max_source_size_bytes(mut self, bytes: u64) -> Self {
        self.max_source_size_bytes = Some(bytes);
        self
    }
}

/// Lookup-by-name store of rendition definitions. Registration order is not
/// significant; names are unique, later registrations replace earlier ones.
#[derive(Default)]
pub struct RenditionDefinitionRegistry {
    definitions: RwLock<BTreeMap<String, Arc<RenditionDefinition>>>,
}

impl RenditionDefinitionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, definition: RenditionDefinition) {
        let mut definitions = self.definitions.write().expect("definition lock poisoned");
        definitions.insert(definition.rendition_name.clone(), Arc::new(definition));
    }

    pub fn get(&self, rendition_name: &str) -> Option<Arc<RenditionDefinition>> {
        let definitions = self.definitions.read().expect("definition lock poisoned");
        definitions.get(rendition_name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let definitions = self.definitions.read().expect("definition lock poisoned");
        definitions.keys().cloned().collect()
    }
}
