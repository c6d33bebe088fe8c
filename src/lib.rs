//! Riflesso renders derived content: thumbnails, previews and other
//! renditions of items in a host content graph.
//!
//! The crate has three moving parts. The transform capability registry
//! (`application::registry`) answers which transformer, if any, can turn one
//! media type into another and up to what source size, from an atomically
//! swappable snapshot of configuration. The coordinator
//! (`application::coordinator`) decides whether a rendition needs rendering,
//! debounces requests per unit of work, and applies completions by
//! fingerprint so stale results are discarded. The dispatch layer
//! (`application::dispatch`) routes jobs to a primary or secondary transform
//! backend.
//!
//! The host supplies the content graph, the transformer configuration
//! source, the prevention registry and the job submitter by implementing the
//! traits in `application::repos`; `infra::memory` has in-memory versions of
//! all four.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;

pub use application::coordinator::{RenditionCoordinator, UnitOfWork};
pub use application::dispatch::{
    RegistryTransformBackend, SupportedBy, SwitchingTransformClient, TransformBackend,
};
pub use application::error::{RenderOutcome, RenditionError};
pub use application::registry::{RegistrySnapshot, TransformRegistry};
pub use domain::rendition::{RenditionDefinition, RenditionDefinitionRegistry};
pub use domain::types::{ContentClass, ContentToken, Fingerprint, ItemId, MediaType, SizeLimit};
