//! Outcomes and errors of the rendition coordinator.

use thiserror::Error;

use crate::application::repos::GraphError;
use crate::domain::types::ContentClass;

/// Why a render request did or did not produce a scheduled job. Every
/// variant except `Scheduled` means no transform was submitted; none of them
/// is an error, they are answers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RenderOutcome {
    /// A job was recorded in the unit of work and will be dispatched on
    /// commit.
    Scheduled,
    /// The stored rendition already matches the current content.
    AlreadyUpToDate,
    /// The pipeline is switched off in settings.
    Disabled,
    /// A content class of the item is registered for prevention.
    Prevented { class: ContentClass },
    /// No backend can perform the transform for this source at its current
    /// size, or the item has no source media type.
    Unsupported,
}

#[derive(Debug, Error)]
pub enum RenditionError {
    #[error("no rendition definition named `{name}` is registered")]
    UnknownRendition { name: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}
