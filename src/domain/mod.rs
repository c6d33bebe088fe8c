pub mod rendition;
pub mod transformer;
pub mod types;
