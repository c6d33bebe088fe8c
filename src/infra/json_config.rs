//! Transformer configuration from a JSON file on disk.
//!
//! The file holds a single object with a `transformers` array; each entry
//! deserializes into a [`TransformerConfig`]. The file is re-read on every
//! registry refresh, so edits go live without a restart.

use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;

use crate::application::repos::{ConfigSourceError, TransformerConfigSource};
use crate::domain::transformer::TransformerConfig;

#[derive(Debug, Deserialize)]
struct TransformerConfigFile {
    transformers: Vec<TransformerConfig>,
}

pub struct JsonFileConfigSource {
    path: PathBuf,
}

impl JsonFileConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl TransformerConfigSource for JsonFileConfigSource {
    async fn load_transformer_definitions(
        &self,
    ) -> Result<Vec<TransformerConfig>, ConfigSourceError> {
        let raw = std::fs::read(&self.path).map_err(|err| {
            ConfigSourceError::new(format!("reading {}: {err}", self.path.display()))
        })?;
        let file: TransformerConfigFile = serde_json::from_slice(&raw).map_err(|err| {
            ConfigSourceError::new(format!("parsing {}: {err}", self.path.display()))
        })?;
        Ok(file.transformers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parses_a_transformer_config_file() {
        let path = std::env::temp_dir().join(format!(
            "riflesso-config-{}.json",
            uuid::Uuid::new_v4()
        ));
        std::fs::write(
            &path,
            r#"{
                "transformers": [
                    {
                        "transformer_name": "imageResize",
                        "supported_source_and_target": [
                            {
                                "source_media_type": "image/png",
                                "target_media_type": "image/jpeg",
                                "max_source_size_bytes": 1000000
                            }
                        ],
                        "transform_options": ["resizeWidth", "resizeHeight"]
                    }
                ]
            }"#,
        )
        .expect("write config file");

        let source = JsonFileConfigSource::new(&path);
        let configs = source
            .load_transformer_definitions()
            .await
            .expect("loads config");
        std::fs::remove_file(&path).ok();

        assert_eq!(configs.len(), 1);
        assert_eq!(configs[0].transformer_name, "imageResize");
        assert_eq!(configs[0].supported_source_and_target.len(), 1);
    }

    #[tokio::test]
    async fn missing_file_is_a_source_error() {
        let source = JsonFileConfigSource::new("/nonexistent/riflesso.json");
        assert!(source.load_transformer_definitions().await.is_err());
    }
}
