use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use riflesso::application::registry::TransformRegistry;
use riflesso::config::RegistrySettings;
use riflesso::domain::transformer::{
    PipelineStepConfig, SupportedSourceAndTargetConfig, TransformerConfig,
};
use riflesso::domain::types::{MediaType, SizeLimit};
use riflesso::infra::memory::StaticConfigSource;

fn transformer(name: &str, source: &str, target: &str, max: i64) -> TransformerConfig {
    TransformerConfig {
        transformer_name: name.to_string(),
        supported_source_and_target: vec![SupportedSourceAndTargetConfig {
            source_media_type: MediaType::from(source),
            target_media_type: MediaType::from(target),
            max_source_size_bytes: max,
        }],
        transform_options: Vec::new(),
        pipeline: None,
    }
}

fn no_options() -> BTreeMap<String, String> {
    BTreeMap::new()
}

fn no_refresh() -> RegistrySettings {
    RegistrySettings {
        refresh_enabled: false,
        ..RegistrySettings::default()
    }
}

#[tokio::test]
async fn refresh_swaps_in_new_capabilities() {
    let source = Arc::new(StaticConfigSource::new(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        1_000_000,
    )]));
    let registry = TransformRegistry::new(source.clone(), no_refresh())
        .await
        .expect("registry loads");
    assert_eq!(registry.generation(), 1);

    let gif = MediaType::from("image/gif");
    let jpeg = MediaType::from("image/jpeg");
    assert_eq!(registry.max_size(&gif, &jpeg, &no_options(), "thumb"), None);

    source.set_configs(vec![
        transformer("imageResize", "image/png", "image/jpeg", 1_000_000),
        transformer("gifConvert", "image/gif", "image/jpeg", 300_000),
    ]);
    assert!(registry.refresh().await);
    assert_eq!(registry.generation(), 2);
    assert_eq!(
        registry.max_size(&gif, &jpeg, &no_options(), "thumb"),
        Some(SizeLimit::Bytes(300_000))
    );
}

#[tokio::test]
async fn failed_source_keeps_the_previous_snapshot() {
    let source = Arc::new(StaticConfigSource::new(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        1_000_000,
    )]));
    let registry = TransformRegistry::new(source.clone(), no_refresh())
        .await
        .expect("registry loads");

    source.set_failing(true);
    assert!(!registry.refresh().await);
    assert_eq!(registry.generation(), 1);
    assert_eq!(
        registry.max_size(
            &MediaType::from("image/png"),
            &MediaType::from("image/jpeg"),
            &no_options(),
            "thumb"
        ),
        Some(SizeLimit::Bytes(1_000_000))
    );
}

#[tokio::test]
async fn invalid_configuration_keeps_the_previous_snapshot() {
    let source = Arc::new(StaticConfigSource::new(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        1_000_000,
    )]));
    let registry = TransformRegistry::new(source.clone(), no_refresh())
        .await
        .expect("registry loads");

    source.set_configs(vec![TransformerConfig {
        transformer_name: "brokenPipeline".to_string(),
        supported_source_and_target: vec![SupportedSourceAndTargetConfig {
            source_media_type: MediaType::from("image/png"),
            target_media_type: MediaType::from("image/jpeg"),
            max_source_size_bytes: -1,
        }],
        transform_options: Vec::new(),
        pipeline: Some(vec![PipelineStepConfig {
            transformer_name: "missingStep".to_string(),
            target_media_type: None,
        }]),
    }]);
    assert!(!registry.refresh().await);
    assert_eq!(registry.generation(), 1);
    assert_eq!(
        registry.max_size(
            &MediaType::from("image/png"),
            &MediaType::from("image/jpeg"),
            &no_options(),
            "thumb"
        ),
        Some(SizeLimit::Bytes(1_000_000))
    );
}

#[tokio::test]
async fn a_held_snapshot_is_unaffected_by_refresh() {
    let source = Arc::new(StaticConfigSource::new(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        1_000_000,
    )]));
    let registry = TransformRegistry::new(source.clone(), no_refresh())
        .await
        .expect("registry loads");

    let held = registry.snapshot();
    source.set_configs(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        50,
    )]);
    assert!(registry.refresh().await);

    let png = MediaType::from("image/png");
    let jpeg = MediaType::from("image/jpeg");
    assert_eq!(
        held.max_size(&png, &jpeg, &no_options(), "thumb"),
        Some(SizeLimit::Bytes(1_000_000))
    );
    assert_eq!(
        registry.max_size(&png, &jpeg, &no_options(), "thumb"),
        Some(SizeLimit::Bytes(50))
    );
}

#[tokio::test(start_paused = true)]
async fn background_task_refreshes_until_its_guard_drops() {
    let source = Arc::new(StaticConfigSource::new(vec![transformer(
        "imageResize",
        "image/png",
        "image/jpeg",
        1_000_000,
    )]));
    let registry = TransformRegistry::new(
        source.clone(),
        RegistrySettings {
            refresh_enabled: true,
            refresh_interval_secs: 60,
        },
    )
    .await
    .expect("registry loads");

    let guard = registry.spawn_refresh_task();
    tokio::time::sleep(Duration::from_secs(130)).await;
    let after_two_ticks = registry.generation();
    assert!(after_two_ticks >= 3, "expected at least two reloads");

    drop(guard);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(registry.generation(), after_two_ticks);
}
