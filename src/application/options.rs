//! Translation of flat rendition option maps into structured transform
//! parameter shapes.
//!
//! Renditions carry their options as plain string pairs. Before a job is
//! handed to an engine the map is classified against fixed vocabularies and
//! turned into a typed [`TransformOptions`]. Unknown combinations are
//! rejected with the offending names listed, so a bad rendition definition
//! is diagnosable from the error alone.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use once_cell::sync::Lazy;
use thiserror::Error;

use crate::domain::rendition::option_names::{
    ALLOW_ENLARGEMENT, AUTO_ORIENT, CROP_GRAVITY, CROP_HEIGHT, CROP_PERCENTAGE, CROP_WIDTH,
    CROP_X_OFFSET, CROP_Y_OFFSET, DURATION, END_PAGE, FLASH_VERSION, HEIGHT, INCLUDE_CONTENTS,
    MAINTAIN_ASPECT_RATIO, MAX_SOURCE_SIZE_K_BYTES, OFFSET, PAGE, RESIZE_HEIGHT,
    RESIZE_PERCENTAGE, RESIZE_WIDTH, START_PAGE, THUMBNAIL, TIMEOUT, WIDTH,
};

/// Renditions producing Flash get this player version unless one is set
/// explicitly. Kept for compatibility with definitions named `pdf`.
const DEFAULT_FLASH_VERSION: &str = "9";

static PAGED_OPTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from([PAGE, START_PAGE, END_PAGE]));

static CROP_OPTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        CROP_GRAVITY,
        CROP_WIDTH,
        CROP_HEIGHT,
        CROP_PERCENTAGE,
        CROP_X_OFFSET,
        CROP_Y_OFFSET,
    ])
});

static TEMPORAL_OPTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from([OFFSET, DURATION]));

static RESIZE_OPTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    HashSet::from([
        WIDTH,
        HEIGHT,
        THUMBNAIL,
        RESIZE_WIDTH,
        RESIZE_HEIGHT,
        RESIZE_PERCENTAGE,
        ALLOW_ENLARGEMENT,
        MAINTAIN_ASPECT_RATIO,
    ])
});

static IMAGE_OPTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    let mut names = HashSet::from([AUTO_ORIENT]);
    names.extend(PAGED_OPTIONS.iter());
    names.extend(CROP_OPTIONS.iter());
    names.extend(TEMPORAL_OPTIONS.iter());
    names.extend(RESIZE_OPTIONS.iter());
    names
});

static PDF_OPTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from([PAGE, WIDTH, HEIGHT, ALLOW_ENLARGEMENT, MAINTAIN_ASPECT_RATIO]));

static FLASH_OPTIONS: Lazy<HashSet<&'static str>> = Lazy::new(|| HashSet::from([FLASH_VERSION]));

static LIMIT_OPTIONS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from([TIMEOUT, MAX_SOURCE_SIZE_K_BYTES]));

/// Requested option names minus the limit vocabulary. Capability matching
/// ignores limits; they constrain a job, not what a transformer can do.
pub fn non_limit_option_names(
    options: &BTreeMap<String, String>,
) -> impl Iterator<Item = &str> {
    options
        .keys()
        .map(String::as_str)
        .filter(|name| !LIMIT_OPTIONS.contains(name))
}

#[derive(Debug, Error)]
pub enum OptionsError {
    #[error("rendition `{rendition}` uses options no parameter shape understands: {names:?}")]
    Unsupported {
        rendition: String,
        names: Vec<String>,
    },
    #[error("option `{option}` has invalid value `{value}`: expected {expected}")]
    InvalidValue {
        option: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResizeOptions {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub percentage: Option<f64>,
    pub thumbnail: bool,
    pub allow_enlargement: bool,
    pub maintain_aspect_ratio: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CropOptions {
    pub gravity: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub percentage_crop: bool,
    pub x_offset: Option<i32>,
    pub y_offset: Option<i32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PagedOptions {
    pub start_page: Option<u32>,
    pub end_page: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemporalOptions {
    pub offset: Option<String>,
    pub duration: Option<String>,
}

/// The structured parameter shape a transform job runs with.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformShape {
    /// No reformatting parameters; the engine converts media type only.
    Passthrough,
    Flash {
        version: String,
    },
    Image {
        resize: Option<ResizeOptions>,
        crop: Option<CropOptions>,
        paged: Option<PagedOptions>,
        temporal: Option<TemporalOptions>,
        auto_orient: bool,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformOptions {
    pub shape: TransformShape,
    /// Carry embedded resources (e.g. email attachments) into the output.
    pub include_embedded: bool,
    pub timeout_ms: Option<u64>,
    /// Recorded on the job so engine-side logs can name the rendition.
    pub use_name: String,
}

/// Classifies a flat option map into a [`TransformOptions`].
///
/// The shape is chosen by vocabulary containment over the non-limit names:
/// Flash when the Flash vocabulary covers them, otherwise Image when the
/// image or PDF vocabulary does, otherwise passthrough for an empty set.
/// Renditions named `pdf` always get the Flash shape.
pub fn convert(
    rendition_name: &str,
    options: &BTreeMap<String, String>,
) -> Result<TransformOptions, OptionsError> {
    let subclass: BTreeSet<&str> = non_limit_option_names(options)
        .filter(|name| *name != INCLUDE_CONTENTS)
        .collect();

    let shape = if rendition_name == "pdf" {
        TransformShape::Flash {
            version: options
                .get(FLASH_VERSION)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FLASH_VERSION.to_string()),
        }
    } else if !subclass.is_empty() && subclass.iter().all(|name| FLASH_OPTIONS.contains(name)) {
        TransformShape::Flash {
            version: options
                .get(FLASH_VERSION)
                .cloned()
                .unwrap_or_else(|| DEFAULT_FLASH_VERSION.to_string()),
        }
    } else if subclass.is_empty() {
        TransformShape::Passthrough
    } else if subclass.iter().all(|name| IMAGE_OPTIONS.contains(name))
        || subclass.iter().all(|name| PDF_OPTIONS.contains(name))
    {
        image_shape(options)?
    } else {
        let mut unmatched: Vec<String> = subclass
            .iter()
            .filter(|name| {
                !FLASH_OPTIONS.contains(*name)
                    && !IMAGE_OPTIONS.contains(*name)
                    && !PDF_OPTIONS.contains(*name)
            })
            .map(|name| name.to_string())
            .collect();
        if unmatched.is_empty() {
            // Every name is known somewhere but no single vocabulary covers
            // the whole set; report them all.
            unmatched = subclass.iter().map(|name| name.to_string()).collect();
        }
        return Err(OptionsError::Unsupported {
            rendition: rendition_name.to_string(),
            names: unmatched,
        });
    };

    Ok(TransformOptions {
        shape,
        include_embedded: parse_bool_option(options, INCLUDE_CONTENTS)?.unwrap_or(false),
        timeout_ms: parse_u64_option(options, TIMEOUT)?,
        use_name: rendition_name.to_string(),
    })
}

fn image_shape(options: &BTreeMap<String, String>) -> Result<TransformShape, OptionsError> {
    let has = |names: &HashSet<&'static str>| options.keys().any(|k| names.contains(k.as_str()));

    let resize = if has(&RESIZE_OPTIONS) {
        Some(ResizeOptions {
            width: parse_u32_option(options, RESIZE_WIDTH)?
                .or(parse_u32_option(options, WIDTH)?),
            height: parse_u32_option(options, RESIZE_HEIGHT)?
                .or(parse_u32_option(options, HEIGHT)?),
            percentage: parse_f64_option(options, RESIZE_PERCENTAGE)?,
            thumbnail: parse_bool_option(options, THUMBNAIL)?.unwrap_or(false),
            allow_enlargement: parse_bool_option(options, ALLOW_ENLARGEMENT)?.unwrap_or(false),
            maintain_aspect_ratio: parse_bool_option(options, MAINTAIN_ASPECT_RATIO)?
                .unwrap_or(false),
        })
    } else {
        None
    };

    let crop = if has(&CROP_OPTIONS) {
        Some(CropOptions {
            gravity: options.get(CROP_GRAVITY).cloned(),
            width: parse_u32_option(options, CROP_WIDTH)?,
            height: parse_u32_option(options, CROP_HEIGHT)?,
            percentage_crop: parse_bool_option(options, CROP_PERCENTAGE)?.unwrap_or(false),
            x_offset: parse_i32_option(options, CROP_X_OFFSET)?,
            y_offset: parse_i32_option(options, CROP_Y_OFFSET)?,
        })
    } else {
        None
    };

    let paged = if has(&PAGED_OPTIONS) {
        // A bare `page` renders exactly that page.
        let page = parse_u32_option(options, PAGE)?;
        Some(PagedOptions {
            start_page: parse_u32_option(options, START_PAGE)?.or(page),
            end_page: parse_u32_option(options, END_PAGE)?.or(page),
        })
    } else {
        None
    };

    let temporal = if has(&TEMPORAL_OPTIONS) {
        Some(TemporalOptions {
            offset: options.get(OFFSET).cloned(),
            duration: options.get(DURATION).cloned(),
        })
    } else {
        None
    };

    Ok(TransformShape::Image {
        resize,
        crop,
        paged,
        temporal,
        auto_orient: parse_bool_option(options, AUTO_ORIENT)?.unwrap_or(false),
    })
}

fn parse_u32_option(
    options: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<Option<u32>, OptionsError> {
    options
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| OptionsError::InvalidValue {
                option: name,
                value: value.clone(),
                expected: "a non-negative integer",
            })
        })
        .transpose()
}

fn parse_i32_option(
    options: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<Option<i32>, OptionsError> {
    options
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| OptionsError::InvalidValue {
                option: name,
                value: value.clone(),
                expected: "an integer",
            })
        })
        .transpose()
}

fn parse_u64_option(
    options: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<Option<u64>, OptionsError> {
    options
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| OptionsError::InvalidValue {
                option: name,
                value: value.clone(),
                expected: "a non-negative integer",
            })
        })
        .transpose()
}

fn parse_f64_option(
    options: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<Option<f64>, OptionsError> {
    options
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| OptionsError::InvalidValue {
                option: name,
                value: value.clone(),
                expected: "a number",
            })
        })
        .transpose()
}

fn parse_bool_option(
    options: &BTreeMap<String, String>,
    name: &'static str,
) -> Result<Option<bool>, OptionsError> {
    options
        .get(name)
        .map(|value| {
            value.parse().map_err(|_| OptionsError::InvalidValue {
                option: name,
                value: value.clone(),
                expected: "`true` or `false`",
            })
        })
        .transpose()
}
