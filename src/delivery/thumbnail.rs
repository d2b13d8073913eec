//! Thumbnail sizes and generators.

use std::fmt;

use crate::{Result, StowageError};

/// Largest accepted thumbnail edge in pixels.
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

/// Requested thumbnail edge length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThumbnailSize(u32);

impl ThumbnailSize {
    pub const SMALL: Self = Self(64);
    pub const MEDIUM: Self = Self(256);
    pub const LARGE: Self = Self(1024);

    /// Parse a size hint: `small`, `medium`, `large`, or a pixel count.
    ///
    /// A missing or blank hint means medium.
    pub fn parse(hint: Option<&str>) -> Result<Self> {
        let hint = match hint.map(str::trim) {
            None | Some("") => return Ok(Self::MEDIUM),
            Some(hint) => hint,
        };

        match hint.to_ascii_lowercase().as_str() {
            "s" | "small" => Ok(Self::SMALL),
            "m" | "medium" => Ok(Self::MEDIUM),
            "l" | "large" => Ok(Self::LARGE),
            other => match other.parse::<u32>() {
                Ok(px) if (1..=MAX_THUMBNAIL_SIZE).contains(&px) => Ok(Self(px)),
                _ => Err(StowageError::Validation(format!(
                    "invalid thumbnail size '{hint}'"
                ))),
            },
        }
    }

    pub fn pixels(&self) -> u32 {
        self.0
    }
}

impl Default for ThumbnailSize {
    fn default() -> Self {
        Self::MEDIUM
    }
}

impl fmt::Display for ThumbnailSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A rendered thumbnail.
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Produces thumbnails from stored content.
pub trait ThumbnailGenerator: Send + Sync {
    fn generate(&self, content: &[u8], mime_type: &str, size: ThumbnailSize) -> Result<Thumbnail>;
}

/// Serves images as their own thumbnail, unscaled.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughThumbnailer;

impl ThumbnailGenerator for PassthroughThumbnailer {
    fn generate(&self, content: &[u8], mime_type: &str, _size: ThumbnailSize) -> Result<Thumbnail> {
        if !mime_type.starts_with("image/") {
            return Err(StowageError::Validation(format!(
                "no thumbnail available for {mime_type}"
            )));
        }
        Ok(Thumbnail {
            mime_type: mime_type.to_string(),
            bytes: content.to_vec(),
        })
    }
}
