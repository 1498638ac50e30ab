//! Content-addressed cache for binary payloads pulled out of rows.
//!
//! Files land at `{root}/.cache/sql-node-source/tmp-{digest}.{ext}`, so the
//! same bytes map to the same path across rows and across runs.

use anyhow::{Context, Result};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::schema::content_digest;

pub const CACHE_DIR: &str = ".cache";
pub const PLUGIN_DIR: &str = "sql-node-source";

/// A payload persisted in the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedFile {
    pub path: PathBuf,
    pub digest: String,
    pub size: u64,
}

impl CachedFile {
    /// Absolute path with forward slashes on every platform.
    pub fn absolute_path(&self) -> String {
        self.path.to_string_lossy().replace('\\', "/")
    }
}

/// Media type sniffed from an image's magic bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageType {
    pub extension: &'static str,
    pub mime: &'static str,
}

#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            dir: root.as_ref().join(CACHE_DIR).join(PLUGIN_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `data` under its digest. Existing identical files are reused.
    pub async fn store(&self, data: &[u8], extension: &str) -> Result<CachedFile> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create cache dir {:?}", self.dir))?;

        let digest = content_digest(data);
        let path = self.dir.join(format!("tmp-{}.{}", digest, extension));

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!("FileCache: reusing {:?}", path);
        } else {
            tokio::fs::write(&path, data)
                .await
                .with_context(|| format!("Failed to write {:?}", path))?;
            debug!("FileCache: stored {:?} ({} bytes)", path, data.len());
        }

        let path = tokio::fs::canonicalize(&path).await.unwrap_or(path);
        Ok(CachedFile {
            path,
            digest,
            size: data.len() as u64,
        })
    }
}

/// Detect an image type from magic bytes. `None` for anything unrecognized.
pub fn sniff_image(data: &[u8]) -> Option<ImageType> {
    let format = image::guess_format(data).ok()?;
    let (extension, mime) = match format {
        ImageFormat::Png => ("png", "image/png"),
        ImageFormat::Jpeg => ("jpg", "image/jpeg"),
        ImageFormat::Gif => ("gif", "image/gif"),
        ImageFormat::WebP => ("webp", "image/webp"),
        ImageFormat::Bmp => ("bmp", "image/bmp"),
        ImageFormat::Ico => ("ico", "image/x-icon"),
        ImageFormat::Tiff => ("tif", "image/tiff"),
        ImageFormat::Avif => ("avif", "image/avif"),
        other => (
            other.extensions_str().first().copied().unwrap_or("bin"),
            "application/octet-stream",
        ),
    };
    Some(ImageType { extension, mime })
}

/// Human-readable size in decimal units (`1.02 kB`).
pub fn pretty_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "kB", "MB", "GB", "TB"];
    if bytes < 1000 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    // Three significant digits, trailing zeros dropped.
    let decimals = if value >= 100.0 {
        0
    } else if value >= 10.0 {
        1
    } else {
        2
    };
    let formatted = format!("{:.*}", decimals, value);
    let trimmed = if formatted.contains('.') {
        formatted.trim_end_matches('0').trim_end_matches('.')
    } else {
        formatted.as_str()
    };
    format!("{} {}", trimmed, UNITS[unit])
}
