//! Local cache of seat-map image bytes, addressed by `(airline_code, image_filename)`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::error::FetchError;
use crate::fetch::FetchClient;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "svg"];
const MAX_STEM: usize = 48;

#[derive(Debug, Error)]
pub enum ImageCacheError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("image cache I/O: {0}")]
    Io(#[from] io::Error),
    #[error("empty image body from {0}")]
    Empty(String),
}

/// `{AIRLINE}_{MODEL}_{stem}_{hash8}.{ext}`. The hash covers the URL path
/// only, so resolution query strings do not change the identity.
pub fn image_filename(airline_code: &str, aircraft_model: &str, url: &Url) -> String {
    let last = url
        .path_segments()
        .and_then(|mut segs| segs.next_back())
        .unwrap_or("");
    let (raw_stem, raw_ext) = match last.rsplit_once('.') {
        Some((s, e)) => (s, e.to_ascii_lowercase()),
        None => (last, String::new()),
    };
    let ext = if IMAGE_EXTENSIONS.contains(&raw_ext.as_str()) {
        raw_ext
    } else {
        "jpg".to_string()
    };

    let stem: String = raw_stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
        .take(MAX_STEM)
        .collect();
    let stem = stem.trim_matches('-');
    let stem = if stem.is_empty() { "seatmap" } else { stem };

    let digest = Sha256::digest(url.path().as_bytes());
    let hash8: String = digest.iter().take(4).map(|b| format!("{b:02x}")).collect();

    format!(
        "{}_{}_{}_{}.{}",
        sanitize(airline_code),
        sanitize(aircraft_model),
        stem,
        hash8,
        ext
    )
}

fn sanitize(part: &str) -> String {
    part.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_uppercase()
}

#[derive(Debug, Clone)]
pub struct ImageCache {
    root: PathBuf,
}

impl ImageCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, airline_code: &str, filename: &str) -> PathBuf {
        self.root.join(sanitize(airline_code)).join(filename)
    }

    /// Size of the cached file, `None` when absent.
    pub fn stored_size(&self, airline_code: &str, filename: &str) -> Option<u64> {
        fs::metadata(self.path_for(airline_code, filename))
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }

    /// Write atomically: readers see the old file or the new one, never half.
    pub fn save(&self, airline_code: &str, filename: &str, bytes: &[u8]) -> Result<u64, ImageCacheError> {
        let path = self.path_for(airline_code, filename);
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        let tmp = path.with_extension("part");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        Ok(bytes.len() as u64)
    }

    pub fn load(&self, airline_code: &str, filename: &str) -> Result<Vec<u8>, ImageCacheError> {
        Ok(fs::read(self.path_for(airline_code, filename))?)
    }

    /// Fetch `url` through the shared client and store it. Returns the byte count.
    pub async fn download(
        &self,
        client: &FetchClient,
        airline_code: &str,
        filename: &str,
        url: &Url,
    ) -> Result<u64, ImageCacheError> {
        let resp = client.fetch(url.as_str()).await?;
        if resp.body.is_empty() {
            return Err(ImageCacheError::Empty(url.to_string()));
        }
        let size = self.save(airline_code, filename, &resp.body)?;
        debug!(airline = airline_code, filename, size, "image cached");
        Ok(size)
    }
}
