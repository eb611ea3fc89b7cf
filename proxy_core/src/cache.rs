//! Content-addressed store of generated audio.
//!
//! Every entry is a flat `{prefix}_{fingerprint}.wav` file in the cache
//! directory. Entries are written once by the generation worker and never
//! modified or evicted afterwards.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::params::{Fingerprint, RequestParams, PROMPT_AUDIO, TEXT, TEXT_FILE};

/// Characters of text kept in a cache filename prefix.
pub const PREFIX_CHARS: usize = 8;
/// Prefix used when no readable hint exists.
pub const FALLBACK_PREFIX: &str = "tts";

#[derive(Debug, Clone)]
pub struct ResultCache {
    dir: PathBuf,
    text_file_dir: PathBuf,
}

impl ResultCache {
    /// Open the cache rooted at `dir`, creating it if needed. `text_file_dir`
    /// is the local directory `text_file` parameters are read from when
    /// deriving a prefix.
    pub fn new(dir: impl Into<PathBuf>, text_file_dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            text_file_dir: text_file_dir.into(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Derive the cache path for a parameter set without touching the entry.
    pub fn path_for(&self, params: &RequestParams, fingerprint: &Fingerprint) -> PathBuf {
        let filename = format!("{}_{}.wav", self.prefix_for(params), fingerprint);
        debug!(%filename, "derived cache filename");
        self.dir.join(filename)
    }

    pub fn exists(&self, params: &RequestParams, fingerprint: &Fingerprint) -> bool {
        let path = self.path_for(params, fingerprint);
        let exists = path.is_file();
        if exists {
            info!(path = %path.display(), "cache entry found");
        } else {
            debug!(path = %path.display(), "cache entry missing");
        }
        exists
    }

    /// Human-readable part of the filename, taken from the dominant input.
    pub fn prefix_for(&self, params: &RequestParams) -> String {
        let prefix = if let Some(audio) = params.non_empty(PROMPT_AUDIO) {
            audio_prefix(audio)
        } else if let Some(name) = params.non_empty(TEXT_FILE) {
            self.text_file_prefix(name).unwrap_or_default()
        } else if let Some(text) = params.non_empty(TEXT) {
            text_prefix(text)
        } else {
            String::new()
        };

        let prefix = sanitize(&prefix);
        if prefix.is_empty() {
            FALLBACK_PREFIX.to_string()
        } else {
            prefix
        }
    }

    fn text_file_prefix(&self, name: &str) -> Option<String> {
        let mut path = self.text_file_dir.join(name);
        if !path.is_file() && Path::new(name).extension().is_none() {
            path = self.text_file_dir.join(format!("{name}.txt"));
        }
        match fs::read_to_string(&path) {
            Ok(content) => Some(text_prefix(content.trim())),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read text file for cache prefix");
                None
            }
        }
    }
}

fn audio_prefix(audio: &str) -> String {
    let path = Path::new(audio);
    path.file_stem()
        .map(|stem| stem.to_string_lossy().replace('.', "_"))
        .unwrap_or_default()
}

/// First characters of `text`, counted as characters rather than bytes.
fn text_prefix(text: &str) -> String {
    text.chars().take(PREFIX_CHARS).collect()
}

/// Keep the cache flat: no separators or NULs in a filename prefix.
fn sanitize(prefix: &str) -> String {
    prefix
        .chars()
        .map(|c| match c {
            '/' | '\\' | '\0' => '_',
            c => c,
        })
        .collect()
}
