//! Filling in `prompt_text` from the local prompt-text directory.

use std::path::Path;

use proxy_core::params::{PROMPT_AUDIO, PROMPT_TEXT};
use proxy_core::RequestParams;
use tracing::{error, info, warn};

/// When `prompt_audio` is set and `prompt_text` is missing, use the content
/// of the file whose stem matches the audio's stem. When `prompt_text`
/// names a `.txt` file, replace it with that file's content. Missing
/// directories or files leave the parameters unchanged.
pub async fn enrich_prompt_text(params: &mut RequestParams, prompt_text_dir: &Path) {
    let Some(audio) = params.get(PROMPT_AUDIO).map(str::to_string) else {
        return;
    };
    if !tokio::fs::metadata(prompt_text_dir)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false)
    {
        error!(dir = %prompt_text_dir.display(), "prompt text directory does not exist");
        return;
    }

    match params.get(PROMPT_TEXT).map(str::to_string) {
        None => {
            let stem = file_stem(&audio);
            match find_by_stem(prompt_text_dir, &stem).await {
                Some((name, content)) => {
                    info!(file = %name, prompt_text = %content, "loaded prompt text from file");
                    params.insert(PROMPT_TEXT, content);
                }
                None => info!(%stem, "no matching prompt text file"),
            }
        }
        Some(value) if value.to_lowercase().ends_with(".txt") => {
            // only the file name; never leave the directory
            let path = prompt_text_dir.join(Path::new(&value).file_name().unwrap_or_default());
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let content = content.trim().to_string();
                    info!(file = %value, prompt_text = %content, "loaded prompt text from file");
                    params.insert(PROMPT_TEXT, content);
                }
                Err(e) => error!(path = %path.display(), error = %e, "could not read prompt text file"),
            }
        }
        Some(_) => {}
    }
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

async fn find_by_stem(dir: &Path, stem: &str) -> Option<(String, String)> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "could not list prompt text directory");
            return None;
        }
    };

    let mut candidates = Vec::new();
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name().to_string_lossy().into_owned();
        if file_stem(&name) == stem {
            candidates.push(entry.path());
        }
    }
    candidates.sort();

    for path in candidates {
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                return Some((name, content.trim().to_string()));
            }
            Err(e) => warn!(path = %path.display(), error = %e, "could not read prompt text file"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn params(items: &[(&str, &str)]) -> RequestParams {
        items.iter().copied().collect()
    }

    #[tokio::test]
    async fn test_prompt_text_found_by_audio_stem() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aria.txt"), "Hello from Aria.\n").unwrap();

        let mut p = params(&[("prompt_audio", "aria.wav"), ("text", "hi")]);
        enrich_prompt_text(&mut p, dir.path()).await;
        assert_eq!(p.get("prompt_text"), Some("Hello from Aria."));
    }

    #[tokio::test]
    async fn test_prompt_text_file_name_is_replaced_by_content() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("line.txt"), "  spoken line ").unwrap();

        let mut p = params(&[("prompt_audio", "aria"), ("prompt_text", "line.txt")]);
        enrich_prompt_text(&mut p, dir.path()).await;
        assert_eq!(p.get("prompt_text"), Some("spoken line"));
    }

    #[tokio::test]
    async fn test_literal_prompt_text_is_kept() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("aria.txt"), "from file").unwrap();

        let mut p = params(&[("prompt_audio", "aria"), ("prompt_text", "typed by caller")]);
        enrich_prompt_text(&mut p, dir.path()).await;
        assert_eq!(p.get("prompt_text"), Some("typed by caller"));
    }

    #[tokio::test]
    async fn test_missing_directory_leaves_params_unchanged() {
        let dir = TempDir::new().unwrap();
        let mut p = params(&[("prompt_audio", "aria"), ("text", "hi")]);
        let before = p.clone();
        enrich_prompt_text(&mut p, &dir.path().join("absent")).await;
        assert_eq!(p, before);
    }

    #[tokio::test]
    async fn test_no_prompt_audio_means_no_lookup() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hi.txt"), "nope").unwrap();
        let mut p = params(&[("text", "hi"), ("gender", "male")]);
        enrich_prompt_text(&mut p, dir.path()).await;
        assert!(!p.contains("prompt_text"));
    }
}
