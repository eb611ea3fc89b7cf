//! Mapping logical input names to files that exist on the remote host.

use std::path::Path;

use tracing::{debug, info};

use super::command::shell_quote;
use super::RemoteShell;
use crate::error::Result;

/// Resolves names like `aria` or `aria.wav` against a remote directory,
/// trying each allowed extension in order.
pub struct RemoteFileResolver<'a> {
    shell: &'a mut dyn RemoteShell,
    workdir: &'a str,
}

impl<'a> RemoteFileResolver<'a> {
    pub fn new(shell: &'a mut dyn RemoteShell, workdir: &'a str) -> Self {
        Self { shell, workdir }
    }

    /// Returns the path relative to the working directory,
    /// `{remote_dir}/{file}`, of the first candidate that exists.
    pub async fn resolve(
        &mut self,
        logical_name: &str,
        remote_dir: &str,
        extensions: &[String],
    ) -> Result<Option<String>> {
        let basename = Path::new(logical_name)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| logical_name.to_string());

        for candidate in candidates(&basename, extensions) {
            if self.exists(remote_dir, &candidate).await? {
                let resolved = format!("{}/{}", remote_dir.trim_end_matches('/'), candidate);
                info!(%logical_name, %resolved, "resolved remote file");
                return Ok(Some(resolved));
            }
        }
        debug!(%logical_name, %remote_dir, ?extensions, "no remote candidate exists");
        Ok(None)
    }

    async fn exists(&mut self, remote_dir: &str, file: &str) -> Result<bool> {
        let absolute = format!(
            "{}/{}/{}",
            self.workdir.trim_end_matches('/'),
            remote_dir.trim_matches('/'),
            file
        );
        let output = self
            .shell
            .exec(
                &format!("test -f {} && echo exists || echo missing", shell_quote(&absolute)),
                false,
            )
            .await?;
        Ok(output.stdout.trim() == "exists")
    }
}

/// Names to probe: the exact name when its extension is allowed, then the
/// stem with every allowed extension.
fn candidates(basename: &str, extensions: &[String]) -> Vec<String> {
    let path = Path::new(basename);
    let extension = path
        .extension()
        .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()));
    let allowed = |ext: &str| extensions.iter().any(|e| e.eq_ignore_ascii_case(ext));

    let mut names = Vec::with_capacity(extensions.len() + 1);
    let stem = match &extension {
        Some(ext) if allowed(ext) => {
            names.push(basename.to_string());
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| basename.to_string())
        }
        _ => basename.to_string(),
    };
    for ext in extensions {
        let name = format!("{stem}{ext}");
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::fake::FakeShell;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_candidates_order() {
        let allowed = exts(&[".wav", ".mp3", ".ogg"]);
        assert_eq!(candidates("aria", &allowed), vec!["aria.wav", "aria.mp3", "aria.ogg"]);
        assert_eq!(candidates("aria.mp3", &allowed), vec!["aria.mp3", "aria.wav", "aria.ogg"]);
        // a disallowed extension is part of the stem
        assert_eq!(
            candidates("take.v2", &allowed),
            vec!["take.v2.wav", "take.v2.mp3", "take.v2.ogg"]
        );
    }

    #[tokio::test]
    async fn test_resolve_tries_extensions_in_order() {
        let mut shell = FakeShell::new();
        shell.add_remote_file("/srv/tts/prompt_audio/aria.mp3");
        shell.add_remote_file("/srv/tts/prompt_audio/aria.ogg");

        let mut resolver = RemoteFileResolver::new(&mut shell, "/srv/tts");
        let resolved = resolver
            .resolve("aria", "prompt_audio", &exts(&[".wav", ".mp3", ".ogg"]))
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("prompt_audio/aria.mp3"));
    }

    #[tokio::test]
    async fn test_resolve_uses_basename_only() {
        let mut shell = FakeShell::new();
        shell.add_remote_file("/srv/tts/prompt_audio/aria.wav");

        let mut resolver = RemoteFileResolver::new(&mut shell, "/srv/tts");
        let resolved = resolver
            .resolve("../../etc/aria.wav", "prompt_audio", &exts(&[".wav"]))
            .await
            .unwrap();
        assert_eq!(resolved.as_deref(), Some("prompt_audio/aria.wav"));
    }

    #[tokio::test]
    async fn test_resolve_miss() {
        let mut shell = FakeShell::new();
        let mut resolver = RemoteFileResolver::new(&mut shell, "/srv/tts");
        let resolved = resolver
            .resolve("story", "text_file", &exts(&[".txt"]))
            .await
            .unwrap();
        assert_eq!(resolved, None);
        assert_eq!(shell.state().commands.len(), 1);
    }
}
