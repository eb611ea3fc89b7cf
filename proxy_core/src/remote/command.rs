//! Remote command construction and output interpretation.

use crate::params::RequestParams;

/// Marker the remote program prints once the audio file is written.
pub const GENERATED_MARKER: &str = "Generated audio file:";

/// A generation invocation kept as an argument vector until it is rendered
/// for the remote shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationCommand {
    workdir: String,
    interpreter: String,
    entrypoint: String,
    args: Vec<(String, String)>,
}

impl GenerationCommand {
    pub fn new(
        workdir: impl Into<String>,
        interpreter: impl Into<String>,
        entrypoint: impl Into<String>,
        params: &RequestParams,
    ) -> Self {
        let args = params
            .iter()
            .filter(|(key, value)| !value.is_empty() && is_flag_name(key))
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        Self {
            workdir: workdir.into(),
            interpreter: interpreter.into(),
            entrypoint: entrypoint.into(),
            args,
        }
    }

    pub fn args(&self) -> &[(String, String)] {
        &self.args
    }

    /// Render as a single shell line. Every value is single-quoted; the
    /// entrypoint comes from operator configuration and is left verbatim so
    /// it may carry its own fixed arguments.
    pub fn render(&self) -> String {
        let mut cmd = format!(
            "cd {}; {} {}",
            shell_quote(&self.workdir),
            shell_quote(&self.interpreter),
            self.entrypoint
        );
        for (key, value) in &self.args {
            cmd.push_str(" --");
            cmd.push_str(key);
            cmd.push(' ');
            cmd.push_str(&shell_quote(value));
        }
        cmd
    }
}

fn is_flag_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// POSIX single-quote escaping.
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('\'');
    for c in value.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}

/// Path reported by the first `Generated audio file:` line, if any.
pub fn parse_generated_path(stdout: &str) -> Option<String> {
    stdout.lines().find_map(|line| {
        let idx = line.find(GENERATED_MARKER)?;
        let path = line[idx + GENERATED_MARKER.len()..].trim();
        (!path.is_empty()).then(|| path.to_string())
    })
}

/// Absolute remote location of an artifact reported relative to `workdir`.
pub fn remote_artifact_path(workdir: &str, reported: &str) -> String {
    if reported.starts_with('/') {
        reported.to_string()
    } else {
        format!("{}/{}", workdir.trim_end_matches('/'), reported)
    }
}
