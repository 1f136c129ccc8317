// src/config/raw.rs

//! Raw `turbo.json` deserialization.
//!
//! This only maps the JSONC file onto serde structs; normalization and
//! semantic validation live in [`super::pipeline`].

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::errors::ConfigError;
use crate::paths::AbsPath;

pub const CONFIG_FILE: &str = "turbo.json";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawRootConfig {
    /// Editors add this; it carries no configuration.
    #[serde(rename = "$schema", default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub global_dependencies: Vec<String>,
    #[serde(default)]
    pub global_env: Vec<String>,
    // None means "not configured", which is meaningful for env-mode
    // inference; [] is an explicit empty list.
    #[serde(default)]
    pub global_pass_through_env: Option<Vec<String>>,
    #[serde(default)]
    pub global_dot_env: Option<Vec<String>>,
    #[serde(default)]
    pub pipeline: BTreeMap<String, RawTaskDefinition>,
    #[serde(default)]
    pub remote_cache: Option<RemoteCacheOptions>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawTaskDefinition {
    #[serde(default)]
    pub outputs: Option<Vec<String>>,
    #[serde(default)]
    pub cache: Option<bool>,
    #[serde(default)]
    pub depends_on: Option<Vec<String>>,
    #[serde(default)]
    pub inputs: Option<Vec<String>>,
    #[serde(default)]
    pub output_mode: Option<super::OutputLogsMode>,
    #[serde(default)]
    pub env: Option<Vec<String>>,
    #[serde(default)]
    pub pass_through_env: Option<Vec<String>>,
    #[serde(default)]
    pub dot_env: Option<Vec<String>>,
    #[serde(default)]
    pub persistent: Option<bool>,
}

/// `.remoteCache` in `turbo.json`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCacheOptions {
    #[serde(default)]
    pub team_id: Option<String>,
    #[serde(default)]
    pub signature: bool,
}

/// Per-workspace `turbo.json`. Workspaces may only adjust a restricted set
/// of keys; the full shape is accepted here and policed during the merge.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RawWorkspaceConfig {
    #[serde(rename = "$schema", default)]
    pub schema: Option<String>,
    /// Accepted for compatibility; the root config is always the base.
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub pipeline: BTreeMap<String, RawTaskDefinition>,
}

/// Strip `//` and `/* */` comments from JSONC, preserving string literals.
/// Comment bytes are replaced with spaces so serde error offsets still point
/// at the right spot.
pub fn strip_jsonc_comments(source: &str) -> String {
    let bytes = source.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    let mut in_string = false;

    while i < bytes.len() {
        let b = bytes[i];
        if in_string {
            out.push(b);
            if b == b'\\' && i + 1 < bytes.len() {
                out.push(bytes[i + 1]);
                i += 2;
                continue;
            }
            if b == b'"' {
                in_string = false;
            }
            i += 1;
        } else if b == b'"' {
            in_string = true;
            out.push(b);
            i += 1;
        } else if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'/' {
            while i < bytes.len() && bytes[i] != b'\n' {
                out.push(b' ');
                i += 1;
            }
        } else if b == b'/' && i + 1 < bytes.len() && bytes[i + 1] == b'*' {
            while i < bytes.len() && !(bytes[i] == b'*' && i + 1 < bytes.len() && bytes[i + 1] == b'/') {
                out.push(if bytes[i] == b'\n' { b'\n' } else { b' ' });
                i += 1;
            }
            if i < bytes.len() {
                out.push(b' ');
                out.push(b' ');
                i += 2;
            }
        } else {
            out.push(b);
            i += 1;
        }
    }

    String::from_utf8(out).expect("comment stripping preserves UTF-8")
}

fn read_jsonc<T: serde::de::DeserializeOwned>(path: &AbsPath) -> Result<T, ConfigError> {
    let contents = std::fs::read_to_string(path.as_std_path()).map_err(|e| ConfigError::Io {
        path: path.to_string(),
        source: e,
    })?;
    serde_json::from_str(&strip_jsonc_comments(&contents)).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        source: e,
    })
}

/// Load the root `turbo.json`.
pub fn load_root_config(repo_root: &AbsPath) -> Result<RawRootConfig, ConfigError> {
    read_jsonc(&repo_root.join(CONFIG_FILE))
}

/// Load a workspace-level `turbo.json` override, if one exists.
pub fn load_workspace_overrides(
    package_dir: &AbsPath,
) -> Result<Option<RawWorkspaceConfig>, ConfigError> {
    let path = package_dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    read_jsonc(&path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_line_and_block_comments() {
        let src = r#"{
  // line comment
  "pipeline": { /* block */ "build": {} }
}"#;
        let stripped = strip_jsonc_comments(src);
        let parsed: RawRootConfig = serde_json::from_str(&stripped).unwrap();
        assert!(parsed.pipeline.contains_key("build"));
    }

    #[test]
    fn preserves_slashes_inside_strings() {
        let src = r#"{"pipeline": {"//#build": {"outputs": ["dist/**"]}}}"#;
        let stripped = strip_jsonc_comments(src);
        let parsed: RawRootConfig = serde_json::from_str(&stripped).unwrap();
        assert!(parsed.pipeline.contains_key("//#build"));
    }

    #[test]
    fn null_and_empty_pass_through_are_distinct() {
        let with_null: RawRootConfig =
            serde_json::from_str(r#"{"globalPassThroughEnv": null, "pipeline": {}}"#).unwrap();
        let with_empty: RawRootConfig =
            serde_json::from_str(r#"{"globalPassThroughEnv": [], "pipeline": {}}"#).unwrap();
        assert!(with_null.global_pass_through_env.is_none());
        assert_eq!(with_empty.global_pass_through_env, Some(vec![]));
    }
}
