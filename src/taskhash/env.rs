// src/taskhash/env.rs

//! Environment variable handling for hashing and child execution.
//!
//! Values declared in `env`/`globalEnv` participate in fingerprints by
//! SHA-256 digest only; raw values never leave the process environment.
//! Pass-through variables are forwarded to children without being hashed,
//! and only their *names* contribute under strict mode.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::hashing;

/// Policy governing what the child process inherits and what gets hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvMode {
    #[default]
    Infer,
    Loose,
    Strict,
}

impl EnvMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvMode::Infer => "infer",
            EnvMode::Loose => "loose",
            EnvMode::Strict => "strict",
        }
    }
}

impl std::str::FromStr for EnvMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "infer" => Ok(EnvMode::Infer),
            "loose" => Ok(EnvMode::Loose),
            "strict" => Ok(EnvMode::Strict),
            other => Err(format!("invalid env mode: {other}")),
        }
    }
}

/// Resolve `infer` against the global pass-through configuration: any
/// configured list (even empty) promotes the whole run to strict.
pub fn resolve_global_mode(mode: EnvMode, global_pass_through: Option<&Vec<String>>) -> EnvMode {
    match mode {
        EnvMode::Infer if global_pass_through.is_some() => EnvMode::Strict,
        other => other,
    }
}

/// Resolve a still-inferring mode for one task against its own pass-through
/// list.
pub fn resolve_task_mode(global_mode: EnvMode, task_pass_through: Option<&Vec<String>>) -> EnvMode {
    match global_mode {
        EnvMode::Infer => {
            if task_pass_through.is_some() {
                EnvMode::Strict
            } else {
                EnvMode::Loose
            }
        }
        other => other,
    }
}

/// Name → raw value, sorted.
pub type EnvVarMap = BTreeMap<String, String>;

/// Capture the named variables from the live environment. Unset variables
/// are simply absent, which distinguishes "unset" from "empty".
pub fn capture(names: &[String]) -> EnvVarMap {
    let mut map = EnvVarMap::new();
    for name in names {
        if let Ok(value) = std::env::var(name) {
            map.insert(name.clone(), value);
        }
    }
    map
}

/// Expand `PREFIX_*` wildcard patterns against the live environment,
/// returning matching variable names. Non-wildcard entries pass through
/// unchanged.
pub fn expand_wildcards(patterns: &[String]) -> Vec<String> {
    let mut names = Vec::new();
    for pattern in patterns {
        match pattern.strip_suffix('*') {
            Some(prefix) => {
                for (name, _) in std::env::vars() {
                    if name.starts_with(prefix) {
                        names.push(name);
                    }
                }
            }
            None => names.push(pattern.clone()),
        }
    }
    names.sort();
    names.dedup();
    names
}

/// Digest every value: name → sha256(value). This is the form that enters
/// fingerprints and summaries.
pub fn to_hashable_pairs(map: &EnvVarMap) -> BTreeMap<String, String> {
    map.iter()
        .map(|(name, value)| (name.clone(), hashing::hash_value(value)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_promotes_to_strict_with_any_pass_through() {
        let empty: Vec<String> = Vec::new();
        assert_eq!(
            resolve_global_mode(EnvMode::Infer, Some(&empty)),
            EnvMode::Strict
        );
        assert_eq!(resolve_global_mode(EnvMode::Infer, None), EnvMode::Infer);
        assert_eq!(
            resolve_task_mode(EnvMode::Infer, Some(&empty)),
            EnvMode::Strict
        );
        assert_eq!(resolve_task_mode(EnvMode::Infer, None), EnvMode::Loose);
    }

    #[test]
    fn explicit_modes_are_untouched() {
        let list = vec!["FOO".to_string()];
        assert_eq!(
            resolve_global_mode(EnvMode::Loose, Some(&list)),
            EnvMode::Loose
        );
        assert_eq!(
            resolve_task_mode(EnvMode::Strict, None),
            EnvMode::Strict
        );
    }

    #[test]
    fn capture_skips_unset_vars() {
        std::env::set_var("MONORUN_TEST_ENV_SET", "yes");
        let map = capture(&[
            "MONORUN_TEST_ENV_SET".to_string(),
            "MONORUN_TEST_ENV_UNSET_XYZ".to_string(),
        ]);
        assert_eq!(map.len(), 1);
        assert_eq!(map["MONORUN_TEST_ENV_SET"], "yes");
    }

    #[test]
    fn hashable_pairs_redact_values() {
        let mut map = EnvVarMap::new();
        map.insert("TOKEN".to_string(), "hunter2".to_string());
        let pairs = to_hashable_pairs(&map);
        assert_ne!(pairs["TOKEN"], "hunter2");
        assert_eq!(pairs["TOKEN"].len(), 64);
    }
}
