// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::debug;

use crate::Config;

/// Ordered list of config file locations searched from lowest to highest priority.
/// Later files override earlier ones.
fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // 1. System-wide default
    paths.push(PathBuf::from("/etc/taskloom/config.yaml"));
    paths.push(PathBuf::from("/etc/taskloom/config.yml"));

    // 2. XDG / home
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(".config/taskloom/config.yaml"));
        paths.push(home.join(".config/taskloom/config.yml"));
    }
    if let Some(cfg) = dirs::config_dir() {
        paths.push(cfg.join("taskloom/config.yaml"));
        paths.push(cfg.join("taskloom/config.yml"));
    }

    // 3. Workspace-local — matches the `.agents.yaml` the `init` command
    // scaffolds under the `.agents/` persisted-state convention.
    paths.push(PathBuf::from(".agents/config.yaml"));
    paths.push(PathBuf::from(".agents/config.yml"));
    paths.push(PathBuf::from(".agents.yaml"));
    paths.push(PathBuf::from(".agents.yml"));

    paths
}

/// Load configuration by merging all discovered YAML files.
/// The `extra` argument may provide an explicit path (e.g. `--config` CLI flag).
pub fn load(extra: Option<&Path>) -> anyhow::Result<Config> {
    let mut merged = serde_yaml::Value::Mapping(serde_yaml::Mapping::new());

    for path in config_search_paths() {
        if path.is_file() {
            debug!(path = %path.display(), "loading config layer");
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let layer: serde_yaml::Value = serde_yaml::from_str(&text)
                .with_context(|| format!("parsing {}", path.display()))?;
            merge_yaml(&mut merged, layer);
        }
    }

    if let Some(p) = extra {
        debug!(path = %p.display(), "loading explicit config");
        let text =
            std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
        let layer: serde_yaml::Value =
            serde_yaml::from_str(&text).with_context(|| format!("parsing {}", p.display()))?;
        merge_yaml(&mut merged, layer);
    }

    // Deserialize the merged YAML value into Config, falling back to defaults
    // when the merged value is empty (no config files found).
    let mut config: Config = if matches!(merged, serde_yaml::Value::Mapping(ref m) if m.is_empty()) {
        Config::default()
    } else {
        serde_yaml::from_value(merged).unwrap_or_default()
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Apply the `AGENTS_*` environment overrides on top of whatever the YAML
/// layers produced. Environment wins over every file.
fn apply_env_overrides(config: &mut Config) {
    if let Ok(provider) = std::env::var("AGENTS_PROVIDER") {
        if !provider.is_empty() {
            debug!(provider = %provider, "AGENTS_PROVIDER override");
            config.model.provider = provider;
        }
    }
    if let Ok(key) = std::env::var("AGENTS_API_KEY") {
        if !key.is_empty() {
            debug!("AGENTS_API_KEY override");
            config.model.api_key = Some(key);
        }
    }
    if let Ok(model) = std::env::var("AGENTS_MODEL") {
        if !model.is_empty() {
            debug!(model = %model, "AGENTS_MODEL override");
            config.model.name = model;
        }
    }
    if let Ok(endpoint) = std::env::var("AGENTS_LOCAL_ENDPOINT") {
        if !endpoint.is_empty() {
            debug!(endpoint = %endpoint, "AGENTS_LOCAL_ENDPOINT override");
            config.model.base_url = Some(endpoint);
        }
    }
    if let Ok(prompt) = std::env::var("AGENTS_SYSTEM_PROMPT") {
        if !prompt.is_empty() {
            debug!("AGENTS_SYSTEM_PROMPT override");
            config.agent.system_prompt = Some(prompt);
        }
    }
}

/// Deep-merge `src` into `dst`; src wins on scalar conflicts.
fn merge_yaml(dst: &mut serde_yaml::Value, src: serde_yaml::Value) {
    match (dst, src) {
        (serde_yaml::Value::Mapping(d), serde_yaml::Value::Mapping(s)) => {
            for (k, v) in s {
                let entry = d
                    .entry(k)
                    .or_insert(serde_yaml::Value::Mapping(serde_yaml::Mapping::new()));
                merge_yaml(entry, v);
            }
        }
        (dst, src) => *dst = src,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn val(s: &str) -> serde_yaml::Value {
        serde_yaml::from_str(s).unwrap()
    }

    /// Serializes tests that touch `AGENTS_*` env vars so they don't race
    /// with each other or with `load_with_no_extra_path_returns_defaults`.
    static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

    #[test]
    fn merge_scalar_src_wins() {
        let mut dst = val("x: 1");
        let src = val("x: 2");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["x"].as_i64(), Some(2));
    }

    #[test]
    fn merge_preserves_keys_not_in_src() {
        let mut dst = val("a: 1\nb: 2");
        let src = val("b: 99");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["a"].as_i64(), Some(1));
        assert_eq!(dst["b"].as_i64(), Some(99));
    }

    #[test]
    fn merge_nested_tables() {
        let mut dst = val("model:\n  provider: openai\n  name: gpt-4o");
        let src = val("model:\n  name: gpt-4o-mini");
        merge_yaml(&mut dst, src);
        assert_eq!(dst["model"]["provider"].as_str(), Some("openai"));
        assert_eq!(dst["model"]["name"].as_str(), Some("gpt-4o-mini"));
    }

    #[test]
    fn load_returns_error_when_explicit_path_missing() {
        let result = load(Some(Path::new("/tmp/taskloom_nonexistent_config_xyz.yaml")));
        assert!(result.is_err());
    }

    #[test]
    fn load_with_no_extra_path_returns_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        let cfg = load(None).unwrap();
        assert_eq!(cfg.model.provider, "openai");
    }

    #[test]
    fn load_explicit_file_overrides_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model:\n  provider: anthropic\n  name: test-model").unwrap();
        let cfg = load(Some(f.path())).unwrap();
        assert_eq!(cfg.model.provider, "anthropic");
        assert_eq!(cfg.model.name, "test-model");
    }

    /// Env vars are process-global, so this one test exercises all of
    /// `apply_env_overrides` together rather than racing with parallel tests.
    #[test]
    fn env_overrides_win_over_yaml_layers() {
        let _guard = ENV_LOCK.lock().unwrap();
        use std::io::Write;
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "model:\n  provider: openai\n  name: gpt-4o").unwrap();

        std::env::set_var("AGENTS_PROVIDER", "custom");
        std::env::set_var("AGENTS_API_KEY", "env-key-123");
        std::env::set_var("AGENTS_MODEL", "env-model");
        std::env::set_var("AGENTS_LOCAL_ENDPOINT", "http://localhost:4000/v1");
        std::env::set_var("AGENTS_SYSTEM_PROMPT", "be terse");

        let cfg = load(Some(f.path())).unwrap();

        std::env::remove_var("AGENTS_PROVIDER");
        std::env::remove_var("AGENTS_API_KEY");
        std::env::remove_var("AGENTS_MODEL");
        std::env::remove_var("AGENTS_LOCAL_ENDPOINT");
        std::env::remove_var("AGENTS_SYSTEM_PROMPT");

        assert_eq!(cfg.model.provider, "custom");
        assert_eq!(cfg.model.api_key.as_deref(), Some("env-key-123"));
        assert_eq!(cfg.model.name, "env-model");
        assert_eq!(cfg.model.base_url.as_deref(), Some("http://localhost:4000/v1"));
        assert_eq!(cfg.agent.system_prompt.as_deref(), Some("be terse"));
    }
}
