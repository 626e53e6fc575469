// src/config.rs
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::source::Source;

const ENV_SOURCES_PATH: &str = "FLUX_SOURCES_PATH";

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Engine settings, read once at boot from the environment (`.env` supported
/// in dev via dotenvy). Everything has a sane default except the Discord
/// token, which the binary requires.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Hard floor applied to configured per-source intervals.
    pub min_interval_secs: u64,
    /// Fixed interval applied to every source while aggressive mode is on.
    pub aggressive_interval_secs: u64,
    /// Worker pool bound: total concurrent polls across all sources.
    pub max_concurrent_polls: usize,
    /// Scheduler scan granularity.
    pub tick_interval_ms: u64,
    /// How long shutdown waits for in-flight runs before aborting them.
    pub drain_timeout_secs: u64,
    /// Fingerprint purge cadence, in scheduler ticks.
    pub purge_every_ticks: u64,
    pub fetch_timeout_secs: u64,
    pub dispatch_timeout_secs: u64,
    pub dispatch_max_retries: u8,
    /// Base URL for social-profile feed resolution (RSSHub-compatible).
    pub feed_hub_base: String,
    pub discord_token: Option<String>,
    pub store_path: PathBuf,
    pub user_agent: String,
    pub port: u16,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            min_interval_secs: 60,
            aggressive_interval_secs: 10,
            max_concurrent_polls: 10,
            tick_interval_ms: 1_000,
            drain_timeout_secs: 20,
            purge_every_ticks: 300,
            fetch_timeout_secs: 10,
            dispatch_timeout_secs: 5,
            dispatch_max_retries: 3,
            feed_hub_base: "https://rsshub.app".to_string(),
            discord_token: None,
            store_path: PathBuf::from("state/fingerprints.json"),
            user_agent: "flux-dispatch/0.1".to_string(),
            port: 3000,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let d = Settings::default();
        Self {
            min_interval_secs: env_u64("FLUX_MIN_INTERVAL_SECS", d.min_interval_secs),
            aggressive_interval_secs: env_u64(
                "FLUX_AGGRESSIVE_INTERVAL_SECS",
                d.aggressive_interval_secs,
            ),
            max_concurrent_polls: env_u64(
                "FLUX_MAX_CONCURRENT_POLLS",
                d.max_concurrent_polls as u64,
            ) as usize,
            tick_interval_ms: env_u64("FLUX_TICK_INTERVAL_MS", d.tick_interval_ms),
            drain_timeout_secs: env_u64("FLUX_DRAIN_TIMEOUT_SECS", d.drain_timeout_secs),
            purge_every_ticks: env_u64("FLUX_PURGE_EVERY_TICKS", d.purge_every_ticks),
            fetch_timeout_secs: env_u64("FLUX_FETCH_TIMEOUT_SECS", d.fetch_timeout_secs),
            dispatch_timeout_secs: env_u64("FLUX_DISPATCH_TIMEOUT_SECS", d.dispatch_timeout_secs),
            dispatch_max_retries: env_u64("FLUX_DISPATCH_MAX_RETRIES", d.dispatch_max_retries as u64)
                as u8,
            feed_hub_base: std::env::var("FEED_HUB_BASE").unwrap_or(d.feed_hub_base),
            discord_token: std::env::var("DISCORD_TOKEN").ok().filter(|t| !t.is_empty()),
            store_path: std::env::var("FLUX_STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or(d.store_path),
            user_agent: std::env::var("FLUX_USER_AGENT").unwrap_or(d.user_agent),
            port: env_u64("PORT", d.port as u64) as u16,
        }
    }

    /// Configured interval clamped to the floor. The aggressive override is
    /// applied by the scheduler and is not subject to the floor.
    pub fn clamp_interval(&self, interval_secs: u64) -> u64 {
        interval_secs.max(self.min_interval_secs)
    }
}

/// Load source definitions from an explicit path. TOML (`[[sources]]`) or a
/// JSON array, by extension.
pub fn load_sources_from(path: &Path) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sources from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_sources(&content, ext.as_str())
}

/// Load sources using env var + fallbacks:
/// 1) $FLUX_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
pub fn load_sources_default() -> Result<Vec<Source>> {
    if let Ok(p) = std::env::var(ENV_SOURCES_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_sources_from(&pb);
        } else {
            return Err(anyhow!("FLUX_SOURCES_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_sources_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_sources_from(&json_p);
    }
    Ok(Vec::new())
}

fn parse_sources(s: &str, hint_ext: &str) -> Result<Vec<Source>> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported sources format"))
}

fn parse_toml(s: &str) -> Result<Vec<Source>> {
    #[derive(serde::Deserialize)]
    struct TomlSources {
        sources: Vec<Source>,
    }
    let v: TomlSources = toml::from_str(s)?;
    Ok(v.sources)
}

fn parse_json(s: &str) -> Result<Vec<Source>> {
    let v: Vec<Source> = serde_json::from_str(s)?;
    Ok(v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn toml_and_json_sources_parse() {
        let toml = r#"
[[sources]]
id = "feed-1"
url = "https://example.org/rss.xml"
target = "123456789012345678"
interval_secs = 600
category = "news"

[sources.filters]
include_keywords = ["rust"]
"#;
        let parsed = parse_toml(toml).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id, "feed-1");
        assert_eq!(parsed[0].interval_secs, 600);
        assert_eq!(parsed[0].filters.include_keywords, vec!["rust".to_string()]);

        let json = r#"[{"id": "feed-2", "url": "https://a.example/feed", "target": "1"}]"#;
        let parsed = parse_json(json).unwrap();
        assert_eq!(parsed[0].id, "feed-2");
        // Unspecified fields fall back to management defaults.
        assert_eq!(parsed[0].max_per_run, 5);
    }

    #[serial_test::serial]
    #[test]
    fn default_loader_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_SOURCES_PATH);

        // No files in temp CWD: empty set, not an error.
        let v = load_sources_default().unwrap();
        assert!(v.is_empty());

        // Env var takes precedence.
        let p_json = tmp.path().join("sources.json");
        fs::write(&p_json, r#"[{"id": "x", "url": "https://x.example/f", "target": "1"}]"#)
            .unwrap();
        env::set_var(ENV_SOURCES_PATH, p_json.display().to_string());
        let v2 = load_sources_default().unwrap();
        assert_eq!(v2.len(), 1);
        env::remove_var(ENV_SOURCES_PATH);

        env::set_current_dir(&old).unwrap();
    }

    #[test]
    fn interval_clamp_applies_floor() {
        let s = Settings::default();
        assert_eq!(s.clamp_interval(10), 60);
        assert_eq!(s.clamp_interval(300), 300);
    }
}
