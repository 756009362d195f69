//! Configuration types for inferswitch.
//!
//! Configuration layers in increasing precedence: built-in defaults → the
//! JSON config file (`inferswitch.json` in the working directory) →
//! environment variables. A documented subset can additionally be overridden
//! per request via headers (`x-backend`, `x-api-key`, `anthropic-version`);
//! those are handled at the HTTP edge, not here.
//!
//! Loading is total: malformed JSON, a routing table naming an unknown
//! backend, or a referenced Anthropic backend with no credential all fail
//! startup with a descriptive error. After startup the config is an
//! immutable snapshot — read-only on the hot path.
//!
//! # Example
//! ```json
//! {
//!   "backends": {
//!     "lm-studio": { "base_url": "http://localhost:1234/v1" }
//!   },
//!   "model_providers": { "claude-3-5-sonnet-20241022": "anthropic" },
//!   "expert_models": { "coding": ["claude-3-5-sonnet-20241022"] },
//!   "expert_definitions": { "coding": "programming and code review" },
//!   "force_expert_routing": true,
//!   "fallback": { "provider": "anthropic", "model": "claude-3-5-haiku-20241022" }
//! }
//! ```

use std::{
    collections::{BTreeMap, HashMap},
    path::Path,
};

use anyhow::Context;
use serde::{Deserialize, Serialize};

/// Which wire protocol a backend speaks.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Anthropic Messages API (`/v1/messages`). Pass-through wire format.
    Anthropic,
    /// OpenAI `/chat/completions` protocol — OpenAI, OpenRouter, LM Studio,
    /// vLLM, and any user-declared compatible endpoint.
    #[default]
    OpenaiCompatible,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Anthropic => "anthropic",
            Self::OpenaiCompatible => "openai-compatible",
        })
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Listen port. Overridden by `INFERSWITCH_PORT`.
    #[serde(default = "defaults::port")]
    pub port: u16,

    /// Named upstream backends. Built-in entries (`anthropic`, `openai`,
    /// `openrouter`, `lm-studio`) are seeded when the file omits them.
    #[serde(default)]
    pub backends: HashMap<String, BackendConfig>,

    /// Concrete model id → backend name.
    #[serde(default)]
    pub model_providers: HashMap<String, String>,

    /// Client-facing model id → substitute id, applied before routing.
    #[serde(default)]
    pub model_overrides: HashMap<String, String>,

    /// Single id replacing every client model id. Wins over `model_overrides`.
    #[serde(default)]
    pub default_model_override: Option<String>,

    /// Difficulty bucket → ordered candidate models. Keys are integers
    /// (`"4"`) or inclusive ranges (`"0-3"`).
    #[serde(default)]
    pub difficulty_models: BTreeMap<String, Vec<String>>,

    /// Expert name → ordered candidate models.
    #[serde(default)]
    pub expert_models: BTreeMap<String, Vec<String>>,

    /// Expert name → description fed to the classifier.
    #[serde(default)]
    pub expert_definitions: BTreeMap<String, String>,

    #[serde(default)]
    pub force_expert_routing: bool,

    #[serde(default)]
    pub force_difficulty_routing: bool,

    /// Last-resort candidate appended to every route.
    #[serde(default)]
    pub fallback: Option<FallbackConfig>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub model_availability: AvailabilityConfig,

    /// Per-provider auth extras, e.g. the Anthropic OAuth client id.
    #[serde(default)]
    pub providers_auth: HashMap<String, ProviderAuthConfig>,

    /// Process-wide backend pin (`INFERSWITCH_BACKEND`). Behaves like an
    /// `x-backend` header on every request.
    #[serde(skip)]
    pub forced_backend: Option<String>,

    /// `PROXY_MODE` — skip classifier-driven routing rules entirely and act
    /// as a plain protocol proxy.
    #[serde(skip)]
    pub proxy_mode: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Base URL without the endpoint path (`/v1/messages` or
    /// `/chat/completions` is appended by the adapter).
    pub base_url: String,

    /// Literal API key. Prefer `api_key_env` to keep secrets out of the file.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Environment variable whose value is the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    /// Total deadline for unary calls; idle gap allowance for streaming.
    #[serde(default = "defaults::timeout_seconds")]
    pub timeout_seconds: u64,

    /// Largest `max_tokens` this upstream accepts. Requests above it are
    /// clamped by the adapter (and the clamp is logged).
    #[serde(default)]
    pub max_tokens_limit: Option<u32>,
}

impl BackendConfig {
    fn openai_compatible(base_url: &str) -> Self {
        Self {
            kind: BackendKind::OpenaiCompatible,
            base_url: base_url.to_string(),
            api_key: None,
            api_key_env: None,
            timeout_seconds: defaults::timeout_seconds(),
            max_tokens_limit: None,
        }
    }

    /// Resolve the effective API key: literal first, then the named env var.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.is_empty())
            .or_else(|| {
                self.api_key_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|k| !k.is_empty())
            })
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FallbackConfig {
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default = "defaults::cache_enabled")]
    pub enabled: bool,
    #[serde(default = "defaults::cache_max_entries")]
    pub max_entries: usize,
    #[serde(default = "defaults::cache_ttl_seconds")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: defaults::cache_enabled(),
            max_entries: defaults::cache_max_entries(),
            ttl_seconds: defaults::cache_ttl_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AvailabilityConfig {
    #[serde(default = "defaults::disable_duration_seconds")]
    pub disable_duration_seconds: u64,
}

impl Default for AvailabilityConfig {
    fn default() -> Self {
        Self { disable_duration_seconds: defaults::disable_duration_seconds() }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ProviderAuthConfig {
    #[serde(default)]
    pub oauth: Option<OAuthConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct OAuthConfig {
    pub client_id: String,
}

/// Which classifier-driven routing mode is active, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingMode {
    Expert,
    Difficulty,
    None,
}

impl Config {
    /// Load, layer, and validate. `path` may be absent — defaults then apply.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config: Self = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&content).context("parsing config JSON")?
        } else {
            // Field defaults are declared via serde; an empty document applies
            // them all.
            serde_json::from_str("{}").context("building default config")?
        };

        config.seed_builtin_backends();
        config.apply_env();
        config.validate()?;

        if !config.expert_models.is_empty() && !config.difficulty_models.is_empty() {
            tracing::warn!(
                "both expert_models and difficulty_models are configured; expert routing wins"
            );
        }
        Ok(config)
    }

    /// Insert the well-known backends unless the file already declares them.
    pub(crate) fn seed_builtin_backends(&mut self) {
        let builtins = [
            (
                "anthropic",
                BackendConfig {
                    kind: BackendKind::Anthropic,
                    base_url: "https://api.anthropic.com".into(),
                    api_key: None,
                    api_key_env: Some("ANTHROPIC_API_KEY".into()),
                    timeout_seconds: defaults::timeout_seconds(),
                    max_tokens_limit: None,
                },
            ),
            ("openai", {
                let mut b = BackendConfig::openai_compatible("https://api.openai.com/v1");
                b.api_key_env = Some("OPENAI_API_KEY".into());
                b
            }),
            ("openrouter", {
                let mut b = BackendConfig::openai_compatible("https://openrouter.ai/api/v1");
                b.api_key_env = Some("OPENROUTER_API_KEY".into());
                b
            }),
            (
                "lm-studio",
                BackendConfig::openai_compatible("http://localhost:1234/v1"),
            ),
        ];
        for (name, backend) in builtins {
            self.backends.entry(name.to_string()).or_insert(backend);
        }
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Some(port) = env_parse::<u16>("INFERSWITCH_PORT") {
            self.port = port;
        }
        if let Ok(url) = std::env::var("LM_STUDIO_BASE_URL") {
            if let Some(b) = self.backends.get_mut("lm-studio") {
                b.base_url = url;
            }
        }
        if let Ok(url) = std::env::var("OPENROUTER_BASE_URL") {
            if let Some(b) = self.backends.get_mut("openrouter") {
                b.base_url = url;
            }
        }
        if let Some(enabled) = env_parse::<bool>("CACHE_ENABLED") {
            self.cache.enabled = enabled;
        }
        if let Some(max) = env_parse::<usize>("CACHE_MAX_ENTRIES") {
            self.cache.max_entries = max;
        }
        if let Some(ttl) = env_parse::<u64>("CACHE_TTL_SECONDS") {
            self.cache.ttl_seconds = ttl;
        }
        self.forced_backend = std::env::var("INFERSWITCH_BACKEND").ok().filter(|v| !v.is_empty());
        self.proxy_mode = std::env::var("PROXY_MODE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        for (model, backend) in &self.model_providers {
            anyhow::ensure!(
                self.backends.contains_key(backend),
                "model_providers entry `{model}` references unknown backend `{backend}`"
            );
        }

        if let Some(fallback) = &self.fallback {
            anyhow::ensure!(
                self.backends.contains_key(&fallback.provider),
                "fallback references unknown backend `{}`",
                fallback.provider
            );
        }

        for key in self.difficulty_models.keys() {
            anyhow::ensure!(
                parse_bucket_key(key).is_some(),
                "difficulty_models key `{key}` is neither an integer nor a `lo-hi` range"
            );
        }

        for (table, models) in self
            .difficulty_models
            .iter()
            .map(|(k, v)| (format!("difficulty_models.{k}"), v))
            .chain(
                self.expert_models
                    .iter()
                    .map(|(k, v)| (format!("expert_models.{k}"), v)),
            )
        {
            anyhow::ensure!(!models.is_empty(), "{table} has an empty candidate list");
            for model in models {
                anyhow::ensure!(
                    self.backend_for_model(model).is_some(),
                    "{table} names model `{model}` which maps to no backend \
                     (add it to model_providers or use a claude-*/gpt-* id)"
                );
            }
        }

        for name in self.expert_models.keys() {
            anyhow::ensure!(
                self.expert_definitions.contains_key(name),
                "expert_models.{name} has no matching expert_definitions entry"
            );
        }

        if let Some(forced) = &self.forced_backend {
            anyhow::ensure!(
                self.backends.contains_key(forced),
                "INFERSWITCH_BACKEND names unknown backend `{forced}`"
            );
        }

        // Referenced Anthropic backends must have some credential channel.
        for (name, backend) in &self.backends {
            if backend.kind == BackendKind::Anthropic
                && self.backend_is_referenced(name)
                && backend.resolve_api_key().is_none()
                && !self.oauth_configured(name)
            {
                anyhow::bail!(
                    "backend `{name}` is routed to but has no credential; \
                     set its API key or configure providers_auth.{name}.oauth"
                );
            }
        }

        Ok(())
    }

    /// Whether any routing table can send traffic to `name`.
    fn backend_is_referenced(&self, name: &str) -> bool {
        self.model_providers.values().any(|b| b == name)
            || self.fallback.as_ref().map(|f| f.provider == name).unwrap_or(false)
            || self.forced_backend.as_deref() == Some(name)
            || self
                .expert_models
                .values()
                .chain(self.difficulty_models.values())
                .flatten()
                .any(|m| self.backend_for_model(m) == Some(name.to_string()))
    }

    pub fn oauth_configured(&self, backend: &str) -> bool {
        self.providers_auth
            .get(backend)
            .and_then(|a| a.oauth.as_ref())
            .is_some()
    }

    /// Resolve a model id to a backend name: explicit `model_providers`
    /// first, then the vendor prefix patterns.
    pub fn backend_for_model(&self, model: &str) -> Option<String> {
        if let Some(backend) = self.model_providers.get(model) {
            return Some(backend.clone());
        }
        if model.starts_with("claude-") && self.backends.contains_key("anthropic") {
            return Some("anthropic".into());
        }
        if (model.starts_with("gpt-") || model.starts_with("o1") || model.starts_with("o3"))
            && self.backends.contains_key("openai")
        {
            return Some("openai".into());
        }
        None
    }

    /// Apply `default_model_override` / `model_overrides` to a client model id.
    pub fn apply_model_override<'a>(&'a self, model: &'a str) -> &'a str {
        if let Some(global) = &self.default_model_override {
            return global;
        }
        self.model_overrides
            .get(model)
            .map(String::as_str)
            .unwrap_or(model)
    }

    /// The active classifier-driven routing mode. When both tables are
    /// configured, expert wins (and the resolver logged it at load).
    pub fn routing_mode(&self) -> RoutingMode {
        if self.proxy_mode {
            return RoutingMode::None;
        }
        if self.force_expert_routing && !self.expert_models.is_empty() {
            return RoutingMode::Expert;
        }
        if self.force_difficulty_routing && !self.difficulty_models.is_empty() {
            return RoutingMode::Difficulty;
        }
        RoutingMode::None
    }

    /// Candidate models for a difficulty bucket, honoring range keys.
    /// When several keys contain the bucket, the smallest lower bound wins.
    pub fn difficulty_candidates(&self, bucket: u32) -> Option<&Vec<String>> {
        self.difficulty_models
            .iter()
            .filter_map(|(key, models)| {
                let (lo, hi) = parse_bucket_key(key)?;
                (lo <= bucket && bucket <= hi).then_some((lo, models))
            })
            .min_by_key(|(lo, _)| *lo)
            .map(|(_, models)| models)
    }
}

/// Parse a difficulty key: `"4"` or an inclusive `"0-3"` range.
fn parse_bucket_key(key: &str) -> Option<(u32, u32)> {
    if let Some((lo, hi)) = key.split_once('-') {
        let lo: u32 = lo.trim().parse().ok()?;
        let hi: u32 = hi.trim().parse().ok()?;
        (lo <= hi).then_some((lo, hi))
    } else {
        let single: u32 = key.trim().parse().ok()?;
        Some((single, single))
    }
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Option<T> {
    std::env::var(var).ok().and_then(|v| v.parse().ok())
}

mod defaults {
    pub fn port() -> u16 { 1235 }
    pub fn timeout_seconds() -> u64 { 120 }
    pub fn cache_enabled() -> bool { true }
    pub fn cache_max_entries() -> usize { 1_000 }
    pub fn cache_ttl_seconds() -> u64 { 3_600 }
    pub fn disable_duration_seconds() -> u64 { 300 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parsed(json: &str) -> Config {
        let mut config: Config = serde_json::from_str(json).expect("config should parse");
        config.seed_builtin_backends();
        config
    }

    fn minimal_config() -> Config {
        parsed(
            r#"{
                "model_providers": { "claude-3-5-sonnet-20241022": "anthropic" },
                "backends": {
                    "anthropic": {
                        "kind": "anthropic",
                        "base_url": "https://api.anthropic.com",
                        "api_key": "sk-ant-test"
                    }
                }
            }"#,
        )
    }

    // -----------------------------------------------------------------------
    // Parsing & defaults
    // -----------------------------------------------------------------------

    #[test]
    fn parse_example_config() {
        let content = include_str!("../inferswitch.example.json");
        let config: Config = serde_json::from_str(content).expect("example config should parse");
        drop(config);
    }

    #[test]
    fn defaults_are_applied_when_file_is_minimal() {
        let config = minimal_config();
        assert_eq!(config.port, 1235);
        assert!(config.cache.enabled);
        assert_eq!(config.cache.max_entries, 1_000);
        assert_eq!(config.cache.ttl_seconds, 3_600);
        assert_eq!(config.model_availability.disable_duration_seconds, 300);
    }

    #[test]
    fn builtin_backends_are_seeded() {
        let config = minimal_config();
        for name in ["anthropic", "openai", "openrouter", "lm-studio"] {
            assert!(config.backends.contains_key(name), "missing builtin `{name}`");
        }
        assert_eq!(config.backends["lm-studio"].kind, BackendKind::OpenaiCompatible);
    }

    #[test]
    fn file_backend_wins_over_builtin() {
        let config = minimal_config();
        assert_eq!(config.backends["anthropic"].api_key.as_deref(), Some("sk-ant-test"));
    }

    #[test]
    fn malformed_json_is_rejected() {
        let result: Result<Config, _> = serde_json::from_str("{ not json");
        assert!(result.is_err());
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let result: Result<Config, _> =
            serde_json::from_str(r#"{ "model_provders": {} }"#);
        assert!(result.is_err(), "typo'd keys must not be silently ignored");
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    #[test]
    fn validation_rejects_unknown_backend_in_model_providers() {
        let mut config = minimal_config();
        config
            .model_providers
            .insert("some-model".into(), "nonexistent".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unknown_fallback_provider() {
        let mut config = minimal_config();
        config.fallback = Some(FallbackConfig {
            provider: "nope".into(),
            model: "m".into(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_unroutable_expert_model() {
        let mut config = minimal_config();
        config
            .expert_models
            .insert("coding".into(), vec!["mystery-model-9000".into()]);
        config
            .expert_definitions
            .insert("coding".into(), "code".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_expert_without_definition() {
        let mut config = minimal_config();
        config
            .expert_models
            .insert("coding".into(), vec!["claude-3-5-sonnet-20241022".into()]);
        assert!(config.validate().unwrap_err().to_string().contains("expert_definitions"));
    }

    #[test]
    fn validation_rejects_malformed_difficulty_key() {
        let mut config = minimal_config();
        config
            .difficulty_models
            .insert("easy".into(), vec!["claude-3-5-sonnet-20241022".into()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn validation_rejects_referenced_anthropic_backend_without_credential() {
        let mut config = parsed(
            r#"{ "model_providers": { "claude-x": "bare" },
                 "backends": { "bare": { "kind": "anthropic",
                                          "base_url": "https://api.anthropic.com" } } }"#,
        );
        config.backends.get_mut("bare").unwrap().api_key = None;
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("credential"), "got: {err}");
    }

    #[test]
    fn keyless_openai_compatible_backend_is_fine() {
        let config = parsed(
            r#"{ "model_providers": { "local-model": "lm-studio" } }"#,
        );
        assert!(config.validate().is_ok());
    }

    // -----------------------------------------------------------------------
    // Model resolution helpers
    // -----------------------------------------------------------------------

    #[test]
    fn backend_for_model_prefers_explicit_mapping() {
        let mut config = minimal_config();
        config
            .model_providers
            .insert("claude-special".into(), "lm-studio".into());
        assert_eq!(config.backend_for_model("claude-special").as_deref(), Some("lm-studio"));
    }

    #[test]
    fn backend_for_model_falls_back_to_vendor_prefix() {
        let config = minimal_config();
        assert_eq!(config.backend_for_model("claude-3-opus").as_deref(), Some("anthropic"));
        assert_eq!(config.backend_for_model("gpt-4o").as_deref(), Some("openai"));
        assert_eq!(config.backend_for_model("qwen2.5:7b"), None);
    }

    #[test]
    fn model_overrides_apply_per_model() {
        let mut config = minimal_config();
        config
            .model_overrides
            .insert("claude-3-opus".into(), "claude-3-5-sonnet-20241022".into());
        assert_eq!(
            config.apply_model_override("claude-3-opus"),
            "claude-3-5-sonnet-20241022"
        );
        assert_eq!(config.apply_model_override("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn default_model_override_wins_over_per_model() {
        let mut config = minimal_config();
        config
            .model_overrides
            .insert("a".into(), "b".into());
        config.default_model_override = Some("the-one-model".into());
        assert_eq!(config.apply_model_override("a"), "the-one-model");
        assert_eq!(config.apply_model_override("z"), "the-one-model");
    }

    // -----------------------------------------------------------------------
    // Routing mode & difficulty buckets
    // -----------------------------------------------------------------------

    #[test]
    fn expert_mode_wins_when_both_tables_configured() {
        let mut config = minimal_config();
        config.force_expert_routing = true;
        config.force_difficulty_routing = true;
        config
            .expert_models
            .insert("coding".into(), vec!["claude-3-5-sonnet-20241022".into()]);
        config
            .difficulty_models
            .insert("0-5".into(), vec!["claude-3-5-sonnet-20241022".into()]);
        assert_eq!(config.routing_mode(), RoutingMode::Expert);
    }

    #[test]
    fn forced_flag_without_table_is_inert() {
        let mut config = minimal_config();
        config.force_expert_routing = true;
        assert_eq!(config.routing_mode(), RoutingMode::None);
    }

    #[test]
    fn difficulty_candidates_honor_ranges_and_singles() {
        let mut config = minimal_config();
        config
            .difficulty_models
            .insert("0-3".into(), vec!["easy-claude-3".into()]);
        config
            .difficulty_models
            .insert("4".into(), vec!["hard-claude-4".into()]);
        config
            .model_providers
            .insert("easy-claude-3".into(), "anthropic".into());
        config
            .model_providers
            .insert("hard-claude-4".into(), "anthropic".into());

        assert_eq!(config.difficulty_candidates(2).unwrap()[0], "easy-claude-3");
        assert_eq!(config.difficulty_candidates(4).unwrap()[0], "hard-claude-4");
        assert!(config.difficulty_candidates(5).is_none());
    }

    #[test]
    fn overlapping_difficulty_ranges_resolve_to_lowest_bound() {
        let mut config = minimal_config();
        config
            .difficulty_models
            .insert("0-4".into(), vec!["wide".into()]);
        config
            .difficulty_models
            .insert("3-5".into(), vec!["narrow".into()]);
        config.model_providers.insert("wide".into(), "anthropic".into());
        config.model_providers.insert("narrow".into(), "anthropic".into());

        // Bucket 3 is inside both ranges; "0-4" has the smaller lower bound.
        assert_eq!(config.difficulty_candidates(3).unwrap()[0], "wide");
    }

    #[test]
    fn bucket_key_parsing() {
        assert_eq!(parse_bucket_key("4"), Some((4, 4)));
        assert_eq!(parse_bucket_key("0-3"), Some((0, 3)));
        assert_eq!(parse_bucket_key("3-0"), None);
        assert_eq!(parse_bucket_key("easy"), None);
    }

    // -----------------------------------------------------------------------
    // API key resolution
    // -----------------------------------------------------------------------

    #[test]
    fn literal_api_key_wins_over_env_var() {
        let backend = BackendConfig {
            kind: BackendKind::OpenaiCompatible,
            base_url: "http://x".into(),
            api_key: Some("literal".into()),
            api_key_env: Some("INFERSWITCH_TEST_KEY_UNSET_XYZ".into()),
            timeout_seconds: 30,
            max_tokens_limit: None,
        };
        assert_eq!(backend.resolve_api_key().as_deref(), Some("literal"));
    }

    #[test]
    fn missing_key_resolves_to_none() {
        let backend = BackendConfig::openai_compatible("http://localhost:1234/v1");
        assert!(backend.resolve_api_key().is_none());
    }
}
