mod dotenv;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::edit::catalog::CategoryFamily;
use crate::remote::health::DEFAULT_HEALTH_INTERVAL;
use crate::remote::http::HttpEditServiceConfig;

pub const DEFAULT_API_BASE: &str = "http://127.0.0.1:8000";
pub const DEFAULT_BIND: &str = "127.0.0.1:8790";
pub const DEFAULT_HEALTH_PATH: &str = "/health";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_SETTINGS_PATH: &str = "config/tryon.settings.toml";

pub const ENV_API_BASE: &str = "TRYON_API_BASE";
pub const ENV_BIND: &str = "TRYON_BIND";
pub const ENV_FAMILY: &str = "TRYON_FAMILY";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "TRYON_REQUEST_TIMEOUT_MS";
pub const ENV_ENDPOINT_PATH: &str = "TRYON_ENDPOINT_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnSettings {
    pub api_base: Url,
    pub bind: SocketAddr,
    pub family: CategoryFamily,
    pub endpoint_path: Option<String>,
    pub request_timeout: Duration,
    pub health_path: String,
    pub health_interval: Duration,
}

/// One settings layer. Unset fields fall through to the layer below.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettingsOverlay {
    pub api_base: Option<String>,
    pub bind: Option<String>,
    pub family: Option<String>,
    pub endpoint_path: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub health_path: Option<String>,
    pub health_interval_ms: Option<u64>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("failed to read settings '{path}': {message}")]
    ReadFile { path: String, message: String },
    #[error("failed to parse settings TOML '{path}': {message}")]
    ParseToml { path: String, message: String },
    #[error("settings field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
}

impl SettingsError {
    fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl Default for TryOnSettings {
    fn default() -> Self {
        Self {
            api_base: Url::parse(DEFAULT_API_BASE).expect("default api base should parse"),
            bind: SocketAddr::from(([127, 0, 0, 1], 8790)),
            family: CategoryFamily::Makeup,
            endpoint_path: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            health_path: String::from(DEFAULT_HEALTH_PATH),
            health_interval: DEFAULT_HEALTH_INTERVAL,
        }
    }
}

impl TryOnSettings {
    /// Defaults, then the TOML file, then process environment (with `.env` filling gaps).
    pub fn load(app_root: &Path, explicit_path: Option<&str>) -> Result<Self, SettingsError> {
        let file = load_file_overlay(app_root, explicit_path)?;
        let dotenv = dotenv::load_dotenv_map(app_root).map_err(|error| SettingsError::ReadFile {
            path: app_root.join(".env").display().to_string(),
            message: error.to_string(),
        })?;
        let env = env_overlay(|key| {
            std::env::var(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .or_else(|| dotenv.get(key).cloned())
        })?;
        Self::default().apply(&merge_overlays(&file, &env))
    }

    pub fn apply(mut self, overlay: &SettingsOverlay) -> Result<Self, SettingsError> {
        if let Some(raw) = non_empty(overlay.api_base.as_deref()) {
            let url =
                Url::parse(raw).map_err(|e| SettingsError::invalid("api_base", e.to_string()))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(SettingsError::invalid(
                    "api_base",
                    format!("unsupported scheme '{}'", url.scheme()),
                ));
            }
            self.api_base = url;
        }
        if let Some(raw) = non_empty(overlay.bind.as_deref()) {
            self.bind = raw
                .parse::<SocketAddr>()
                .map_err(|e| SettingsError::invalid("bind", e.to_string()))?;
        }
        if let Some(raw) = non_empty(overlay.family.as_deref()) {
            self.family = raw
                .parse::<CategoryFamily>()
                .map_err(|e| SettingsError::invalid("family", e.to_string()))?;
        }
        if let Some(raw) = non_empty(overlay.endpoint_path.as_deref()) {
            self.endpoint_path = Some(raw.to_string());
        }
        if let Some(ms) = overlay.request_timeout_ms {
            self.request_timeout = positive_millis("request_timeout_ms", ms)?;
        }
        if let Some(raw) = non_empty(overlay.health_path.as_deref()) {
            self.health_path = raw.to_string();
        }
        if let Some(ms) = overlay.health_interval_ms {
            self.health_interval = positive_millis("health_interval_ms", ms)?;
        }
        Ok(self)
    }

    pub fn edit_service_config(&self) -> HttpEditServiceConfig {
        let config = HttpEditServiceConfig::for_family(self.api_base.clone(), self.family)
            .with_request_timeout(self.request_timeout);
        match self.endpoint_path.as_deref() {
            Some(path) => config.with_endpoint_path(path),
            None => config,
        }
    }
}

pub fn default_app_root() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from(env!("CARGO_MANIFEST_DIR")))
}

pub fn load_file_overlay(
    app_root: &Path,
    explicit_path: Option<&str>,
) -> Result<SettingsOverlay, SettingsError> {
    if let Some(path) = explicit_path
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .map(|p| if p.is_absolute() { p } else { app_root.join(p) })
    {
        if !path.is_file() {
            return Err(SettingsError::ReadFile {
                path: path.display().to_string(),
                message: String::from("file not found"),
            });
        }
        return load_overlay_from_toml_path(path.as_path());
    }

    let default_path = app_root.join(DEFAULT_SETTINGS_PATH);
    if !default_path.is_file() {
        return Ok(SettingsOverlay::default());
    }
    load_overlay_from_toml_path(default_path.as_path())
}

/// Accepts either a `[tryon]` table or top-level keys.
pub fn parse_settings_toml(raw: &str, path: &str) -> Result<SettingsOverlay, SettingsError> {
    let parse_error = |message: String| SettingsError::ParseToml {
        path: path.to_string(),
        message,
    };
    let value = toml::from_str::<toml::Value>(raw).map_err(|e| parse_error(e.to_string()))?;
    let section = value.get("tryon").cloned().unwrap_or(value);
    section
        .try_into::<SettingsOverlay>()
        .map_err(|e| parse_error(e.to_string()))
}

pub fn env_overlay<F>(lookup: F) -> Result<SettingsOverlay, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let request_timeout_ms = lookup(ENV_REQUEST_TIMEOUT_MS)
        .map(|raw| {
            raw.trim().parse::<u64>().map_err(|e| {
                SettingsError::invalid(ENV_REQUEST_TIMEOUT_MS, format!("'{raw}': {e}"))
            })
        })
        .transpose()?;
    Ok(SettingsOverlay {
        api_base: lookup(ENV_API_BASE),
        bind: lookup(ENV_BIND),
        family: lookup(ENV_FAMILY),
        endpoint_path: lookup(ENV_ENDPOINT_PATH),
        request_timeout_ms,
        health_path: None,
        health_interval_ms: None,
    })
}

pub fn merge_overlays(file: &SettingsOverlay, env: &SettingsOverlay) -> SettingsOverlay {
    SettingsOverlay {
        api_base: choose_string(env.api_base.as_deref(), file.api_base.as_deref()),
        bind: choose_string(env.bind.as_deref(), file.bind.as_deref()),
        family: choose_string(env.family.as_deref(), file.family.as_deref()),
        endpoint_path: choose_string(env.endpoint_path.as_deref(), file.endpoint_path.as_deref()),
        request_timeout_ms: env.request_timeout_ms.or(file.request_timeout_ms),
        health_path: choose_string(env.health_path.as_deref(), file.health_path.as_deref()),
        health_interval_ms: env.health_interval_ms.or(file.health_interval_ms),
    }
}

fn load_overlay_from_toml_path(path: &Path) -> Result<SettingsOverlay, SettingsError> {
    let raw = fs::read_to_string(path).map_err(|error| SettingsError::ReadFile {
        path: path.display().to_string(),
        message: error.to_string(),
    })?;
    parse_settings_toml(raw.as_str(), path.display().to_string().as_str())
}

fn choose_string(a: Option<&str>, b: Option<&str>) -> Option<String> {
    non_empty(a).or(non_empty(b)).map(str::to_string)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn positive_millis(field: &str, ms: u64) -> Result<Duration, SettingsError> {
    if ms == 0 {
        return Err(SettingsError::invalid(field, "must be greater than zero"));
    }
    Ok(Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{SystemTime, UNIX_EPOCH};

    use pretty_assertions::assert_eq;

    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let root = std::env::temp_dir().join(format!("tryon_settings_{tag}_{stamp}"));
        fs::create_dir_all(root.join("config")).expect("config dir should be created");
        root
    }

    #[test]
    fn defaults_match_documented_values() {
        let settings = TryOnSettings::default();
        assert_eq!(settings.api_base.as_str(), "http://127.0.0.1:8000/");
        assert_eq!(settings.bind.to_string(), DEFAULT_BIND);
        assert_eq!(settings.family, CategoryFamily::Makeup);
        assert_eq!(settings.request_timeout, Duration::from_secs(60));
        assert_eq!(settings.health_interval, Duration::from_secs(3));
        assert_eq!(
            settings.edit_service_config().endpoint_path,
            "/manual-makeup/"
        );
    }

    #[test]
    fn parses_nested_and_flat_toml() {
        let nested = parse_settings_toml(
            r#"[tryon]
api_base = "http://10.0.0.2:8000"
family = "jewelry"
request_timeout_ms = 2500
"#,
            "nested.toml",
        )
        .expect("nested settings should parse");
        assert_eq!(nested.api_base.as_deref(), Some("http://10.0.0.2:8000"));
        assert_eq!(nested.family.as_deref(), Some("jewelry"));
        assert_eq!(nested.request_timeout_ms, Some(2500));

        let flat = parse_settings_toml("bind = \"0.0.0.0:9000\"\n", "flat.toml")
            .expect("flat settings should parse");
        assert_eq!(flat.bind.as_deref(), Some("0.0.0.0:9000"));
    }

    #[test]
    fn rejects_unknown_toml_keys() {
        let err = parse_settings_toml("api_bsae = \"x\"\n", "typo.toml")
            .expect_err("unknown key should be rejected");
        assert!(matches!(err, SettingsError::ParseToml { .. }));
    }

    #[test]
    fn environment_overrides_file_layer() {
        let file = SettingsOverlay {
            api_base: Some(String::from("http://file:8000")),
            family: Some(String::from("jewelry")),
            request_timeout_ms: Some(1000),
            ..SettingsOverlay::default()
        };
        let vars = HashMap::from([
            (ENV_API_BASE, "http://env:8000"),
            (ENV_REQUEST_TIMEOUT_MS, "4000"),
        ]);
        let env = env_overlay(|key| vars.get(key).map(|v| v.to_string()))
            .expect("env overlay should parse");

        let settings = TryOnSettings::default()
            .apply(&merge_overlays(&file, &env))
            .expect("settings should validate");
        assert_eq!(settings.api_base.as_str(), "http://env:8000/");
        assert_eq!(settings.family, CategoryFamily::Jewelry);
        assert_eq!(settings.request_timeout, Duration::from_millis(4000));
        assert_eq!(
            settings.edit_service_config().endpoint_path,
            "/tryon-jewelry/"
        );
    }

    #[test]
    fn invalid_values_name_the_field() {
        let err = env_overlay(|key| (key == ENV_REQUEST_TIMEOUT_MS).then(|| String::from("soon")))
            .expect_err("non-numeric timeout should fail");
        assert!(err.to_string().contains(ENV_REQUEST_TIMEOUT_MS));

        let err = TryOnSettings::default()
            .apply(&SettingsOverlay {
                family: Some(String::from("hats")),
                ..SettingsOverlay::default()
            })
            .expect_err("unknown family should fail");
        assert!(matches!(err, SettingsError::InvalidField { ref field, .. } if field == "family"));

        let err = TryOnSettings::default()
            .apply(&SettingsOverlay {
                api_base: Some(String::from("ftp://host")),
                ..SettingsOverlay::default()
            })
            .expect_err("non-http base should fail");
        assert!(err.to_string().contains("unsupported scheme"));
    }

    #[test]
    fn loads_default_file_and_dotenv_fallback() {
        let root = temp_root("load");
        fs::write(
            root.join(DEFAULT_SETTINGS_PATH),
            "[tryon]\nendpoint_path = \"/makeup/v2/\"\nhealth_interval_ms = 500\n",
        )
        .expect("settings file should be written");
        fs::write(root.join(".env"), "TRYON_BIND_UNUSED=1\n").expect(".env should be written");

        let settings = TryOnSettings::load(root.as_path(), None).expect("settings should load");
        assert_eq!(settings.endpoint_path.as_deref(), Some("/makeup/v2/"));
        assert_eq!(settings.health_interval, Duration::from_millis(500));
        assert_eq!(
            settings.edit_service_config().endpoint_path,
            "/makeup/v2/"
        );

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let root = temp_root("missing");
        let err = load_file_overlay(root.as_path(), Some("nope.toml"))
            .expect_err("missing explicit file should fail");
        assert!(matches!(err, SettingsError::ReadFile { .. }));
        assert_eq!(
            load_file_overlay(root.as_path(), None).expect("default path is optional"),
            SettingsOverlay::default()
        );
        let _ = fs::remove_dir_all(root);
    }
}
