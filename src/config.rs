use serde::Deserialize;

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

const CONFIG_PATH_VAR: &str = "MAIL_RELAY_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// How the SMTP session is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    /// Plain connection upgraded with STARTTLS, usually port 587.
    Starttls,
    /// TLS from the first byte, usually port 465.
    Implicit,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub sender_email: Option<String>,
    pub sender_password: Option<String>,
    /// Login name for SMTP auth; the sender address is used when unset.
    pub smtp_username: Option<String>,
    pub smtp_host: Option<String>,
    pub smtp_port: u16,
    pub smtp_tls: Option<TlsMode>,
    pub smtp_timeout: Duration,
    pub allowed_domain: String,
    pub api_key: Option<String>,
    pub listen_port: u16,
    pub rate_limit_per_minute: u32,
    pub trust_proxy_headers: bool,
}

/// One layer of settings, as read from a YAML file or the environment.
#[derive(Debug, Default, Deserialize)]
struct ConfigSource {
    sender_email: Option<String>,
    sender_password: Option<String>,
    smtp_username: Option<String>,
    smtp_host: Option<String>,
    host: Option<String>,
    smtp_port: Option<u16>,
    smtp_tls: Option<TlsMode>,
    #[serde(default, with = "humantime_serde")]
    smtp_timeout: Option<Duration>,
    allowed_domain: Option<String>,
    api_key: Option<String>,
    listen_port: Option<u16>,
    rate_limit_per_minute: Option<u32>,
    trust_proxy_headers: Option<bool>,
}

/// Everything needed to open an authenticated SMTP session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpSettings {
    pub sender: String,
    pub username: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub tls: TlsMode,
    pub timeout: Duration,
}

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_SMTP_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_LISTEN_PORT: u16 = 5005;
const DEFAULT_RATE_LIMIT: u32 = 5;

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Blank overrides do not mask the underlying value.
fn pick(over: Option<String>, base: Option<String>) -> Option<String> {
    over.filter(|v| !v.trim().is_empty()).or(base)
}

impl ConfigSource {
    /// Layers `over` on top of `self`.
    fn merge(self, over: Self) -> Self {
        Self {
            sender_email: pick(over.sender_email, self.sender_email),
            sender_password: pick(over.sender_password, self.sender_password),
            smtp_username: pick(over.smtp_username, self.smtp_username),
            smtp_host: pick(over.smtp_host, self.smtp_host),
            host: pick(over.host, self.host),
            smtp_port: over.smtp_port.or(self.smtp_port),
            smtp_tls: over.smtp_tls.or(self.smtp_tls),
            smtp_timeout: over.smtp_timeout.or(self.smtp_timeout),
            allowed_domain: pick(over.allowed_domain, self.allowed_domain),
            api_key: pick(over.api_key, self.api_key),
            listen_port: over.listen_port.or(self.listen_port),
            rate_limit_per_minute: over.rate_limit_per_minute.or(self.rate_limit_per_minute),
            trust_proxy_headers: over.trust_proxy_headers.or(self.trust_proxy_headers),
        }
    }

    fn into_config(self) -> Result<Config, Box<dyn std::error::Error>> {
        let allowed_domain = present(self.allowed_domain.as_ref())
            .ok_or("allowed_domain (ALLOWED_DOMAIN) is required")?
            .to_string();

        let rate_limit_per_minute = self.rate_limit_per_minute.unwrap_or(DEFAULT_RATE_LIMIT);
        if rate_limit_per_minute == 0 {
            return Err("rate_limit_per_minute must be at least 1".into());
        }

        Ok(Config {
            sender_email: self.sender_email,
            sender_password: self.sender_password,
            smtp_username: self.smtp_username,
            smtp_host: pick(self.smtp_host, self.host),
            smtp_port: self.smtp_port.unwrap_or(DEFAULT_SMTP_PORT),
            smtp_tls: self.smtp_tls,
            smtp_timeout: self.smtp_timeout.unwrap_or(DEFAULT_SMTP_TIMEOUT),
            allowed_domain,
            api_key: self.api_key,
            listen_port: self.listen_port.unwrap_or(DEFAULT_LISTEN_PORT),
            rate_limit_per_minute,
            trust_proxy_headers: self.trust_proxy_headers.unwrap_or(false),
        })
    }
}

impl Config {
    /// Returns the configured API key, ignoring blank values.
    pub fn api_key(&self) -> Option<&str> {
        present(self.api_key.as_ref())
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.smtp_tls.unwrap_or(if self.smtp_port == 465 {
            TlsMode::Implicit
        } else {
            TlsMode::Starttls
        })
    }

    /// Names of the required SMTP settings that are absent or blank.
    pub fn missing_smtp_settings(&self) -> Vec<&'static str> {
        [
            ("sender_email", &self.sender_email),
            ("sender_password", &self.sender_password),
            ("smtp_host", &self.smtp_host),
        ]
        .into_iter()
        .filter(|(_, value)| present(value.as_ref()).is_none())
        .map(|(name, _)| name)
        .collect()
    }

    /// Assembles the SMTP settings, or lists what is missing.
    pub fn smtp_settings(&self) -> Result<SmtpSettings, Vec<&'static str>> {
        match (
            present(self.sender_email.as_ref()),
            present(self.sender_password.as_ref()),
            present(self.smtp_host.as_ref()),
        ) {
            (Some(sender), Some(password), Some(host)) => Ok(SmtpSettings {
                sender: sender.to_string(),
                username: present(self.smtp_username.as_ref())
                    .unwrap_or(sender)
                    .to_string(),
                password: password.to_string(),
                host: host.to_string(),
                port: self.smtp_port,
                tls: self.tls_mode(),
                timeout: self.smtp_timeout,
            }),
            _ => Err(self.missing_smtp_settings()),
        }
    }
}

fn load_from_file(path: &Path) -> Result<ConfigSource, Box<dyn std::error::Error>> {
    let contents = fs::read_to_string(path)?;
    serde_yaml::from_str(&contents)
        .map_err(|e| format!("Failed to parse '{}': {e}", path.display()).into())
}

/// The config file to use: `$MAIL_RELAY_CONFIG` if it exists, else the default path.
fn locate_config_file(explicit: Option<&str>, default_path: &Path) -> Option<PathBuf> {
    if let Some(path) = explicit.map(PathBuf::from) {
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(
            "Config file '{}' not found, falling back to '{}'",
            path.display(),
            default_path.display()
        );
    }

    default_path.exists().then(|| default_path.to_path_buf())
}

/// Resolves the configuration from an optional YAML file with the given
/// environment layered on top.
fn resolve_config<I>(vars: I, default_path: &Path) -> Result<Config, Box<dyn std::error::Error>>
where
    I: IntoIterator<Item = (String, String)>,
{
    let vars: Vec<(String, String)> = vars.into_iter().collect();
    let explicit = vars
        .iter()
        .find(|(key, _)| key == CONFIG_PATH_VAR)
        .map(|(_, value)| value.as_str());

    let file = match locate_config_file(explicit, default_path) {
        Some(path) => {
            tracing::info!("Loading config file '{}'", path.display());
            load_from_file(&path)?
        }
        None => {
            tracing::info!("No config file found, using environment variables only");
            ConfigSource::default()
        }
    };

    let environment = envy::from_iter::<_, ConfigSource>(vars)
        .map_err(|e| format!("Failed to read environment variables: {e}"))?;

    file.merge(environment).into_config()
}

pub fn load_config() -> Result<Config, Box<dyn std::error::Error>> {
    resolve_config(env::vars(), Path::new(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
pub(crate) fn test_config() -> Config {
    Config {
        sender_email: Some("relay@example.com".to_string()),
        sender_password: Some("hunter2".to_string()),
        smtp_username: None,
        smtp_host: Some("smtp.example.com".to_string()),
        smtp_port: 587,
        smtp_tls: None,
        smtp_timeout: Duration::from_secs(10),
        allowed_domain: "https://app.example.com".to_string(),
        api_key: Some("secret-key".to_string()),
        listen_port: 5005,
        rate_limit_per_minute: 5,
        trust_proxy_headers: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config, Box<dyn std::error::Error>> {
        serde_yaml::from_str::<ConfigSource>(yaml)?.into_config()
    }

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    const PLACEHOLDER_YAML: &str = "sender_email: your-email@example.com\n\
                                    sender_password: your-email-password\n\
                                    smtp_host: smtp.gmail.com\n\
                                    smtp_port: 465\n\
                                    allowed_domain: https://www.example.com\n";

    #[test]
    fn yaml_defaults_are_applied() {
        let cfg = parse(
            "sender_email: relay@example.com\n\
             sender_password: pw\n\
             host: smtp.example.com\n\
             allowed_domain: https://app.example.com\n",
        )
        .unwrap();

        assert_eq!(cfg.smtp_host.as_deref(), Some("smtp.example.com"));
        assert_eq!(cfg.smtp_port, 587);
        assert_eq!(cfg.tls_mode(), TlsMode::Starttls);
        assert_eq!(cfg.smtp_timeout, Duration::from_secs(10));
        assert_eq!(cfg.listen_port, 5005);
        assert_eq!(cfg.rate_limit_per_minute, 5);
        assert!(cfg.api_key().is_none());
        assert!(!cfg.trust_proxy_headers);
    }

    #[test]
    fn allowed_domain_is_required() {
        assert!(parse("sender_email: relay@example.com\n").is_err());
        assert!(parse("allowed_domain: '  '\n").is_err());
    }

    #[test]
    fn zero_rate_limit_is_rejected() {
        let err = parse("allowed_domain: https://app.example.com\nrate_limit_per_minute: 0\n")
            .unwrap_err();
        assert!(err.to_string().contains("rate_limit_per_minute"));
    }

    #[test]
    fn port_465_implies_implicit_tls() {
        let mut cfg = test_config();
        cfg.smtp_port = 465;
        assert_eq!(cfg.tls_mode(), TlsMode::Implicit);

        cfg.smtp_tls = Some(TlsMode::Starttls);
        assert_eq!(cfg.tls_mode(), TlsMode::Starttls);
    }

    #[test]
    fn timeout_parses_humantime() {
        let cfg = parse(
            "allowed_domain: https://app.example.com\nsmtp_timeout: 30s\nsmtp_tls: implicit\n",
        )
        .unwrap();
        assert_eq!(cfg.smtp_timeout, Duration::from_secs(30));
        assert_eq!(cfg.smtp_tls, Some(TlsMode::Implicit));
    }

    #[test]
    fn smtp_settings_fall_back_to_sender_as_username() {
        let settings = test_config().smtp_settings().unwrap();
        assert_eq!(settings.username, "relay@example.com");
        assert_eq!(settings.host, "smtp.example.com");
        assert_eq!(settings.tls, TlsMode::Starttls);
    }

    #[test]
    fn blank_values_count_as_missing() {
        let mut cfg = test_config();
        cfg.sender_password = Some("   ".to_string());
        cfg.smtp_host = None;

        assert_eq!(
            cfg.smtp_settings().unwrap_err(),
            vec!["sender_password", "smtp_host"]
        );
    }

    #[test]
    fn blank_api_key_is_ignored() {
        let mut cfg = test_config();
        cfg.api_key = Some(String::new());
        assert!(cfg.api_key().is_none());
    }

    #[test]
    fn environment_alone_is_enough() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = resolve_config(
            vars(&[
                ("SENDER_EMAIL", "real@corp.example"),
                ("SENDER_PASSWORD", "realpw"),
                ("HOST", "smtp.corp.example"),
                ("SMTP_PORT", "465"),
                ("SMTP_TLS", "implicit"),
                ("SMTP_TIMEOUT", "30s"),
                ("ALLOWED_DOMAIN", "https://real.example"),
                ("API_KEY", "k"),
                ("LISTEN_PORT", "8080"),
                ("RATE_LIMIT_PER_MINUTE", "10"),
                ("TRUST_PROXY_HEADERS", "true"),
                ("PATH", "/usr/bin"),
            ]),
            &dir.path().join("config.yaml"),
        )
        .unwrap();

        assert_eq!(cfg.sender_email.as_deref(), Some("real@corp.example"));
        assert_eq!(cfg.sender_password.as_deref(), Some("realpw"));
        assert_eq!(cfg.smtp_host.as_deref(), Some("smtp.corp.example"));
        assert_eq!(cfg.smtp_port, 465);
        assert_eq!(cfg.smtp_tls, Some(TlsMode::Implicit));
        assert_eq!(cfg.smtp_timeout, Duration::from_secs(30));
        assert_eq!(cfg.allowed_domain, "https://real.example");
        assert_eq!(cfg.api_key(), Some("k"));
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.rate_limit_per_minute, 10);
        assert!(cfg.trust_proxy_headers);
        assert!(cfg.missing_smtp_settings().is_empty());
    }

    #[test]
    fn environment_overrides_file_values() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.yaml");
        fs::write(&path, PLACEHOLDER_YAML).unwrap();

        let cfg = resolve_config(
            vars(&[
                (CONFIG_PATH_VAR, path.to_str().unwrap()),
                ("SENDER_EMAIL", "real@corp.example"),
                ("SENDER_PASSWORD", "realpw"),
                ("ALLOWED_DOMAIN", "https://real.example"),
            ]),
            &dir.path().join("config.yaml"),
        )
        .unwrap();

        assert_eq!(cfg.sender_email.as_deref(), Some("real@corp.example"));
        assert_eq!(cfg.sender_password.as_deref(), Some("realpw"));
        assert_eq!(cfg.allowed_domain, "https://real.example");
        // Untouched by the environment
        assert_eq!(cfg.smtp_host.as_deref(), Some("smtp.gmail.com"));
        assert_eq!(cfg.smtp_port, 465);
    }

    #[test]
    fn blank_environment_value_keeps_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        fs::write(&path, PLACEHOLDER_YAML).unwrap();

        let cfg = resolve_config(vars(&[("SENDER_EMAIL", "")]), &path).unwrap();

        assert_eq!(cfg.sender_email.as_deref(), Some("your-email@example.com"));
    }

    #[test]
    fn explicit_path_wins_over_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("config.yaml");
        let explicit = dir.path().join("other.yaml");
        fs::write(&default_path, "allowed_domain: https://default.example\n").unwrap();
        fs::write(&explicit, "allowed_domain: https://explicit.example\n").unwrap();

        let cfg = resolve_config(
            vars(&[(CONFIG_PATH_VAR, explicit.to_str().unwrap())]),
            &default_path,
        )
        .unwrap();
        assert_eq!(cfg.allowed_domain, "https://explicit.example");
    }

    #[test]
    fn missing_explicit_path_falls_back_to_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let default_path = dir.path().join("config.yaml");
        fs::write(&default_path, "allowed_domain: https://default.example\n").unwrap();
        let absent = dir.path().join("absent.yaml");

        let cfg = resolve_config(
            vars(&[(CONFIG_PATH_VAR, absent.to_str().unwrap())]),
            &default_path,
        )
        .unwrap();
        assert_eq!(cfg.allowed_domain, "https://default.example");
    }

    #[test]
    fn example_file_is_never_used() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("config.example.yaml"), PLACEHOLDER_YAML).unwrap();

        let cfg = resolve_config(
            vars(&[("ALLOWED_DOMAIN", "https://real.example")]),
            &dir.path().join("config.yaml"),
        )
        .unwrap();

        assert_eq!(
            cfg.missing_smtp_settings(),
            vec!["sender_email", "sender_password", "smtp_host"]
        );
    }

    #[test]
    fn environment_without_allowed_domain_fails() {
        let dir = tempfile::tempdir().unwrap();

        let err = resolve_config(
            vars(&[
                ("SENDER_EMAIL", "real@corp.example"),
                ("SENDER_PASSWORD", "realpw"),
                ("HOST", "smtp.corp.example"),
            ]),
            &dir.path().join("config.yaml"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("ALLOWED_DOMAIN"));
    }

    #[test]
    fn smtp_host_takes_precedence_over_host() {
        let dir = tempfile::tempdir().unwrap();

        let cfg = resolve_config(
            vars(&[
                ("HOST", "workstation.local"),
                ("SMTP_HOST", "smtp.corp.example"),
                ("ALLOWED_DOMAIN", "https://real.example"),
            ]),
            &dir.path().join("config.yaml"),
        )
        .unwrap();
        assert_eq!(cfg.smtp_host.as_deref(), Some("smtp.corp.example"));
    }

    #[test]
    fn unparseable_environment_value_fails() {
        let dir = tempfile::tempdir().unwrap();

        for (key, value) in [("SMTP_PORT", "submission"), ("SMTP_TLS", "ssl")] {
            let result = resolve_config(
                vars(&[(key, value), ("ALLOWED_DOMAIN", "https://real.example")]),
                &dir.path().join("config.yaml"),
            );
            assert!(result.is_err(), "{key}={value} should be rejected");
        }
    }
}
