//! Values that must not reach the logs verbatim.

use std::fmt::{self, Debug, Display, Formatter};
use std::sync::OnceLock;

use regex::Regex;

use fedquery_core::PluginConfig;

/// Loggable form of a secret-bearing value.
pub trait Redact {
    fn redacted(&self) -> String;
}

impl Redact for String {
    fn redacted(&self) -> String {
        redact_dsn(self)
    }
}

/// Plugin settings show their keys only.
impl Redact for PluginConfig {
    fn redacted(&self) -> String {
        let mut keys: Vec<&str> = self.keys().map(String::as_str).collect();
        keys.sort_unstable();
        let pairs: Vec<String> = keys.into_iter().map(|k| format!("{k}=***")).collect();
        format!("{{{}}}", pairs.join(", "))
    }
}

/// A connection string or plugin configuration. Both `Debug` and `Display`
/// print the redacted form; `.expose()` reaches the value.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Sensitive<T>(T);

impl<T> Sensitive<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> From<T> for Sensitive<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl<T: Redact> Debug for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.redacted())
    }
}

impl<T: Redact> Display for Sensitive<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.redacted())
    }
}

fn keyword_password() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(password|pwd|passwd)\s*=\s*('[^']*'|[^;\s]*)")
            .expect("password pattern is valid")
    })
}

/// Masks the password of a URL or keyword/value connection string.
pub fn redact_dsn(raw: &str) -> String {
    if let Ok(mut url) = url::Url::parse(raw) {
        if url.password().is_some() && url.set_password(Some("***")).is_ok() {
            return url.to_string();
        }
        if url.has_host() {
            return url.to_string();
        }
    }
    keyword_password().replace_all(raw, "$1=***").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_formats_redacted() {
        let dsn = Sensitive::new("postgres://u:p@h/db".to_string());
        assert_eq!(format!("{dsn:?}"), "postgres://u:***@h/db");
        assert_eq!(dsn.to_string(), "postgres://u:***@h/db");
        assert_eq!(dsn.expose(), "postgres://u:p@h/db");
    }

    #[test]
    fn test_plugin_config_shows_keys_only() {
        let mut config = PluginConfig::new();
        config.insert("token".into(), "ghp_secret".into());
        config.insert("owner".into(), "rust-lang".into());
        let config = Sensitive::from(config);
        assert_eq!(format!("{config:?}"), "{owner=***, token=***}");
        assert_eq!(Sensitive::<PluginConfig>::default().to_string(), "{}");
    }

    #[test]
    fn test_redact_keyword_dsn() {
        assert_eq!(
            redact_dsn("host=db user=app password=hunter2 dbname=x"),
            "host=db user=app password=*** dbname=x"
        );
        assert_eq!(redact_dsn("Server=a;Pwd='x y';"), "Server=a;Pwd=***;");
        assert_eq!(redact_dsn("/tmp/file.duckdb"), "/tmp/file.duckdb");
    }
}
