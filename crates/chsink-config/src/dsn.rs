//! Store address (DSN) handling.

use url::Url;

use crate::{is_identifier, ConfigError, Result, DEFAULT_DATABASE};

/// A validated store address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    /// The address exactly as configured, credentials and settings included.
    pub url: String,
    /// Database taken from the URL path.
    pub database: String,
}

/// Parse a store URL such as `http://user:pw@host:8123/k6?dial_timeout=1s`.
///
/// The URL needs an `http` or `https` scheme and a host. The path, without its leading slash,
/// names the database; an empty path selects `default`.
pub fn parse_dsn(text: &str) -> Result<Dsn> {
    let invalid = |reason: &str| ConfigError::InvalidUrl {
        url: redact_url(text),
        reason: reason.to_string(),
    };

    let parsed = Url::parse(text).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("unsupported scheme"));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(invalid("empty host url"));
    }

    let path = parsed.path().trim_start_matches('/');
    let database = if path.is_empty() {
        DEFAULT_DATABASE.to_string()
    } else {
        path.to_string()
    };
    if !is_identifier(&database) {
        return Err(ConfigError::InvalidIdentifier {
            what: "database",
            name: database,
        });
    }

    Ok(Dsn {
        url: text.to_string(),
        database,
    })
}

/// Replace the password of a URL with `xxxxx` for logging.
///
/// Unparseable input is returned unchanged minus anything that looks like
/// userinfo.
pub fn redact_url(text: &str) -> String {
    match Url::parse(text) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("xxxxx"));
            }
            parsed.to_string()
        }
        Err(_) => match (text.find("://"), text.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                format!("{}://xxxxx@{}", &text[..scheme_end], &text[at + 1..])
            }
            _ => text.to_string(),
        },
    }
}
