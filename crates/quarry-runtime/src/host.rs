use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// Expands a base-url template like
/// `http://cdn.example.com/{app}/{package}/{version}`.
///
/// `{package}` and `{version}` come from the call site; any other `{key}`
/// must be present in the placeholder table.
#[derive(Debug, Clone, Default)]
pub struct UrlBuilder {
    template: String,
    placeholders: HashMap<String, String>,
}

impl UrlBuilder {
    pub fn new(template: String, placeholders: HashMap<String, String>) -> Self {
        Self {
            template,
            placeholders,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.template.is_empty()
    }

    /// Base URL for one package version.
    ///
    /// # Errors
    ///
    /// Fails on an unknown or unterminated placeholder.
    pub fn base_for(&self, package: &str, version: &str) -> Result<String> {
        let mut out = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let Some(end) = after.find('}') else {
                return Err(Error::UnknownPlaceholder(after.to_owned()));
            };
            let key = &after[..end];
            let value = match key {
                "package" => package,
                "version" => version,
                _ => self
                    .placeholders
                    .get(key)
                    .map(String::as_str)
                    .ok_or_else(|| Error::UnknownPlaceholder(key.to_owned()))?,
            };
            out.push_str(value);
            rest = &after[end + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

/// Join a base URL and a file name with exactly one slash.
pub fn join_url(base: &str, file: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), file)
}

/// Append a timestamp query parameter so shared caches treat the URL as
/// fresh.
pub fn with_cache_buster(url: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{}{}t={}", url, separator, millis)
}
