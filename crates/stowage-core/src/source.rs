//! Remote source locators.
//!
//! A [`SourceLocator`] is the identity of a transfer: at most one active
//! download exists per locator, and the installed artifact is named after the
//! locator's last path segment.

use crate::error::{Result, StowageError};
use serde::{Deserialize, Serialize};
use url::Url;

/// A validated http(s) URL an artifact can be fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceLocator {
    url: String,
    file_name: String,
}

impl SourceLocator {
    /// Parse and validate a source URL.
    ///
    /// The URL must use `http` or `https` and end in a non-empty file name.
    /// Query strings such as `?download=true` are kept in the locator but
    /// ignored when deriving the file name.
    pub fn parse(input: &str) -> Result<Self> {
        let invalid = |message: &str| StowageError::InvalidSource {
            source_url: input.to_string(),
            message: message.to_string(),
        };

        let url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        }

        let last_segment = url
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .ok_or_else(|| invalid("URL has no file name"))?;

        let file_name = urlencoding::decode(last_segment)
            .map_err(|e| invalid(&format!("file name is not valid UTF-8: {}", e)))?
            .into_owned();

        if file_name.contains('/') || file_name.contains('\\') || file_name == ".." {
            return Err(invalid("file name must not contain path separators"));
        }

        Ok(Self {
            url: url.to_string(),
            file_name,
        })
    }

    /// The full URL, used as the unique transfer key.
    pub fn as_str(&self) -> &str {
        &self.url
    }

    /// Decoded last path segment, e.g. `gemma-3-1b-it-Q4_K_M.gguf`.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Name of the artifact this source installs. Equal to the file name.
    pub fn artifact_name(&self) -> &str {
        &self.file_name
    }
}

impl std::fmt::Display for SourceLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.url)
    }
}

impl std::str::FromStr for SourceLocator {
    type Err = StowageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for SourceLocator {
    type Error = StowageError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<SourceLocator> for String {
    fn from(source: SourceLocator) -> Self {
        source.url
    }
}
