use std::fmt;
use std::str::FromStr;

use url::Url;

/// How the caller's identity is carried to a downstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// Same audience: the inbound bearer token is passed through unchanged.
    Forward,
    /// Different audience: the inbound token is exchanged on behalf of the caller.
    OnBehalfOf,
}

impl RelayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forward => "forward",
            Self::OnBehalfOf => "obo",
        }
    }
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRelayMode(pub String);

impl FromStr for RelayMode {
    type Err = UnknownRelayMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "forward" | "same-audience" => Ok(Self::Forward),
            "obo" | "on-behalf-of" | "exchange" => Ok(Self::OnBehalfOf),
            other => Err(UnknownRelayMode(other.to_string())),
        }
    }
}

/// A downstream service the relay may call.
///
/// Configured once at startup and shared read-only between requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownstreamTarget {
    pub name: String,
    pub base_url: Url,
    pub audience: String,
    pub scopes: Vec<String>,
    pub mode: RelayMode,
    // Default path called when relaying to this target.
    pub path: String,
}

impl DownstreamTarget {
    /// Resolve `path` against the base address, keeping any base path prefix.
    pub fn endpoint(&self, path: &str) -> Result<Url, url::ParseError> {
        let mut base = self.base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path.trim_start_matches('/'))
    }
}
