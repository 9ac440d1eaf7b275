//! Daemon endpoint description.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::request::RpcVersion;

/// URL scheme used to reach a daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => write!(f, "http"),
            Self::Https => write!(f, "https"),
        }
    }
}

/// HTTP Basic credentials for the daemon's RPC interface.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    user: String,
    password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One daemon endpoint: where it lives and how to authenticate.
///
/// Immutable once built; share it behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainEndpoint {
    scheme: Scheme,
    host: String,
    port: u16,
    credentials: Option<Credentials>,
    version: RpcVersion,
    url: String,
}

impl ChainEndpoint {
    pub fn new(
        scheme: Scheme,
        host: impl Into<String>,
        port: u16,
        credentials: Option<Credentials>,
    ) -> Self {
        let host = host.into();
        let url = format!("{scheme}://{host}:{port}");
        Self {
            scheme,
            host,
            port,
            credentials,
            version: RpcVersion::default(),
            url,
        }
    }

    /// Select the JSON-RPC dialect used for this endpoint.
    pub fn with_version(mut self, version: RpcVersion) -> Self {
        self.version = version;
        self
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn version(&self) -> RpcVersion {
        self.version
    }

    /// Base URL, e.g. `http://127.0.0.1:8570`. Never contains credentials.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl fmt::Display for ChainEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
