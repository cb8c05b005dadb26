//! Endpoint URLs derived from the configured server host
//!
//! The server is given as `host[:port]` (optionally with a path prefix). A
//! scheme may be included, in which case it decides whether TLS is used.
//! Plain hosts follow the `secure` flag: `ws://` + `http://` or `wss://` +
//! `https://`.

use std::time::Duration;

use playground_protocol::{EXECUTE_PATH, SAVE_PATH, SHARE_PATH};
use url::Url;

use crate::error::{Error, Result};
use crate::snippet::SnippetId;

/// Server host used when nothing is configured
pub const DEFAULT_SERVER: &str = "localhost:8080";

/// Default deadline for the WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolved URLs for the execution channel, the snippet store and share links
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    /// `http(s)://<server>/`, base of the snippet store
    api: Url,
    /// `ws(s)://<server>/execute`
    execute: Url,
    /// `http(s)://<client-host>/`, base of share links
    client: Url,
    connect_timeout: Duration,
}

impl Endpoints {
    /// Build endpoints for `server`.
    pub fn new(server: &str, secure: bool) -> Result<Self> {
        let (secure, host) = split_scheme(server, secure)?;
        let api = base_url(host, secure)?;
        let execute = execute_url(host, secure)?;
        Ok(Self {
            client: api.clone(),
            api,
            execute,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Use a different host for share links (the host the client is served from).
    pub fn with_client_host(mut self, client_host: &str) -> Result<Self> {
        let secure = self.api.scheme() == "https";
        let (secure, host) = split_scheme(client_host, secure)?;
        self.client = base_url(host, secure)?;
        Ok(self)
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn execute_url(&self) -> &Url {
        &self.execute
    }

    pub fn api_base(&self) -> &Url {
        &self.api
    }

    pub fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// `POST` target for saving a snippet
    pub fn save_url(&self) -> Result<Url> {
        append_segments(&self.api, &[SAVE_PATH.trim_start_matches('/')])
    }

    /// `GET` target for loading a snippet
    pub fn load_url(&self, id: &SnippetId) -> Result<Url> {
        append_segments(&self.api, &[SHARE_PATH.trim_start_matches('/'), id.as_str()])
    }

    /// Deep link back into the client that triggers the load-by-id flow
    pub fn share_link(&self, id: &SnippetId) -> Result<Url> {
        append_segments(&self.client, &[SHARE_PATH.trim_start_matches('/'), id.as_str()])
    }
}

/// Split an optional scheme off `server`. An explicit scheme overrides `secure`.
fn split_scheme(server: &str, secure: bool) -> Result<(bool, &str)> {
    let server = server.trim().trim_end_matches('/');
    let (secure, host) = match server.split_once("://") {
        Some(("http" | "ws", rest)) => (false, rest),
        Some(("https" | "wss", rest)) => (true, rest),
        Some((scheme, _)) => {
            return Err(Error::InvalidEndpoint(format!(
                "unsupported scheme `{scheme}` in `{server}`"
            )));
        }
        None => (secure, server),
    };
    if host.is_empty() {
        return Err(Error::InvalidEndpoint("server host is empty".to_string()));
    }
    Ok((secure, host))
}

fn base_url(host: &str, secure: bool) -> Result<Url> {
    let scheme = if secure { "https" } else { "http" };
    parse_with_host(&format!("{scheme}://{host}/"))
}

fn execute_url(host: &str, secure: bool) -> Result<Url> {
    let scheme = if secure { "wss" } else { "ws" };
    parse_with_host(&format!("{scheme}://{host}{EXECUTE_PATH}"))
}

fn parse_with_host(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::InvalidEndpoint(format!("`{raw}`: {e}")))?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidEndpoint(format!("`{raw}` has no host")));
    }
    Ok(url)
}

fn append_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| Error::InvalidEndpoint(format!("`{base}` cannot carry a path")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}
