//! Save and load snippets against the snippet store

use std::fmt;

use playground_protocol::{ErrorBody, SHARE_PATH, SaveResponse, Source};
use reqwest::{Response, StatusCode};
use url::Url;

use crate::endpoints::Endpoints;
use crate::error::{Error, Result};

/// A stored `{language, code}` pair
pub type Snippet = Source;

/// Opaque identifier the store assigns to a saved snippet
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SnippetId(String);

impl SnippetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Accept either a bare identifier or a share link
    /// (`http(s)://<host>/share/<id>`) and extract the identifier.
    ///
    /// Returns `None` for empty input and for links that do not point at a
    /// shared snippet.
    pub fn from_share_link(input: &str) -> Option<Self> {
        let input = input.trim();
        if input.is_empty() {
            return None;
        }
        if !input.contains("://") {
            return Some(Self::new(input));
        }

        let url = Url::parse(input).ok()?;
        let mut segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        let id = segments.pop()?;
        if segments.last() != Some(&SHARE_PATH.trim_start_matches('/')) {
            return None;
        }
        // `Endpoints::share_link` escapes the id as a path segment
        let id = urlencoding::decode(id).ok()?;
        (!id.is_empty()).then(|| Self::new(id))
    }
}

impl fmt::Display for SnippetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<SaveResponse> for SnippetId {
    fn from(response: SaveResponse) -> Self {
        Self(response.id)
    }
}

/// Stateless client for the snippet store.
///
/// Each call is an independent request; cloning shares the connection pool.
#[derive(Debug, Clone)]
pub struct SnippetClient {
    http: reqwest::Client,
    endpoints: Endpoints,
}

impl SnippetClient {
    /// A client whose connections honour the endpoints' connect timeout
    pub fn new(endpoints: Endpoints) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(endpoints.connect_timeout())
            .build()
            .map_err(|e| Error::Persistence(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_http(endpoints, http))
    }

    pub fn with_http(endpoints: Endpoints, http: reqwest::Client) -> Self {
        Self { http, endpoints }
    }

    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// Persist a snippet and return the identifier the store assigned.
    pub async fn save(&self, language: &str, code: &str) -> Result<SnippetId> {
        let url = self.endpoints.save_url()?;
        let body = Source::new(language, code);

        tracing::debug!(%url, language, len = code.len(), "saving snippet");

        let response = self
            .http
            .post(url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Persistence(format!("save request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            tracing::info!(%url, %status, %detail, "snippet store rejected save");
            return Err(Error::Persistence(format!("save failed with {status}: {detail}")));
        }

        let saved: SaveResponse = response
            .json()
            .await
            .map_err(|e| Error::Persistence(format!("malformed save response: {e}")))?;
        if saved.id.trim().is_empty() {
            return Err(Error::Persistence(
                "save response carried an empty id".to_string(),
            ));
        }

        let id = SnippetId::from(saved);
        tracing::info!(%id, "snippet saved");
        Ok(id)
    }

    /// Fetch a previously saved snippet.
    pub async fn load(&self, id: &SnippetId) -> Result<Snippet> {
        let url = self.endpoints.load_url(id)?;

        tracing::debug!(%url, "loading snippet");

        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Persistence(format!("load request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let detail = error_detail(response).await;
            if status == StatusCode::NOT_FOUND {
                tracing::info!(%id, "snippet not found");
            } else {
                tracing::info!(%id, %status, %detail, "snippet store rejected load");
            }
            return Err(Error::NotFound(format!("{id} ({status}: {detail})")));
        }

        let snippet: Snippet = response
            .json()
            .await
            .map_err(|e| Error::Persistence(format!("malformed snippet {id}: {e}")))?;
        tracing::info!(%id, language = %snippet.language, "snippet loaded");
        Ok(snippet)
    }

    /// Link that opens the snippet in the client
    pub fn share_link(&self, id: &SnippetId) -> Result<Url> {
        self.endpoints.share_link(id)
    }
}

/// Best-effort description of a non-2xx answer
async fn error_detail(response: Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) => match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => body.error,
            Err(_) if !text.trim().is_empty() => text.trim().to_string(),
            Err(_) => status
                .canonical_reason()
                .unwrap_or("no details")
                .to_string(),
        },
        Err(_) => "no details".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_ids_pass_through() {
        assert_eq!(
            SnippetId::from_share_link("  abc123 "),
            Some(SnippetId::new("abc123"))
        );
        assert_eq!(SnippetId::from_share_link(""), None);
    }

    #[test]
    fn share_links_yield_their_id() {
        assert_eq!(
            SnippetId::from_share_link("http://localhost:3000/share/abc123"),
            Some(SnippetId::new("abc123"))
        );
        assert_eq!(
            SnippetId::from_share_link("https://example.com/playground/share/xyz/"),
            Some(SnippetId::new("xyz"))
        );
    }

    #[test]
    fn share_link_round_trips_escaped_ids() {
        let endpoints = Endpoints::new("localhost:8080", false).unwrap();
        let id = SnippetId::new("a/b c");
        let link = endpoints.share_link(&id).unwrap();
        assert_eq!(SnippetId::from_share_link(link.as_str()), Some(id));
    }

    #[test]
    fn escaped_links_decode_to_the_stored_id() {
        assert_eq!(
            SnippetId::from_share_link("http://localhost:3000/share/%E4%BD%A0%20x"),
            Some(SnippetId::new("\u{4f60} x"))
        );
        // Not UTF-8 once decoded
        assert_eq!(SnippetId::from_share_link("http://localhost:3000/share/%FF"), None);
    }

    #[test]
    fn client_keeps_the_configured_timeout() {
        let endpoints = Endpoints::new("localhost:8080", false)
            .unwrap()
            .with_connect_timeout(std::time::Duration::from_secs(3));
        let client = SnippetClient::new(endpoints).unwrap();
        assert_eq!(
            client.endpoints().connect_timeout(),
            std::time::Duration::from_secs(3)
        );
    }

    #[test]
    fn unrelated_links_are_rejected() {
        assert_eq!(SnippetId::from_share_link("http://example.com/"), None);
        assert_eq!(SnippetId::from_share_link("http://example.com/docs/abc"), None);
    }
}
