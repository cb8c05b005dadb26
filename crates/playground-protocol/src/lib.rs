//! Shared wire types for the playground
//!
//! The execution channel is a WebSocket at [`EXECUTE_PATH`]: the client sends a
//! JSON [`Source`] as its first frame, then raw text frames (one line of
//! interactive input each). The service answers with raw text chunks of program
//! output and closes the channel when the run ends.
//!
//! The snippet store speaks plain JSON over HTTP: `POST` [`SAVE_PATH`] with a
//! [`Source`] body answers a [`SaveResponse`], `GET` [`SHARE_PATH`]`/{id}`
//! answers a [`Source`].

use serde::{Deserialize, Serialize};

mod languages;
pub use languages::{KNOWN_LANGUAGES, LanguageInfo, language_for_extension, lookup_language};

/// Path of the execution WebSocket endpoint
pub const EXECUTE_PATH: &str = "/execute";

/// Path of the snippet save endpoint
pub const SAVE_PATH: &str = "/save";

/// Prefix of the snippet load endpoint and of client share links
pub const SHARE_PATH: &str = "/share";

/// Close reason the service sends when a run hits its execution deadline
pub const TIMEOUT_REASON: &str = "Execution timeout";

/// A `{language, code}` pair.
///
/// This is the first frame of every run, the body of a save request and the
/// body of a load response.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    /// Identifier of the target execution environment (e.g. `python3`)
    pub language: String,
    /// Program text
    pub code: String,
}

impl Source {
    pub fn new(language: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            code: code.into(),
        }
    }
}

/// Successful answer to a save request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveResponse {
    /// Opaque identifier assigned by the store
    pub id: String,
}

/// Error body the reference service attaches to non-2xx answers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}
