//! Client core for an interactive remote code-execution service.
//!
//! A [`Playground`] drives one remote run at a time: it opens the execution
//! channel, sends the program as the first frame, accumulates streamed output
//! in an [`OutputLog`] and forwards interactive input while the run is active.
//! [`SnippetClient`] saves and loads snippets independently of any run.
//!
//! ```no_run
//! # async fn demo() -> playground_session::Result<()> {
//! use playground_session::{Endpoints, Playground, SessionState};
//!
//! let mut playground = Playground::new(Endpoints::new("localhost:8080", false)?);
//! playground.run("python3", "print(1)");
//! assert_eq!(playground.wait_for_completion().await, SessionState::Closed);
//! println!("{}", playground.output_reader().render());
//! # Ok(())
//! # }
//! ```

pub mod connection;
pub mod endpoints;
mod error;
pub mod output_log;
pub mod playground;
pub mod session;
pub mod snippet;

pub use connection::{
    Channel, Connection, ConnectionEvent, Connector, Envelope, EventSender, Payload, Termination,
    WsConnector,
};
pub use endpoints::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_SERVER, Endpoints};
pub use error::{Error, Result};
pub use output_log::{LogReader, OutputLog};
pub use playground::{Playground, SessionStatus};
pub use session::{Effect, RunId, Session, SessionState, Step, transition};
pub use snippet::{Snippet, SnippetClient, SnippetId};

pub use playground_protocol::{KNOWN_LANGUAGES, LanguageInfo, Source, language_for_extension, lookup_language};
