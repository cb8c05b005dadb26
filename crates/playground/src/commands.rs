//! `pg` subcommands

use std::fs;
use std::io::Write;
use std::process::ExitCode;

use camino::Utf8Path;
use eyre::{Result, WrapErr, eyre};
use playground_protocol::{KNOWN_LANGUAGES, Source, language_for_extension, lookup_language};
use playground_session::{Error, Playground, SessionState, SnippetClient, SnippetId, Termination};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::ResolvedConfig;
use crate::render::RenderConfig;

/// Pick the language tag: explicit flag first, then the file extension.
pub fn infer_language(path: &Utf8Path, explicit: Option<&str>) -> Result<String> {
    if let Some(language) = explicit {
        if lookup_language(language).is_none() {
            tracing::warn!(language, "language is not in the known list; sending it anyway");
        }
        return Ok(language.to_string());
    }
    path.extension()
        .and_then(language_for_extension)
        .map(str::to_string)
        .ok_or_else(|| eyre!("Cannot infer the language of {path}; pass it with -l"))
}

/// Read a source file and work out its language
pub fn read_source(path: &Utf8Path, language: Option<&str>) -> Result<Source> {
    let language = infer_language(path, language)?;
    let code = fs::read_to_string(path).wrap_err_with(|| format!("Failed to read {path}"))?;
    Ok(Source::new(language, code))
}

fn parse_snippet_id(input: &str) -> Result<SnippetId> {
    SnippetId::from_share_link(input)
        .ok_or_else(|| eyre!("`{input}` is neither a snippet id nor a share link"))
}

/// Run a program, streaming its output to stdout and forwarding stdin lines
/// while it runs. Ctrl-C cancels the run.
pub async fn run(
    config: &ResolvedConfig,
    file: Option<&Utf8Path>,
    language: Option<&str>,
    snippet: Option<&str>,
) -> Result<ExitCode> {
    let render = &config.render;
    let source = match (file, snippet) {
        (Some(_), Some(_)) => return Err(eyre!("Pass either a file or --snippet, not both")),
        (Some(path), None) => read_source(path, language)?,
        (None, Some(snippet)) => {
            let id = parse_snippet_id(snippet)?;
            let mut source = SnippetClient::new(config.endpoints.clone())?
                .load(&id)
                .await
                .wrap_err_with(|| format!("Failed to load snippet {id}"))?;
            if let Some(language) = language {
                source.language = language.to_string();
            }
            source
        }
        (None, None) => return Err(eyre!("Nothing to run: pass a file or --snippet")),
    };

    let mut playground = Playground::new(config.endpoints.clone());
    eprintln!("{}", render.status("run", &source.language));
    playground.run(&source.language, &source.code);

    let output = playground.output_reader();
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = playground.next_event() => {
                if event.is_none() {
                    break;
                }
            }
            line = stdin.next_line(), if stdin_open && playground.state() == SessionState::Running => {
                match line {
                    Ok(Some(line)) => match playground.submit_input(&line) {
                        Ok(()) => {}
                        // The run is ending; its closing event is next in line
                        Err(Error::ChannelNotOpen) => {
                            tracing::debug!("input dropped: run is ending");
                        }
                        Err(e) => eprintln!("{}", render.error(&e.to_string())),
                    },
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        tracing::warn!(error = %e, "stopped reading stdin");
                        stdin_open = false;
                    }
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                playground.cancel();
            }
        }

        for chunk in output.since(printed) {
            writeln!(stdout, "{chunk}")?;
            printed += 1;
        }
        stdout.flush()?;
    }

    Ok(report(render, &playground))
}

/// Describe how the run ended on stderr and pick the exit status
fn report(render: &RenderConfig, playground: &Playground) -> ExitCode {
    match (playground.state(), playground.termination()) {
        (SessionState::Failed, _) => {
            let reason = playground.last_error().unwrap_or("connection failed");
            eprintln!("{}", render.error(reason));
            ExitCode::FAILURE
        }
        (_, Some(Termination::Cancelled)) => {
            eprintln!("{}", render.note("cancelled"));
            ExitCode::FAILURE
        }
        (_, Some(termination)) if termination.is_timeout() => {
            eprintln!("{}", render.error("execution timed out"));
            ExitCode::FAILURE
        }
        (_, Some(termination)) if termination.is_clean() => {
            eprintln!("{}", render.note(&termination.to_string()));
            ExitCode::SUCCESS
        }
        (_, Some(termination)) => {
            eprintln!("{}", render.error(&termination.to_string()));
            ExitCode::FAILURE
        }
        (state, None) => {
            eprintln!("{}", render.error(&format!("run ended while {state}")));
            ExitCode::FAILURE
        }
    }
}

/// Save a file as a snippet and print its share link
pub async fn save(config: &ResolvedConfig, file: &Utf8Path, language: Option<&str>) -> Result<()> {
    let source = read_source(file, language)?;
    let client = SnippetClient::new(config.endpoints.clone())?;
    let id = client
        .save(&source.language, &source.code)
        .await
        .wrap_err("Failed to save snippet")?;
    let link = client.share_link(&id)?;

    eprintln!("{}", config.render.success("saved", id.as_str()));
    println!("{link}");
    Ok(())
}

/// Fetch a snippet and print it, or write it to `output`
pub async fn load(config: &ResolvedConfig, id_or_link: &str, output: Option<&Utf8Path>) -> Result<()> {
    let id = parse_snippet_id(id_or_link)?;
    let client = SnippetClient::new(config.endpoints.clone())?;
    let snippet = client
        .load(&id)
        .await
        .wrap_err_with(|| format!("Failed to load snippet {id}"))?;

    eprintln!("{}", config.render.status("language", &snippet.language));
    match output {
        Some(path) => {
            fs::write(path, &snippet.code).wrap_err_with(|| format!("Failed to write {path}"))?;
            eprintln!("{}", config.render.success("wrote", path.as_str()));
        }
        None => print!("{}", snippet.code),
    }
    Ok(())
}

/// List the languages the reference service offers
pub fn languages(render: &RenderConfig) {
    for language in KNOWN_LANGUAGES {
        let extensions = language
            .extensions
            .iter()
            .map(|ext| format!(".{ext}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!(
            "{:<12} {:<12} {}",
            language.id,
            language.name,
            render.note(&extensions)
        );
    }
}
