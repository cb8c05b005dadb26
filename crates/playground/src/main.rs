//! `pg`: run code on a playground server, share it, and load shared snippets

mod commands;
mod config;
mod render;

use std::env;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use facet::Facet;
use facet_args as args;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use crate::config::{Overrides, ResolvedConfig};
use crate::render::RenderConfig;

/// Run command - execute a file (or a shared snippet) on the server
#[derive(Facet, Debug)]
struct RunArgs {
    /// Source file to run
    #[facet(args::positional, default)]
    file: Option<String>,

    /// Language tag (inferred from the file extension when omitted)
    #[facet(args::named, args::short = 'l', default)]
    language: Option<String>,

    /// Run a saved snippet, given as an id or a share link
    #[facet(args::named, default)]
    snippet: Option<String>,
}

/// Save command - store a file as a snippet and print its share link
#[derive(Facet, Debug)]
struct SaveArgs {
    /// Source file to save
    #[facet(args::positional)]
    file: String,

    /// Language tag (inferred from the file extension when omitted)
    #[facet(args::named, args::short = 'l', default)]
    language: Option<String>,
}

/// Load command - fetch a snippet by id or share link
#[derive(Facet, Debug)]
struct LoadArgs {
    /// Snippet id or share link
    #[facet(args::positional)]
    snippet: String,

    /// Write the code to this file instead of stdout
    #[facet(args::named, args::short = 'o', default)]
    output: Option<String>,
}

/// Languages command - list the languages the server offers
#[derive(Facet, Debug)]
struct LanguagesArgs {}

#[derive(Facet, Debug)]
#[repr(u8)]
enum PgCommand {
    /// Run a program and stream its output
    Run(RunArgs),
    /// Save a snippet
    Save(SaveArgs),
    /// Load a snippet
    Load(LoadArgs),
    /// List known languages
    Languages(LanguagesArgs),
}

#[derive(Facet, Debug)]
struct PgArgs {
    /// Server host, e.g. `localhost:8080` (overrides config and PLAYGROUND_SERVER)
    #[facet(args::named, args::short = 's', default)]
    server: Option<String>,

    /// Use wss:// and https://
    #[facet(args::named)]
    secure: bool,

    #[facet(args::subcommand)]
    command: PgCommand,
}

fn parse_args() -> Result<PgArgs, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    let args_refs: Vec<&str> = args.iter().map(|s| s.as_str()).collect();

    facet_args::from_slice(&args_refs).map_err(|e| {
        eprintln!("{:?}", miette::Report::new(e));
        "Failed to parse arguments".to_string()
    })
}

/// Logs go to stderr so stdout carries program output only
fn init_tracing() {
    let filter = tracing_subscriber::filter::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::filter::EnvFilter::new("warn"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .compact();
    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(filter))
        .init();
}

fn main() -> ExitCode {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .build(),
        )
    }))
    .ok();

    init_tracing();

    let plain = RenderConfig::plain();
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", plain.error(&e));
            return ExitCode::FAILURE;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{}", plain.error(&format!("Failed to create tokio runtime: {e}")));
            return ExitCode::FAILURE;
        }
    };

    let result = runtime.block_on(dispatch(args));
    // A blocking stdin read cannot be cancelled; don't wait for it.
    runtime.shutdown_background();

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", plain.error(&format!("{e:?}")));
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(args: PgArgs) -> eyre::Result<ExitCode> {
    let overrides = Overrides {
        server: args.server,
        secure: args.secure.then_some(true),
    };
    let config = ResolvedConfig::discover(&overrides)?;
    tracing::debug!(
        source = ?config.source,
        execute = %config.endpoints.execute_url(),
        "resolved configuration"
    );

    match args.command {
        PgCommand::Run(run) => {
            let file = run.file.map(Utf8PathBuf::from);
            commands::run(
                &config,
                file.as_deref(),
                run.language.as_deref(),
                run.snippet.as_deref(),
            )
            .await
        }
        PgCommand::Save(save) => {
            commands::save(&config, &Utf8PathBuf::from(save.file), save.language.as_deref())
                .await?;
            Ok(ExitCode::SUCCESS)
        }
        PgCommand::Load(load) => {
            let output = load.output.map(Utf8PathBuf::from);
            commands::load(&config, &load.snippet, output.as_deref()).await?;
            Ok(ExitCode::SUCCESS)
        }
        PgCommand::Languages(_) => {
            commands::languages(&config.render);
            Ok(ExitCode::SUCCESS)
        }
    }
}
