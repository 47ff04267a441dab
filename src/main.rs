mod analyze;
mod catalog;
mod classifier;
mod config;
mod engine;
mod error;
mod executor;
mod github;
mod llm;
mod logger;
mod parser;
mod report;
#[cfg(test)]
mod test_support;
mod webhook;

use std::error::Error;

use clap::{Args, Parser, Subcommand};

use crate::config::Settings;

#[derive(Parser)]
#[command(
    name = "impactgrep",
    version,
    about = "Select the recorded test cases a commit impacts. With no subcommand, analyzes IMPACTGREP_COMMIT once."
)]
struct Cli {
    /// Debug-level logging (RUST_LOG overrides)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand)]
enum CliCommand {
    /// Serve the push-event webhook at POST /webhook
    Serve(ServeArgs),
    /// Print the path-rule verdict for each file, without network access
    Classify(ClassifyArgs),
}

#[derive(Args, Debug, Clone)]
struct ServeArgs {
    #[arg(long, help = "Bind address (or set IMPACTGREP_LISTEN)")]
    listen: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct ClassifyArgs {
    #[arg(required = true, help = "Changed file paths")]
    paths: Vec<String>,
}

fn classify(settings: &Settings, args: &ClassifyArgs) -> Result<(), Box<dyn Error>> {
    let classifier = settings.classifier()?;
    let width = args.paths.iter().map(|p| p.len()).max().unwrap_or(0);
    for path in &args.paths {
        println!("{:<width$}  {}", path, classifier.classify(path));
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    logger::init(cli.verbose);

    let settings = Settings::from_env();
    match cli.command {
        None => analyze::run(&settings),
        Some(CliCommand::Serve(args)) => webhook::run(&settings, args.listen),
        Some(CliCommand::Classify(args)) => classify(&settings, &args),
    }
}
