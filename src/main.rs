use anyhow::{bail, Context};
use clap::Parser;
use inquire::error::InquireResult;

mod app;
mod catalog;
mod cli;
mod config;
mod eid;
mod ingest;
mod labeler;
mod semantic;
mod storage;
#[cfg(test)]
mod tests;
mod web;

use app::AppFactory;
use config::Config;

/// Install the global subscriber. `try_init` also routes `log` records into
/// it, which is what every module here logs through.
fn init_tracing_with<W>(level: &str, writer: W) -> anyhow::Result<()>
where
    W: for<'a> tracing_subscriber::fmt::MakeWriter<'a> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(writer)
        .try_init()
        .map_err(|err| anyhow::anyhow!("Failed to set tracing subscriber: {err}"))
}

fn init_tracing(config: &Config) -> anyhow::Result<()> {
    init_tracing_with(&config.log_level, std::io::stdout)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = cli::Args::parse();

    let paths = AppFactory::get_paths()?;
    let config = Config::load_with(&paths.base_path)?;
    init_tracing(&config)?;
    log::debug!("data directory {}", config.base_path().display());

    let app = AppFactory::create_app(&paths, &config)?;

    match args.command {
        cli::Command::Daemon { addr } => {
            let addr = addr.unwrap_or_else(|| config.listen_addr.clone());
            web::start_daemon(app, &addr)
        }

        cli::Command::Search { query, scores } => {
            if scores {
                let results = app.search_scored(&query)?;
                if results.is_empty() {
                    eprintln!("No matching image");
                }
                return print_json(&results);
            }

            let images = app.search(&query)?;
            if images.is_empty() {
                eprintln!("No matching image");
            }
            print_json(&images)
        }

        cli::Command::Add { file, labels } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let labels = labels.as_deref().map(labeler::parse_labels).transpose()?;

            let item = app.ingest(&data, labels)?;
            print_json(&item)
        }

        cli::Command::List {} => print_json(&app.list()?),

        cli::Command::Labels { id } => print_json(&app.item(&id)?),

        cli::Command::Delete { id, yes } => {
            if !yes {
                match inquire::prompt_confirmation(format!("Delete image {id}?")) {
                    InquireResult::Ok(true) => {}
                    InquireResult::Ok(false) => return Ok(()),
                    InquireResult::Err(err) => bail!("An error occurred: {}", err),
                }
            }

            let item = app.delete(&id)?;
            println!("{} removed", item.id);
            Ok(())
        }
    }
}
