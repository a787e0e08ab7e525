use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use podindex::{
    Cli, Command, NoopReporter, ProcessArgs, ProgressEvent, ProgressReporter, ServeArgs,
    SharedProgressReporter, SystemClock, TracingReporter, process_feed, router,
};

// Emoji with fallback for terminals without Unicode support
static MICROPHONE: Emoji<'_, '_> = Emoji("🎙️  ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static MOVE: Emoji<'_, '_> = Emoji("📦 ", "[>] ");
static HEADPHONES: Emoji<'_, '_> = Emoji("🎧 ", "[i] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static PARTY: Emoji<'_, '_> = Emoji("🎉 ", "[*] ");

/// Progress reporter drawing a spinner on the terminal
struct ConsoleReporter {
    bar: ProgressBar,
}

impl ConsoleReporter {
    fn new() -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {wide_msg}") {
            bar.set_style(style);
        }
        bar.enable_steady_tick(std::time::Duration::from_millis(100));
        Self { bar }
    }
}

impl ProgressReporter for ConsoleReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::ReadingFeed { key } => {
                self.bar
                    .set_message(format!("{SEARCH}Reading feed: {}", key.cyan()));
            }

            ProgressEvent::FeedMissing { key } => {
                self.bar.println(format!(
                    "  {} {} does not exist yet, creating it",
                    "note:".yellow(),
                    key.cyan()
                ));
            }

            ProgressEvent::ScanningObjects { prefix } => {
                let prefix = if prefix.is_empty() { "/".to_string() } else { prefix };
                self.bar
                    .set_message(format!("{SEARCH}Scanning {}", prefix.cyan()));
            }

            ProgressEvent::ObjectPromoted { src, dest } => {
                self.bar.println(format!(
                    "  {MOVE}{} {} {}",
                    src.dimmed(),
                    "->".dimmed(),
                    dest.cyan()
                ));
            }

            ProgressEvent::EpisodeDiscovered {
                title,
                object_path,
                size_bytes,
            } => {
                self.bar.println(format!(
                    "  {HEADPHONES}{} {} ({})",
                    title.bold().green(),
                    object_path.dimmed(),
                    indicatif::HumanBytes(size_bytes)
                ));
            }

            ProgressEvent::AlreadyPublished { object_path } => {
                self.bar
                    .set_message(format!("Already published: {}", object_path.dimmed()));
            }

            ProgressEvent::FeedWritten {
                key,
                new_items,
                bytes,
            } => {
                self.bar.println(format!(
                    "  {SUCCESS}Wrote {} with {} new item(s), {}",
                    key.cyan(),
                    new_items.to_string().green().bold(),
                    indicatif::HumanBytes(bytes as u64)
                ));
            }

            ProgressEvent::ProcessCompleted {
                promoted,
                published,
                skipped,
                written,
            } => {
                self.bar.finish_and_clear();
                println!(
                    "\n{PARTY}{} {} promoted, {} published, {} already in feed{}",
                    "Processing complete:".bold().green(),
                    promoted.to_string().cyan(),
                    published.to_string().green().bold(),
                    skipped.to_string().yellow(),
                    if written {
                        String::new()
                    } else {
                        format!(" ({})", "feed unchanged".dimmed())
                    }
                );
            }

            ProgressEvent::ProcessFailed { .. } => {
                // The error itself is printed by main
                self.bar.finish_and_clear();
            }
        }
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let state = args
        .app_state(SystemClock::shared(), TracingReporter::shared())
        .context("Invalid server configuration")?;
    info!(
        store = state.store.name(),
        index = state.cache.key(),
        delivery = ?state.delivery,
        "Starting podindex server"
    );

    let app = router(Arc::new(state)).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(%addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            info!("Shutting down...");
        })
        .await
        .context("Server error")?;

    Ok(())
}

async fn process(args: ProcessArgs) -> Result<()> {
    let options = args
        .feed
        .process_options()
        .context("Invalid feed configuration")?;
    let store = args.store.build().context("Invalid store configuration")?;

    if !args.quiet {
        println!(
            "\n{}{} {}\n",
            MICROPHONE,
            "podindex".bold().magenta(),
            "- Podcast Feed Maintainer".dimmed()
        );
    }

    let console = (!args.quiet).then(|| Arc::new(ConsoleReporter::new()));
    let reporter: SharedProgressReporter = match &console {
        Some(console) => console.clone(),
        None => NoopReporter::shared(),
    };

    let outcome = process_feed(store.as_ref(), &options, &SystemClock, &reporter).await;
    if let Some(console) = &console {
        console.bar.finish_and_clear();
    }
    outcome.context("Failed to process feed")?;

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Process(args) => process(args).await,
    }
}
