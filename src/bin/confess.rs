//! Command line client for the confession board.
//!
//! Keeps a local cache of the board like the web page does, so listing keeps
//! working and posting is not lost when the server is unreachable.

use std::path::PathBuf;

use anyhow::{Context as _, Result, bail};
use chrono::Utc;
use clap::{Parser, Subcommand};
use confession_board::{
    client::{
        ConfessionsClient, DEFAULT_PAGE_SIZE, FileStorage, Notice, NoticeLevel, SyncSession,
    },
    model::{Confession, Draft, format_timestamp},
};
use tracing_subscriber::{EnvFilter, prelude::*};
use url::Url;

/// Post and read anonymous confessions.
#[derive(Parser, Debug, Clone)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Base url of the confession board server.
    #[clap(long, short, default_value = "http://localhost:8080")]
    url: Url,
    /// Directory for the local cache.
    ///
    /// Defaults to `confession-board` in the user's data directory.
    #[clap(long)]
    data_dir: Option<PathBuf>,
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// List confessions, newest first.
    List {
        /// Number of pages to show.
        #[clap(long, short, default_value_t = 1)]
        pages: usize,
        /// Entries per page.
        #[clap(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        /// Show the full timestamp next to the age.
        #[clap(long)]
        exact: bool,
    },
    /// Post a confession.
    Post {
        /// The confession.
        text: String,
        /// Name to show, anonymous if omitted.
        #[clap(long, short)]
        name: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();

    let storage = match args.data_dir {
        Some(dir) => FileStorage::new(dir),
        None => FileStorage::in_data_dir()?,
    };
    let client = ConfessionsClient::new(&args.url).context("invalid server url")?;

    match args.command {
        Command::List {
            pages,
            page_size,
            exact,
        } => {
            let mut session = SyncSession::new(client, storage).with_page_size(page_size);
            let (confessions, notice) = session.load().await;
            if let Some(notice) = notice {
                print_notice(&notice);
            }
            if confessions.is_empty() {
                println!("No confessions yet. Be the first to share!");
                return Ok(());
            }
            for _ in 0..pages {
                for confession in session.next_page() {
                    print_confession(confession, exact);
                }
            }
            if session.has_more() {
                let shown = session.displayed().len();
                println!("... {} more, use --pages to see them", confessions.len() - shown);
            }
        }
        Command::Post { text, name } => {
            let mut session = SyncSession::new(client, storage);
            session.load().await;
            let submitted = match session.submit(Draft::new(name, text)).await {
                Ok(submitted) => submitted,
                Err(err) => bail!("{err}"),
            };
            print_notice(&submitted.notice);
            print_confession(&submitted.confession, false);
        }
    }
    Ok(())
}

fn print_notice(notice: &Notice) {
    match notice.level {
        NoticeLevel::Success => println!("{}", notice.message),
        NoticeLevel::Warning => eprintln!("warning: {}", notice.message),
    }
}

fn print_confession(confession: &Confession, exact: bool) {
    let age = confession.age_label(Utc::now());
    if exact {
        println!(
            "{} · {age} ({})",
            confession.name,
            format_timestamp(&confession.timestamp)
        );
    } else {
        println!("{} · {age}", confession.name);
    }
    println!("{}\n", confession.text);
}
