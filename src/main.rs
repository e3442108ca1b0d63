use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use feedmail::config::Config;
use feedmail::deliver::Mailer;
use feedmail::pipeline;
use feedmail::store::{FeedList, FeedRecord};
use feedmail::util::validate_url;

/// Get the config directory path (~/.config/feedmail/)
fn get_config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME environment variable not set")?;
    Ok(PathBuf::from(home).join(".config").join("feedmail"))
}

#[derive(Parser, Debug)]
#[command(
    name = "feedmail",
    about = "Emails unseen RSS/Atom entries, one message per entry"
)]
struct Args {
    /// Path to the OPML feed list (defaults to ~/.config/feedmail/feeds.opml)
    #[arg(long, value_name = "FILE")]
    feeds: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process all feeds and send an email for each unseen entry
    Run,
    /// Process all feeds and record entries as seen without sending email
    Sync,
    /// List subscribed feeds with their indices
    List,
    /// Subscribe to a feed
    Add {
        /// Feed URL (the XML document, not the site)
        url: String,
        /// Display title (defaults to the URL)
        #[arg(long)]
        title: Option<String>,
    },
    /// Unsubscribe from the feed at the given index (see `list`)
    Delete { index: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();

    let config_dir = get_config_dir()?;
    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;
        println!("Created config directory: {}", config_dir.display());
    }

    let config = Config::load(&config_dir.join("config.toml")).context("Failed to load config")?;
    let opml_path = args
        .feeds
        .clone()
        .unwrap_or_else(|| config_dir.join("feeds.opml"));

    // `add` bootstraps a missing feed list; every other command needs one.
    if !opml_path.exists() && !matches!(args.command, Command::Add { .. }) {
        eprintln!("Error: No feed list found at {}", opml_path.display());
        eprintln!();
        eprintln!("Subscribe to a first feed with:");
        eprintln!("  feedmail add https://example.com/feed.xml --title \"Example\"");
        std::process::exit(1);
    }

    match args.command {
        Command::List => {
            let list = FeedList::load(&opml_path).context("Failed to load feed list")?;
            for (index, record) in list.records().iter().enumerate() {
                println!("{:2}: {:<50}{}", index, record.title, record.xml_url);
            }
        }
        Command::Add { url, title } => {
            validate_url(&url).context("Refusing to subscribe")?;
            let mut list = if opml_path.exists() {
                FeedList::load(&opml_path).context("Failed to load feed list")?
            } else {
                FeedList::new(&opml_path)
            };
            let title = title.unwrap_or_else(|| url.clone());
            list.push(FeedRecord::new(title.clone(), url));
            list.save().context("Failed to save feed list")?;
            println!("Subscribed to {}", title);
        }
        Command::Delete { index } => {
            let mut list = FeedList::load(&opml_path).context("Failed to load feed list")?;
            match list.remove(index) {
                Some(record) => {
                    list.save().context("Failed to save feed list")?;
                    println!("Deleted {}", record.title);
                }
                None => {
                    eprintln!(
                        "No feed at index {} (run 'feedmail list' to see indices)",
                        index
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::Sync => {
            let mut list = FeedList::load(&opml_path).context("Failed to load feed list")?;
            let client = http_client()?;
            pipeline::run_all(&client, &mut list, None, &config)
                .await
                .context("Sync aborted")?;
        }
        Command::Run => {
            let mut list = FeedList::load(&opml_path).context("Failed to load feed list")?;
            let template_path = config
                .template_path
                .clone()
                .unwrap_or_else(|| config_dir.join("template.mail"));
            let mailer = Mailer::from_template_file(&config.sendmail_command, &template_path)
                .context("Failed to set up mail delivery")?;
            let client = http_client()?;
            pipeline::run_all(&client, &mut list, Some(&mailer), &config)
                .await
                .context("Run aborted")?;
        }
    }

    Ok(())
}

fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(concat!("feedmail/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}
