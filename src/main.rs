use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use suprss::config::Config;
use suprss::feed::{
    select_due, FeedRefresher, FetchOptions, HttpFeedSource, PollScheduler, RefreshOutcome,
    SchedulerConfig,
};
use suprss::storage::{Database, FeedStatus, NewFeed, DEFAULT_PAGE_SIZE};
use suprss::util::validate_feed_url;

#[derive(Parser, Debug)]
#[command(name = "suprss", about = "Feed polling and ingestion service")]
struct Args {
    /// Configuration file
    #[arg(long, value_name = "FILE", default_value = "suprss.toml")]
    config: PathBuf,

    /// Database path (overrides `database_path` from the config file)
    #[arg(long, value_name = "PATH")]
    db: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Poll due feeds on the configured interval until Ctrl-C (default)
    Run,
    /// Run a single polling cycle and wait for it to finish
    Once,
    /// Refresh one feed now, regardless of its interval
    Refresh { feed_id: i64 },
    /// List the feeds the next cycle would refresh
    Due {
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Create a collection
    AddCollection { name: String },
    /// Subscribe a collection to a feed and fetch it immediately
    AddFeed {
        collection_id: i64,
        url: String,
        #[arg(long)]
        title: Option<String>,
        /// Refresh interval in minutes
        #[arg(long)]
        every: Option<i64>,
    },
    /// Activate or deactivate polling of a feed
    SetStatus {
        feed_id: i64,
        /// `active` or `inactive`
        status: String,
    },
    /// Print one page of a collection's articles, newest first
    Articles {
        collection_id: i64,
        #[arg(long, default_value_t = 1)]
        page: i64,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("suprss=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;
    if let Some(db) = args.db {
        config.database_path = db;
        config.validate()?;
    }

    let db = Database::open(&config.database_path)
        .await
        .with_context(|| format!("Failed to open database at {}", config.database_path))?;

    let result = dispatch(args.command.unwrap_or(Command::Run), &config, &db).await;
    db.close().await;
    result
}

fn build_refresher(config: &Config, db: &Database) -> Result<FeedRefresher> {
    let source = HttpFeedSource::new(FetchOptions::from_config(config))
        .context("Failed to build HTTP client")?;
    Ok(FeedRefresher::new(
        db.clone(),
        Arc::new(source),
        config.refresh_deadline(),
    ))
}

async fn dispatch(command: Command, config: &Config, db: &Database) -> Result<()> {
    match command {
        Command::Run => {
            let scheduler = PollScheduler::new(
                build_refresher(config, db)?,
                SchedulerConfig::from_config(config),
            );
            let handle = scheduler.spawn();
            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for Ctrl-C")?;
            tracing::info!("Shutting down");
            // Returns once dispatched refreshes finish, before the pool closes
            handle.stop().await.context("Scheduler task failed")?;
        }
        Command::Once => {
            let scheduler = PollScheduler::new(
                build_refresher(config, db)?,
                SchedulerConfig::from_config(config),
            );
            let results = scheduler.tick().await.join().await;
            if results.is_empty() {
                println!("No feeds due.");
            }
            for (feed_id, result) in results {
                match result {
                    Ok(outcome) => print_outcome(feed_id, &outcome),
                    Err(e) => println!("feed {}: task failed: {}", feed_id, e),
                }
            }
        }
        Command::Refresh { feed_id } => {
            let outcome = build_refresher(config, db)?.refresh(feed_id).await;
            print_outcome(feed_id, &outcome);
        }
        Command::Due { limit } => {
            let ids = select_due(db, limit.unwrap_or(config.feeds_per_cycle)).await?;
            for id in ids {
                println!("{}", id);
            }
        }
        Command::AddCollection { name } => {
            let id = db.create_collection(&name).await?;
            println!("Created collection {}", id);
        }
        Command::AddFeed {
            collection_id,
            url,
            title,
            every,
        } => {
            let url = validate_feed_url(&url, config.allow_private_hosts)?;
            let mut new_feed = NewFeed::new(url.as_str());
            if let Some(title) = title {
                new_feed = new_feed.with_title(title);
            }
            if let Some(minutes) = every {
                new_feed = new_feed.with_update_freq_min(minutes);
            }
            let feed_id = db.insert_feed(collection_id, &new_feed).await?;
            println!("Created feed {}", feed_id);

            let outcome = build_refresher(config, db)?.refresh(feed_id).await;
            print_outcome(feed_id, &outcome);
        }
        Command::SetStatus { feed_id, status } => {
            let status: FeedStatus = status.parse()?;
            db.set_feed_status(feed_id, status).await?;
            println!("Feed {} is now {}", feed_id, status);
        }
        Command::Articles {
            collection_id,
            page,
            page_size,
        } => {
            let page = db
                .get_articles_for_collection(collection_id, page, page_size)
                .await?;
            println!(
                "Page {} ({} per page, {} total)",
                page.page, page.page_size, page.total
            );
            for article in page.articles {
                let date = article
                    .published_at
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "{:>6}  {}  [{}] {}  {}",
                    article.id, date, article.feed_title, article.title, article.link
                );
            }
        }
    }
    Ok(())
}

fn print_outcome(feed_id: i64, outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Completed(summary) => println!(
            "feed {}: {} new, {} updated, {} failed",
            feed_id, summary.created, summary.updated, summary.failed_entries
        ),
        RefreshOutcome::Failed(e) => println!("feed {}: failed: {}", feed_id, e),
        RefreshOutcome::Skipped(reason) => println!("feed {}: skipped ({:?})", feed_id, reason),
        RefreshOutcome::AlreadyRunning => println!("feed {}: already refreshing", feed_id),
    }
}
