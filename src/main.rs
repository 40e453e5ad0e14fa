mod cli;

use metahub::aggregator::Aggregator;
use metahub::media::{MediaKind, MediaRecord, NewsItem, SearchOptions, Source};
use metahub::{config, relay};

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use std::path::Path;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "metahub=trace,tower_http=debug".to_string()
        } else {
            "metahub=debug,tower_http=info".to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Serve { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_relay(host, port, config_path))
        }
        Commands::Search {
            query,
            kinds,
            page,
            limit,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(search(&query, &kinds, page, limit, json, config_path))
        }
        Commands::Trending { kinds, limit, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(trending(&kinds, limit, json, config_path))
        }
        Commands::Popular { kinds, limit, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(popular(&kinds, limit, json, config_path))
        }
        Commands::Details {
            source,
            id,
            kind,
            json,
        } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(details(source, &id, kind, json, config_path))
        }
        Commands::Releases { limit, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(releases(limit, json, config_path))
        }
        Commands::News { limit, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(news(limit, json, config_path))
        }
        Commands::Validate {
            config: validate_path,
        } => {
            let path = validate_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("metahub {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_relay(host: String, port: u16, config_path: Option<&Path>) -> Result<()> {
    let mut config = config::load_config_or_default(config_path)?;

    // Override host/port from CLI if specified
    config.relay.host = host;
    config.relay.port = port;

    tracing::info!("Starting metahub relay");
    relay::serve(config).await
}

async fn search(
    query: &str,
    kinds: &[MediaKind],
    page: Option<u32>,
    limit: Option<u32>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let options = SearchOptions { page, limit };
    let records = aggregator.search(query, kinds, &options).await;
    print_records(&records, json)
}

async fn trending(
    kinds: &[MediaKind],
    limit: usize,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let records = aggregator.trending(kinds, limit).await;
    print_records(&records, json)
}

async fn popular(
    kinds: &[MediaKind],
    limit: usize,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let records = aggregator.popular(kinds, limit).await;
    print_records(&records, json)
}

async fn details(
    source: Source,
    id: &str,
    kind: Option<MediaKind>,
    json: bool,
    config_path: Option<&Path>,
) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let record = aggregator.details_from(source, id, kind).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
        return Ok(());
    }

    println!("Title:  {}", record.title);
    println!("Kind:   {}", record.kind);
    println!("Source: {} ({})", record.source.display_name(), record.external_id);
    if let Some(ref date) = record.release_date {
        println!("Date:   {}", date);
    }
    if let Some(rating) = record.average_rating {
        match record.total_reviews {
            Some(reviews) => println!("Rating: {:.1} ({} ratings)", rating, reviews),
            None => println!("Rating: {:.1}", rating),
        }
    }
    if let Some(ref cover) = record.cover_image {
        println!("Cover:  {}", cover);
    }
    if let Some(ref description) = record.description {
        println!("\n{}", description);
    }
    println!(
        "\nData from {} - {}",
        record.attribution.source, record.attribution.source_url
    );
    if let Some(ref license) = record.attribution.license {
        println!("License: {}", license);
    }

    Ok(())
}

async fn releases(limit: usize, json: bool, config_path: Option<&Path>) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let items = aggregator.new_releases(limit).await;
    print_news(&items, json)
}

async fn news(limit: usize, json: bool, config_path: Option<&Path>) -> Result<()> {
    let aggregator = build_aggregator(config_path)?;
    let items = aggregator.latest_news(limit).await;
    print_news(&items, json)
}

fn build_aggregator(config_path: Option<&Path>) -> Result<Aggregator> {
    let config = config::load_config_or_default(config_path)?;
    Aggregator::from_config(&config)
}

fn print_records(records: &[MediaRecord], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for record in records {
        let rating = record
            .average_rating
            .map(|r| format!("{r:.1}"))
            .unwrap_or_else(|| "-".to_string());
        let date = record.release_date.as_deref().unwrap_or("");
        println!(
            "{:>5}  {:<12} {:<8} {}  {}",
            rating,
            record.source.tag(),
            record.kind.tag(),
            record.title,
            date
        );
    }

    Ok(())
}

fn print_news(items: &[NewsItem], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No items.");
        return Ok(());
    }

    for item in items {
        let date = item.date.as_deref().unwrap_or("          ");
        println!("{:<10}  {:<12} {}", date, item.source.tag(), item.title);
        println!("{:<10}  {:<12} {}", "", "", item.url);
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    let config = match path {
        Some(p) => {
            println!("Validating config: {:?}", p);
            config::load_config(p)?
        }
        None => {
            println!("No config file specified, using defaults");
            config::load_config_or_default(None)?
        }
    };

    println!("✓ Configuration is valid");
    println!("  Relay: {}:{}", config.relay.host, config.relay.port);
    println!("  Request timeout: {}s", config.http.timeout_secs);

    let aggregator = Aggregator::from_config(&config)?;
    println!("  Providers:");
    for provider in aggregator.providers() {
        let status = if provider.is_configured() {
            "ready"
        } else {
            "missing credentials"
        };
        println!("    {:<13} {}", provider.source().tag(), status);
    }

    Ok(())
}
