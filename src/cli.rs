use clap::{Parser, Subcommand};
use metahub::media::{MediaKind, Source};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "metahub")]
#[command(author, version, about = "Unified metadata search across movie, game, book, music and comic APIs")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the token-exchange relay server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on
        #[arg(short, long, default_value = "8880")]
        port: u16,
    },

    /// Search providers for a title
    Search {
        /// Search query
        #[arg(required = true)]
        query: String,

        /// Restrict to media kinds (movie, tv_show, game, book, music, comic)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<MediaKind>,

        /// 1-based result page
        #[arg(long)]
        page: Option<u32>,

        /// Results per provider
        #[arg(short, long)]
        limit: Option<u32>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show currently trending items
    Trending {
        /// Restrict to media kinds (movie, tv_show, game, book, music, comic)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<MediaKind>,

        /// Items per provider
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show all-time popular items
    Popular {
        /// Restrict to media kinds (movie, tv_show, game, book, music, comic)
        #[arg(short, long, value_delimiter = ',')]
        kinds: Vec<MediaKind>,

        /// Items per provider
        #[arg(short, long, default_value = "10")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Fetch one item by provider and id
    Details {
        /// Provider tag (tmdb, igdb, rawg, google_books, lastfm, comic_vine)
        #[arg(required = true)]
        source: Source,

        /// Provider-native item id
        #[arg(required = true)]
        id: String,

        /// Media kind, for providers serving more than one (TMDB)
        #[arg(short, long)]
        kind: Option<MediaKind>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show new and upcoming releases across all providers
    Releases {
        /// Total items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the latest news-style items across all providers
    News {
        /// Total items to show
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
