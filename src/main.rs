use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use tinyopds::config::Config;
use tinyopds::library::Library;

#[derive(Parser)]
#[command(name = "tinyopds", version, about = "Personal e-book library metadata engine")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Print the library statistics and exit
    #[arg(long)]
    stats: bool,

    /// Recompute and persist the library statistics, then exit
    #[arg(long)]
    recount: bool,

    /// Run an author/book search and exit
    #[arg(long)]
    search: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = Config::load(&cli.config).unwrap_or_else(|e| {
        eprintln!("Error loading config: {e}");
        std::process::exit(1);
    });

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    tracing::info!("tinyopds v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Library root: {}",
        config.library.library_path.display()
    );

    let library = Library::open(config).await.unwrap_or_else(|e| {
        tracing::error!("Failed to open library: {e}");
        std::process::exit(1);
    });

    if cli.recount {
        library.refresh_counts().await;
        print_counts(&library).await;
        library.close().await;
        return;
    }

    if cli.stats {
        print_counts(&library).await;
        library.close().await;
        return;
    }

    if let Some(ref pattern) = cli.search {
        let authors = library.search_authors(pattern).await;
        println!("Authors ({}):", authors.len());
        for name in &authors {
            println!("  {name}");
        }
        let books = library.search_books(pattern).await;
        println!("Books ({}):", books.len());
        for book in &books {
            println!("  {}: {}", book.authors.join(", "), book.title);
        }
        library.close().await;
        return;
    }

    // Default mode: stay resident for an embedding OPDS/HTML layer; keep
    // the store connection warm until interrupted.
    let keepalive = library.spawn_keepalive();
    tracing::info!("Library open; press Ctrl-C to exit");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to wait for shutdown signal: {e}");
    }
    keepalive.abort();
    library.close().await;
}

async fn print_counts(library: &Library) {
    let counts = library.counts().await;
    println!("Books:      {}", counts.total_books);
    println!("  FB2:      {}", counts.fb2_books);
    println!("  EPUB:     {}", counts.epub_books);
    println!("Authors:    {}", counts.authors_count);
    println!("Sequences:  {}", counts.sequences_count);
    println!(
        "New books:  {} (last {} days)",
        counts.new_books,
        library.config().new_books_days()
    );
}
