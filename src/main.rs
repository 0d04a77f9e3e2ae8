//! CLI for the snapdex catalog.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snapdex::catalog::Catalog;
use snapdex::embedding::Embedding;
use snapdex::hash::ContentHash;
use snapdex::provider::{create_provider, EmbeddingProvider};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp"];

#[derive(Parser)]
#[command(name = "snapdex")]
#[command(about = "Content-addressed image caption store with nearest-neighbor search", long_about = None)]
struct Cli {
    /// Data directory for the record store and index snapshots
    #[arg(long, default_value = "snapdex_data")]
    data_dir: PathBuf,

    /// Base URL of the captioning model server
    #[arg(long, env = "SNAPDEX_PROVIDER_URL")]
    provider_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Caption, embed, and index images (files or directories)
    Ingest {
        /// Image files or directories to walk recursively
        paths: Vec<PathBuf>,
    },
    /// Caption an image without storing anything
    Caption {
        /// Image file
        file: PathBuf,
    },
    /// Find the nearest stored images to a query
    Search {
        /// Free-text query, embedded by the provider
        #[arg(long, conflicts_with_all = ["image", "hash", "vector"])]
        text: Option<String>,
        /// Query image file
        #[arg(long, conflicts_with_all = ["hash", "vector"])]
        image: Option<PathBuf>,
        /// Content hash of a stored image
        #[arg(long, conflicts_with = "vector")]
        hash: Option<String>,
        /// Raw query vector as comma-separated values (e.g., "1.0,0.0,0.5")
        #[arg(long)]
        vector: Option<String>,
        /// Number of results to return
        #[arg(short, long, default_value = "5")]
        k: usize,
        /// For image queries: ingest the image if it is not already stored
        #[arg(long)]
        store: bool,
    },
    /// Show the stored record for a content hash
    Show {
        /// Content hash (64 hex digits)
        hash: String,
    },
    /// Rebuild the index from the record store
    Rebuild,
    /// Write all state to disk now
    Snapshot,
    /// Print catalog counters
    Stats,
    /// Start the HTTP API server
    Serve {
        /// Address to bind to
        #[arg(long, default_value = "0.0.0.0:3000")]
        addr: String,
    },
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Expand CLI paths into a flat list of image files. Directories are
/// walked recursively; non-image files inside them are skipped silently,
/// but a named file is taken as-is.
fn collect_image_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path) {
                let entry = entry?;
                if entry.file_type().is_file() && is_image_file(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else {
            files.push(path.clone());
        }
    }
    Ok(files)
}

async fn run_ingest(
    catalog: &Catalog,
    provider: &dyn EmbeddingProvider,
    paths: &[PathBuf],
) -> Result<()> {
    let files = collect_image_files(paths)?;
    if files.is_empty() {
        println!("No image files found");
        return Ok(());
    }

    let mut stored = 0usize;
    let mut deduped = 0usize;
    let mut failed = 0usize;

    for (i, file) in files.iter().enumerate() {
        let bytes = std::fs::read(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        match catalog.ingest(&bytes, filename, provider).await {
            Ok(report) if report.deduped => {
                deduped += 1;
                println!(
                    "[{}/{}] {} already stored as {}",
                    i + 1,
                    files.len(),
                    file.display(),
                    report.record.id
                );
            }
            Ok(report) => {
                stored += 1;
                println!(
                    "[{}/{}] {} -> {}\n    {}",
                    i + 1,
                    files.len(),
                    file.display(),
                    report.record.id,
                    report.record.caption
                );
            }
            Err(e) => {
                failed += 1;
                eprintln!("[{}/{}] {} failed: {}", i + 1, files.len(), file.display(), e);
            }
        }
    }

    catalog.save()?;
    println!(
        "Done: {} stored, {} deduplicated, {} failed",
        stored, deduped, failed
    );
    Ok(())
}

fn print_hits(hits: &[snapdex::catalog::SearchHit]) {
    if hits.is_empty() {
        println!("No results found");
        return;
    }
    println!("Top {} results:", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. {} (distance: {:.4})\n   {}  {}",
            i + 1,
            hit.hash,
            hit.distance,
            hit.filename,
            hit.caption
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let provider = create_provider(cli.provider_url.as_deref())?;

    if let Commands::Serve { ref addr } = cli.command {
        let catalog = Arc::new(Catalog::open(&cli.data_dir)?);
        snapdex::server::start(addr, catalog, provider).await?;
        return Ok(());
    }

    // Captioning needs no catalog at all
    if let Commands::Caption { ref file } = cli.command {
        let bytes = std::fs::read(file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let filename = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let output = provider.embed_image(&bytes, filename).await?;
        println!("hash: {}", ContentHash::of(&bytes));
        match output.caption {
            Some(caption) => println!("{}", caption),
            None => println!("(no caption produced)"),
        }
        return Ok(());
    }

    let catalog = Catalog::open(&cli.data_dir)?;

    match cli.command {
        Commands::Ingest { paths } => {
            run_ingest(&catalog, provider.as_ref(), &paths).await?;
        }
        Commands::Search {
            text,
            image,
            hash,
            vector,
            k,
            store,
        } => {
            let hits = if let Some(text) = text {
                catalog.search_by_text(&text, k, provider.as_ref()).await?
            } else if let Some(image) = image {
                let bytes = std::fs::read(&image)
                    .with_context(|| format!("failed to read {}", image.display()))?;
                let filename = image
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or_default();
                catalog
                    .search_by_image(&bytes, filename, k, store, provider.as_ref())
                    .await?
            } else if let Some(hash) = hash {
                let hash: ContentHash = hash.parse()?;
                catalog.search_by_hash(&hash, k)?
            } else if let Some(vector) = vector {
                catalog.search(&Embedding::parse(&vector)?, k)?
            } else {
                anyhow::bail!("one of --text, --image, --hash, --vector is required");
            };
            print_hits(&hits);
            if store {
                catalog.save()?;
            }
        }
        Commands::Show { hash } => {
            let hash: ContentHash = hash.parse()?;
            let record = catalog.record(&hash)?;
            let indexed = catalog.indexed_position(&hash)?.is_some();
            println!("hash:     {}", record.id);
            println!("filename: {}", record.filename);
            println!("caption:  {}", record.caption);
            println!(
                "embedded: {}",
                record
                    .embedding
                    .as_ref()
                    .map(|e| format!("yes ({} dimensions)", e.dimension()))
                    .unwrap_or_else(|| "no".to_string())
            );
            println!("indexed:  {}", if indexed { "yes" } else { "no" });
        }
        Commands::Rebuild => {
            let report = catalog.rebuild_from_store()?;
            println!(
                "Rebuilt index: {} indexed, {} skipped",
                report.indexed, report.skipped
            );
        }
        Commands::Snapshot => {
            catalog.save()?;
            println!("Catalog saved");
        }
        Commands::Stats => {
            let stats = catalog.stats()?;
            println!("records:   {}", stats.records);
            println!("embedded:  {}", stats.embedded);
            println!("indexed:   {}", stats.indexed);
            println!(
                "dimension: {}",
                stats
                    .dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "-".to_string())
            );
            println!("provider:  {}", provider.name());
        }
        Commands::Caption { .. } | Commands::Serve { .. } => {
            unreachable!("handled above");
        }
    }

    Ok(())
}
