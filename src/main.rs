use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use serde::Serialize;
use tracing_subscriber::prelude::*;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

use codeseek_core::{CodeChunk, CodeseekConfig, CodeseekError, EmbeddingConfig, OutputFormat};
use codeseek_index::{
    build_embedder, CodeIndex, Embedder, EnrichedHit, IndexReport, IndexStats, IndexingPipeline,
    Neighbors, QueryHit, QueryService,
};
use codeseek_parser::{parse_source, CallRegistry};

#[derive(Parser)]
#[command(
    name = "codeseek",
    version,
    about = "Structural indexing and semantic search for Python codebases",
    long_about = "codeseek splits Python sources into functions, classes and methods,\n\
                   embeds each one, and answers natural-language queries over them.\n\n\
                   Examples:\n  \
                     codeseek index --path .             Index the current repository\n  \
                     codeseek search 'load config'       Find matching code\n  \
                     codeseek search 'retry' --neighbors Include callers and callees\n  \
                     codeseek chunks app/server.py       Show how a file is chunked\n  \
                     codeseek stats                      Summarize the saved index"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .codeseek.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for command results.\n\n\
                       Formats:\n  \
                         text      Human-readable summaries (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging (RUST_LOG takes precedence)
    #[arg(long, short, global = true)]
    verbose: bool,

    /// Also write logs to a timestamped file in this directory
    #[arg(long, global = true, value_name = "DIR")]
    log_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Create a default .codeseek.toml configuration file
    #[command(long_about = "Create a default .codeseek.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .codeseek.toml already exists.")]
    Init,
    /// Index a repository
    #[command(long_about = "Index a repository.\n\n\
        Scans for Python files, splits them into chunks, embeds every chunk and\n\
        saves a new index generation. Files that fail to parse are skipped; a\n\
        batch whose embedding fails is reported and the run continues.\n\n\
        Examples:\n  codeseek index\n  codeseek index --path ~/src/app --out /tmp/app-index")]
    Index {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Index directory (default: <path>/.codeseek/index)
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Search the index with a natural-language query
    #[command(long_about = "Search the index with a natural-language query.\n\n\
        Results are ranked by cosine similarity. With --neighbors each result also\n\
        lists the indexed chunks it calls and the chunks that call it.\n\n\
        Examples:\n  codeseek search 'parse the config file'\n  codeseek search 'send email' --limit 3 --neighbors")]
    Search {
        /// Search query
        query: String,

        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,

        /// Maximum results to return (default: search.top_k from config)
        #[arg(long)]
        limit: Option<usize>,

        /// Attach call-graph neighbors to each result
        #[arg(long)]
        neighbors: bool,
    },
    /// Show the chunks and calls of a single file
    Chunks {
        /// Python source file
        file: PathBuf,
    },
    /// Print statistics about the saved index
    Stats {
        /// Repository path (default: current directory)
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
}

const DEFAULT_CONFIG: &str = r#"# codeseek configuration

[embedding]
# "hash" works offline; "openai" and "voyage" call a remote /embeddings API.
# provider = "hash"
# model = "text-embedding-3-small"
# api_key = "..."            # or OPENAI_API_KEY / VOYAGE_API_KEY
# base_url = "https://api.openai.com/v1"
# dimensions = 384
# batch_size = 64

[index]
# dir = ".codeseek/index"
# files_per_batch = 256

[search]
# top_k = 5
# neighbors = false

[scan]
# extensions = ["py"]
# exclude_dirs = [".git", "__pycache__", "venv", ".venv", "env", "node_modules", "dist", "build"]
"#;

const CONFIG_FILE: &str = ".codeseek.toml";

fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Result<()> {
    let default_level = match (verbose, log_dir) {
        (true, _) => "debug",
        (false, Some(_)) => "info",
        (false, None) => "warn",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let file_layer = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).into_diagnostic()?;
            let started = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();
            let path = dir.join(format!("codeseek-{started}-{}.log", std::process::id()));
            let file = std::fs::File::create(&path).into_diagnostic()?;
            Some(
                fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false)
                    .with_target(false),
            )
        }
        None => None,
    };

    // With a log file, stderr stays at warn unless -v asks for more.
    let stderr_level = if log_dir.is_some() && !verbose {
        LevelFilter::WARN
    } else {
        LevelFilter::TRACE
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(stderr_level),
        )
        .with(file_layer)
        .init();
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<CodeseekConfig> {
    let config = match path {
        Some(path) => CodeseekConfig::from_file(path).into_diagnostic()?,
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                CodeseekConfig::from_file(default_path).into_diagnostic()?
            } else {
                CodeseekConfig::default()
            }
        }
    };
    Ok(config)
}

fn check_api_key(config: &EmbeddingConfig) -> Result<()> {
    let env_var = match config.provider.as_str() {
        "openai" => "OPENAI_API_KEY",
        "voyage" => "VOYAGE_API_KEY",
        _ => return Ok(()),
    };
    if config.api_key.is_none() && std::env::var(env_var).is_err() {
        return Err(miette::miette!(
            help = format!(
                "Set {env_var}, add api_key under [embedding] in .codeseek.toml, \
                 or use provider = \"hash\""
            ),
            "No API key configured for embedding provider '{}'",
            config.provider
        ));
    }
    Ok(())
}

fn spinner(message: &'static str) -> Option<indicatif::ProgressBar> {
    if !std::io::stderr().is_terminal() {
        return None;
    }
    let pb = indicatif::ProgressBar::new_spinner();
    if let Ok(style) = indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(std::time::Duration::from_millis(120));
    Some(pb)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).into_diagnostic()?);
    Ok(())
}

fn location(chunk: &CodeChunk) -> String {
    format!(
        "{}:{}-{}",
        chunk.file_path().display(),
        chunk.start_line(),
        chunk.end_line()
    )
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct IndexSummary<'a> {
    index_dir: &'a Path,
    generation: Option<&'a str>,
    #[serde(flatten)]
    report: &'a IndexReport,
}

fn print_index_summary(summary: &IndexSummary<'_>, format: OutputFormat) -> Result<()> {
    let report = summary.report;
    match format {
        OutputFormat::Json => print_json(summary)?,
        OutputFormat::Markdown => {
            println!("# Index\n");
            println!("| Metric | Value |");
            println!("|--------|-------|");
            println!("| Files scanned | {} |", report.files_scanned);
            println!("| Chunks indexed | {} |", report.chunks_indexed);
            println!("| Batches committed | {} |", report.batches_committed);
            println!("| Batches failed | {} |", report.failed_batches.len());
            println!("| Duration | {} ms |", report.duration_ms);
            if let Some(generation) = summary.generation {
                println!("| Generation | `{generation}` |");
            }
            for failed in &report.failed_batches {
                println!("\n- batch {} ({} files): {}", failed.batch, failed.files.len(), failed.error);
            }
        }
        OutputFormat::Text => {
            println!(
                "Indexed {} chunks from {} files in {} ms",
                report.chunks_indexed, report.files_scanned, report.duration_ms
            );
            match summary.generation {
                Some(generation) => {
                    println!("Saved generation {generation} to {}", summary.index_dir.display())
                }
                None => println!("Nothing saved; the previous index (if any) is unchanged"),
            }
            for failed in &report.failed_batches {
                println!(
                    "  failed batch {} ({} files): {}",
                    failed.batch,
                    failed.files.len(),
                    failed.error
                );
            }
        }
    }
    Ok(())
}

fn print_neighbors_text(neighbors: &Neighbors) {
    if !neighbors.callees.is_empty() {
        let names: Vec<&str> = neighbors.callees.iter().map(|n| n.name.as_str()).collect();
        println!("     calls: {}", names.join(", "));
    }
    if !neighbors.callers.is_empty() {
        let names: Vec<&str> = neighbors.callers.iter().map(|n| n.name.as_str()).collect();
        println!("     called by: {}", names.join(", "));
    }
}

fn print_hit(rank: usize, hit: &QueryHit, neighbors: Option<&Neighbors>, format: OutputFormat) {
    let chunk = &hit.chunk;
    match format {
        OutputFormat::Markdown => {
            println!("## {rank}. `{}` ({})\n", chunk.name(), chunk.kind());
            println!("`{}` (score {:.3})\n", location(chunk), hit.score);
            println!("```python\n{}\n```\n", chunk.source_text());
            if let Some(neighbors) = neighbors {
                for callee in &neighbors.callees {
                    println!("- calls `{}` ({})", callee.name, callee.id);
                }
                for caller in &neighbors.callers {
                    println!("- called by `{}` ({})", caller.name, caller.id);
                }
                if !neighbors.callees.is_empty() || !neighbors.callers.is_empty() {
                    println!();
                }
            }
        }
        _ => {
            println!(
                "{rank:>2}. {:.3}  {} ({})  {}",
                hit.score,
                chunk.name(),
                chunk.kind(),
                location(chunk)
            );
            if let Some(neighbors) = neighbors {
                print_neighbors_text(neighbors);
            }
        }
    }
}

fn print_hits(hits: &[QueryHit], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    if format == OutputFormat::Markdown {
        println!("# Search Results\n");
    }
    for (i, hit) in hits.iter().enumerate() {
        print_hit(i + 1, hit, None, format);
    }
    Ok(())
}

fn print_enriched_hits(hits: &[EnrichedHit], format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Json {
        return print_json(&hits);
    }
    if hits.is_empty() {
        println!("No results found.");
        return Ok(());
    }
    if format == OutputFormat::Markdown {
        println!("# Search Results\n");
    }
    for (i, enriched) in hits.iter().enumerate() {
        print_hit(i + 1, &enriched.hit, Some(&enriched.neighbors), format);
    }
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChunkCalls<'a> {
    #[serde(flatten)]
    chunk: &'a CodeChunk,
    resolved_calls: Vec<&'a str>,
    external_calls: Vec<&'a str>,
}

fn print_chunks(file: &Path, format: OutputFormat) -> Result<()> {
    if !file.is_file() {
        return Err(CodeseekError::FileNotFound(file.to_path_buf())).into_diagnostic();
    }
    let source = std::fs::read_to_string(file).into_diagnostic()?;
    let chunks = parse_source(file, &source).into_diagnostic()?;
    let registry = CallRegistry::build(&chunks);

    let rows: Vec<ChunkCalls<'_>> = chunks
        .iter()
        .map(|chunk| {
            let resolution = registry.resolve(chunk);
            ChunkCalls {
                chunk,
                resolved_calls: resolution.internal.iter().map(|c| c.name()).collect(),
                external_calls: resolution.external,
            }
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&rows)?,
        OutputFormat::Markdown => {
            println!("# Chunks in `{}`\n", file.display());
            println!("| Kind | Name | Lines | Resolved calls | External calls |");
            println!("|------|------|-------|----------------|----------------|");
            for row in &rows {
                println!(
                    "| {} | `{}` | {}-{} | {} | {} |",
                    row.chunk.kind(),
                    row.chunk.name(),
                    row.chunk.start_line(),
                    row.chunk.end_line(),
                    row.resolved_calls.join(", "),
                    row.external_calls.join(", "),
                );
            }
        }
        OutputFormat::Text => {
            if rows.is_empty() {
                println!("No functions, classes or methods in {}", file.display());
            }
            for row in &rows {
                println!(
                    "{:<8} {}  (lines {}-{})  {}",
                    row.chunk.kind().to_string(),
                    row.chunk.name(),
                    row.chunk.start_line(),
                    row.chunk.end_line(),
                    row.chunk.id()
                );
                if !row.resolved_calls.is_empty() {
                    println!("         resolved: {}", row.resolved_calls.join(", "));
                }
                if !row.external_calls.is_empty() {
                    println!("         external: {}", row.external_calls.join(", "));
                }
            }
        }
    }
    Ok(())
}

fn print_stats(stats: &IndexStats, index_dir: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(stats)?,
        OutputFormat::Markdown => {
            println!("# Index Stats\n");
            println!("| Metric | Value |");
            println!("|--------|-------|");
            println!("| Chunks | {} |", stats.total_chunks);
            println!("| Files | {} |", stats.total_files);
            println!("| Functions | {} |", stats.functions);
            println!("| Classes | {} |", stats.classes);
            println!("| Methods | {} |", stats.methods);
            println!("| Dimension | {} |", stats.dimension);
            if let Some(generation) = &stats.generation {
                println!("| Generation | `{generation}` |");
            }
        }
        OutputFormat::Text => {
            println!("Index: {}", index_dir.display());
            if let Some(generation) = &stats.generation {
                println!("Generation: {generation}");
            }
            println!(
                "{} chunks from {} files ({} functions, {} classes, {} methods)",
                stats.total_chunks, stats.total_files, stats.functions, stats.classes, stats.methods
            );
            println!("Dimension: {}", stats.dimension);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_dir.as_deref())?;

    let Some(command) = cli.command else {
        println!("codeseek v{}\n", env!("CARGO_PKG_VERSION"));
        println!("  codeseek init               Create a .codeseek.toml config file");
        println!("  codeseek index              Index the current repository");
        println!("  codeseek search <query>     Search the index");
        println!("  codeseek chunks <file>      Show how a file is chunked");
        println!("  codeseek stats              Summarize the saved index\n");
        println!("Run 'codeseek <command> --help' for details.");
        return Ok(());
    };

    if let Command::Init = command {
        let path = Path::new(CONFIG_FILE);
        if path.exists() {
            miette::bail!("{CONFIG_FILE} already exists");
        }
        std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
        println!("Created {CONFIG_FILE} with default configuration");
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    tracing::debug!(provider = %config.embedding.provider, format = %cli.format, "configuration loaded");

    match command {
        Command::Init => {}
        Command::Index { path, out } => {
            check_api_key(&config.embedding)?;
            let index_dir = out.unwrap_or_else(|| path.join(&config.index.dir));
            let embedder = build_embedder(&config.embedding).into_diagnostic()?;
            let pipeline = IndexingPipeline::new(
                Arc::clone(&embedder),
                config.embedding.batch_size,
                config.index.files_per_batch,
            );
            let mut index = CodeIndex::new(embedder.dimension()).into_diagnostic()?;

            let spinner = spinner("Indexing repository...");
            let report = pipeline
                .index_repository(&mut index, &path, &config.scan)
                .await
                .inspect_err(|_| {
                    if let Some(pb) = &spinner {
                        pb.finish_with_message("Failed");
                    }
                })
                .into_diagnostic()?;
            if let Some(pb) = spinner {
                pb.finish_and_clear();
            }

            if report.batches_committed == 0 && !report.failed_batches.is_empty() {
                print_index_summary(
                    &IndexSummary {
                        index_dir: &index_dir,
                        generation: None,
                        report: &report,
                    },
                    cli.format,
                )?;
                miette::bail!("every batch failed; nothing was saved");
            }

            let generation = index.save(&index_dir).into_diagnostic()?;
            print_index_summary(
                &IndexSummary {
                    index_dir: &index_dir,
                    generation: Some(&generation),
                    report: &report,
                },
                cli.format,
            )?;
        }
        Command::Search {
            query,
            path,
            limit,
            neighbors,
        } => {
            check_api_key(&config.embedding)?;
            let index_dir = path.join(&config.index.dir);
            let index = CodeIndex::open(&index_dir).into_diagnostic()?;
            let embedder = build_embedder(&config.embedding).into_diagnostic()?;
            let service = QueryService::new(Arc::new(index), embedder);
            let top_k = limit.unwrap_or(config.search.top_k);

            if neighbors || config.search.neighbors {
                let hits = service
                    .query_with_neighbors(&query, top_k)
                    .await
                    .into_diagnostic()?;
                print_enriched_hits(&hits, cli.format)?;
            } else {
                let hits = service.query(&query, top_k).await.into_diagnostic()?;
                print_hits(&hits, cli.format)?;
            }
        }
        Command::Chunks { file } => print_chunks(&file, cli.format)?,
        Command::Stats { path } => {
            let index_dir = path.join(&config.index.dir);
            let index = CodeIndex::open(&index_dir).into_diagnostic()?;
            print_stats(&index.stats(), &index_dir, cli.format)?;
        }
    }

    Ok(())
}
