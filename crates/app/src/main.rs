use anyhow::Context;
use chrono::Utc;
use clap::{ArgGroup, Parser};
use indicatif::{ProgressBar, ProgressStyle};
use pdf_ingest_core::{
    discover_pdf_files, provider_from_config, DocumentOutcome, EmbeddingBackend,
    EmbeddingProvider, InMemoryStore, IngestConfig, IngestionPipeline, IngestionReport,
    LopdfExtractor, MilvusConfig, MilvusStore, ProgressEvent, ProgressObserver, VectorStore,
    CHARACTER_NGRAM_MODEL,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

type Pipeline =
    IngestionPipeline<LopdfExtractor, Box<dyn EmbeddingProvider>, Box<dyn VectorStore>>;

#[derive(Parser)]
#[command(name = "pdf-ingest", version, about = "Ingest PDFs into a vector store for retrieval")]
#[command(group(
    ArgGroup::new("action")
        .required(true)
        .args(["pdf", "directory", "clear", "stats", "search"])
))]
struct Cli {
    /// Config file (toml, yaml or json). Defaults to ./ingest.* when present.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Ingest a single PDF file.
    #[arg(long)]
    pdf: Option<PathBuf>,

    /// Document id for --pdf; a random one is generated when omitted.
    #[arg(long, conflicts_with_all = ["directory", "clear", "stats", "search"])]
    document_id: Option<String>,

    /// Ingest every PDF directly inside this directory.
    #[arg(long)]
    directory: Option<PathBuf>,

    /// Drop the whole collection.
    #[arg(long, default_value_t = false)]
    clear: bool,

    /// Print collection statistics.
    #[arg(long, default_value_t = false)]
    stats: bool,

    /// Run a similarity search against the collection.
    #[arg(long)]
    search: Option<String>,

    /// Number of hits returned by --search.
    #[arg(long, default_value = "5")]
    top_k: usize,

    /// Chunks buffered before each embed-and-store flush.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Texts sent per embedding call.
    #[arg(long)]
    embedding_batch_size: Option<usize>,

    /// Keep vectors in process memory instead of Milvus.
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn main() -> ExitCode {
    let app_version = env!("CARGO_PKG_VERSION");
    let dotenv = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!(path = %path.display(), "loaded environment file");
    }

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-ingest boot"
    );

    match run(&cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(err) => {
            error!(error = ?err, "pdf-ingest failed");
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

// `Ok(false)` when the command ran but at least one document failed.
fn run(cli: &Cli) -> anyhow::Result<bool> {
    let mut config = IngestConfig::load(cli.config.as_deref()).context("loading configuration")?;
    if let Some(batch_size) = cli.batch_size {
        config.batch_size = batch_size;
    }
    if let Some(embedding_batch_size) = cli.embedding_batch_size {
        config.embedding_batch_size = embedding_batch_size;
    }
    if cli.dry_run
        && config.embedding_backend == EmbeddingBackend::Local
        && config.model_for_backend().is_none()
    {
        info!(model = CHARACTER_NGRAM_MODEL, "dry run without a configured model");
        config.embedding_model = Some(CHARACTER_NGRAM_MODEL.to_string());
    }
    config.validate().context("validating configuration")?;

    let provider = provider_from_config(&config).context("loading embedding model")?;
    let store: Box<dyn VectorStore> = if cli.dry_run {
        warn!("dry run: vectors are kept in memory and discarded on exit");
        Box::new(InMemoryStore::new(config.collection_name.clone()))
    } else {
        Box::new(MilvusStore::new(MilvusConfig::from(&config))?)
    };

    let mut pipeline = IngestionPipeline::new(&config, LopdfExtractor, provider, store)?;
    let bar = progress_bar(cli)?;
    if let Some(bar) = &bar {
        let per_document = cli.directory.is_some();
        pipeline = pipeline.with_progress(progress_observer(bar.clone(), per_document));
    }

    let outcome = dispatch(cli, &mut pipeline);
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }
    pipeline.close();
    outcome
}

fn progress_bar(cli: &Cli) -> anyhow::Result<Option<ProgressBar>> {
    if let Some(directory) = &cli.directory {
        let bar = ProgressBar::new(discover_pdf_files(directory).len() as u64);
        bar.set_style(ProgressStyle::with_template(
            "{spinner} [{bar:30}] {pos}/{len} pdfs {wide_msg}",
        )?);
        return Ok(Some(bar));
    }
    if cli.pdf.is_some() {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner} {pos} pages {wide_msg}")?);
        return Ok(Some(bar));
    }
    Ok(None)
}

// Pages advance a single-document bar; document changes advance a directory bar.
fn progress_observer(bar: ProgressBar, per_document: bool) -> ProgressObserver {
    let mut current: Option<String> = None;
    let mut stored = 0usize;
    Box::new(move |event: &ProgressEvent<'_>| match *event {
        ProgressEvent::PageProcessed {
            document_id,
            page_number,
            ..
        } => {
            if current.as_deref() != Some(document_id) {
                if per_document && current.is_some() {
                    bar.inc(1);
                }
                current = Some(document_id.to_string());
                stored = 0;
            }
            if !per_document {
                bar.inc(1);
            }
            bar.set_message(format!("{document_id} p{page_number}, {stored} chunks stored"));
        }
        ProgressEvent::BatchFlushed {
            document_id,
            stored: batch_stored,
            ..
        } => {
            stored += batch_stored;
            bar.set_message(format!("{document_id}, {stored} chunks stored"));
        }
    })
}

fn dispatch(cli: &Cli, pipeline: &mut Pipeline) -> anyhow::Result<bool> {
    if cli.clear {
        pipeline.connect()?;
        let dropped = pipeline.clear()?;
        println!(
            "{}",
            if dropped {
                "collection dropped"
            } else {
                "collection did not exist"
            }
        );
        return Ok(true);
    }

    if cli.stats || cli.search.is_some() {
        return inspect(cli, pipeline);
    }

    pipeline.initialize()?;

    if let Some(path) = &cli.pdf {
        let report = pipeline
            .ingest(path, cli.document_id.as_deref())
            .with_context(|| format!("ingesting {}", path.display()))?;
        print_report(&report);
        return Ok(report.succeeded());
    }

    if let Some(directory) = &cli.directory {
        let outcomes = pipeline
            .ingest_directory(directory)
            .with_context(|| format!("ingesting directory {}", directory.display()))?;
        if outcomes.is_empty() {
            println!("no pdf files found in {}", directory.display());
            return Ok(false);
        }
        for (file_name, outcome) in &outcomes {
            print_outcome(file_name, outcome);
        }
        let succeeded = outcomes.values().filter(|outcome| outcome.success).count();
        println!("{succeeded}/{} documents ingested", outcomes.len());
        return Ok(succeeded == outcomes.len());
    }

    Ok(true)
}

// Read-only commands: never create or migrate the collection.
fn inspect(cli: &Cli, pipeline: &mut Pipeline) -> anyhow::Result<bool> {
    match pipeline.attach()? {
        None => {
            println!("collection does not exist");
            return Ok(false);
        }
        Some(false) if cli.search.is_some() => anyhow::bail!(
            "collection was built with a different embedding model or dimension; \
             re-ingest after --clear or switch back to the original settings"
        ),
        Some(false) => {
            println!("warning: collection does not match the configured embedding settings")
        }
        Some(true) => {}
    }

    if cli.stats {
        let stats = pipeline.storage_stats()?;
        println!("collection: {}", stats.collection.collection_name);
        println!("rows: {}", stats.collection.row_count);
        println!(
            "embedding: {} ({} dims)",
            stats.embedding_model, stats.embedding_dimension
        );
        println!(
            "chunking: size={} overlap={} batch={} embedding_batch={}",
            stats.chunk_size, stats.chunk_overlap, stats.batch_size, stats.embedding_batch_size
        );
        return Ok(true);
    }

    if let Some(query) = &cli.search {
        let hits = pipeline.search(query, cli.top_k)?;
        println!("query: {query}");
        for hit in hits {
            println!(
                "score={:.4} document_id={} page={} chunk={}",
                hit.score, hit.document_id, hit.page_number, hit.chunk_id
            );
            println!("  {}", hit.text);
        }
        return Ok(true);
    }

    Ok(true)
}

fn print_report(report: &IngestionReport) {
    println!(
        "{} {}: pages={}/{} chunks stored={}/{} ({:.1}%) dropped={} failed_storage={} in {:.2}s",
        if report.succeeded() { "ok" } else { "FAILED" },
        report.document_id,
        report.pages.yielded,
        report.pages.total,
        report.chunks_stored,
        report.chunks_generated,
        report.success_rate() * 100.0,
        report.chunks_dropped_embedding + report.chunks_dropped_validation,
        report.chunks_failed_storage,
        report.elapsed().as_secs_f64()
    );
    if let Some(failure) = &report.failure {
        println!("  reason: {failure}");
    }
}

fn print_outcome(file_name: &str, outcome: &DocumentOutcome) {
    match &outcome.report {
        Some(report) => print_report(report),
        None => println!(
            "FAILED {file_name} ({:.2}s): {}",
            outcome.processing_time.as_secs_f64(),
            outcome.error.as_deref().unwrap_or("unknown error")
        ),
    }
}
