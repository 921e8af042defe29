// src/main.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;

use disclosure_extractor::config::EngineConfig;
use disclosure_extractor::documents::{
    text_layer, DocumentEnvelope, DocumentSource, FsDocumentSource, MemoryDocumentSource, RecordType,
};
use disclosure_extractor::extractors::version::split_version_ref;
use disclosure_extractor::extractors::{ExtractorCatalog, ExtractorVersionId};
use disclosure_extractor::ocr::{DisabledOcr, HttpOcrEngine, OcrEngine};
use disclosure_extractor::orchestrator::{CancellationFlag, Orchestrator, ReprocessRequest};
use disclosure_extractor::registry::{FsRegistryStore, VersionRegistry};
use disclosure_extractor::storage::{ClassificationQueue, ResultStore, WriteOutcome};
use disclosure_extractor::utils::{html_debug, logging};
use disclosure_extractor::AppError;

/// Command line interface for the disclosure extraction engine
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory; overrides `data_dir` from the config file
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Register a built-in extractor version with the registry
    Deploy {
        record_type: RecordType,
        /// class@major.minor.patch
        extractor: String,
        #[arg(long, default_value = "")]
        changelog: String,
    },

    /// Extract a single document file and print the result
    Extract {
        file: PathBuf,
        #[arg(long)]
        year: i32,
        /// Defaults to the file name without extension
        #[arg(long)]
        doc_id: Option<String>,
        /// Skip template detection and treat the document as this type
        #[arg(long)]
        record_type: Option<RecordType>,
        /// class@major.minor.patch; defaults to production, then the newest built-in
        #[arg(long)]
        extractor: Option<String>,
        /// Also store the result under its extractor version
        #[arg(long)]
        save: bool,
        /// Save an annotated HTML trace of where each rule matched
        #[arg(short, long)]
        debug: bool,
    },

    /// Reprocess a document population under one extractor version
    Reprocess {
        record_type: RecordType,
        /// class@major.minor.patch
        extractor: String,
        #[arg(long)]
        start_year: i32,
        #[arg(long)]
        end_year: i32,
        #[arg(long)]
        batch_size: Option<usize>,
        /// Overrides `max_concurrency` from the config file
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Only count the matching documents
        #[arg(long)]
        dry_run: bool,
        /// Replace existing results of this version
        #[arg(long)]
        overwrite: bool,
    },

    /// Make a reviewed version production
    Promote { record_type: RecordType, extractor: String },

    /// Point production back at a previous production version
    Rollback { record_type: RecordType, extractor: String },

    /// Reject a candidate version
    Retire { record_type: RecordType, extractor: String },

    /// List the deployment history of an extractor class
    Versions { record_type: RecordType, extractor_class: String },

    /// Print a stored result
    Show {
        record_type: RecordType,
        year: i32,
        doc_id: String,
        /// class@major.minor.patch, or a bare class for its production version
        #[arg(long)]
        extractor: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn version_id(record_type: RecordType, extractor: &str) -> Result<ExtractorVersionId, AppError> {
    ExtractorVersionId::parse(record_type, extractor).map_err(AppError::InvalidArgument)
}

fn build_orchestrator(config: EngineConfig, source: Arc<dyn DocumentSource>) -> Result<Orchestrator, AppError> {
    let ocr: Arc<dyn OcrEngine> = match &config.ocr_endpoint {
        Some(endpoint) => {
            tracing::info!("OCR fallback via {}", endpoint);
            Arc::new(HttpOcrEngine::new(endpoint.clone(), config.ocr_timeout()))
        }
        None => {
            tracing::info!("No OCR endpoint configured; OCR attempts will fail");
            Arc::new(DisabledOcr)
        }
    };
    let registry = VersionRegistry::new(Arc::new(FsRegistryStore::new(config.registry_dir())));
    let store = ResultStore::new(config.results_dir())?;
    let queue = ClassificationQueue::new(config.queue_dir());
    Ok(Orchestrator::new(
        config,
        Arc::new(ExtractorCatalog::builtin()),
        Arc::new(registry),
        source,
        Arc::new(store),
        Arc::new(queue),
        ocr,
    ))
}

fn load_config(cli: &Cli) -> Result<EngineConfig, AppError> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    if let Some(data_dir) = &cli.data_dir {
        config.data_dir = data_dir.clone();
    }
    Ok(config)
}

fn doc_id_from(file: &Path) -> Result<String, AppError> {
    file.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| AppError::InvalidArgument(format!("cannot derive a doc id from {}", file.display())))
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // 1. Parse CLI arguments
    let cli = Cli::parse();

    // 2. Setup logging (reads RUST_LOG env var)
    logging::setup_logging(if cli.verbose { "debug" } else { "info" });

    // 3. Configuration: file, then environment, then flags
    let mut config = load_config(&cli)?;
    tracing::debug!("Effective configuration: {:?}", config);

    match cli.command {
        Command::Deploy {
            record_type,
            extractor,
            changelog,
        } => {
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let version = orchestrator.deploy(record_type, &extractor, &changelog)?;
            print_json(&version)?;
        }

        Command::Extract {
            file,
            year,
            doc_id,
            record_type,
            extractor,
            save,
            debug,
        } => {
            let bytes = std::fs::read(&file)?;
            let envelope = DocumentEnvelope {
                doc_id: match doc_id {
                    Some(doc_id) => doc_id,
                    None => doc_id_from(&file)?,
                },
                year,
                record_type,
            };
            let debug_dir = config.data_dir.join("debug");
            let orchestrator = Arc::new(build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?);

            // The OCR client blocks, so the pipeline runs off the async workers.
            let worker = Arc::clone(&orchestrator);
            let result = tokio::task::spawn_blocking(move || {
                worker.extract_document(&envelope, &bytes, extractor.as_deref()).map(|r| (r, bytes))
            })
            .await
            .map_err(|e| AppError::Task(e.to_string()))?;
            let (result, bytes) = result?;

            if debug {
                match text_layer::read_text(&bytes) {
                    Ok(text) => {
                        let patterns = orchestrator
                            .resolve_extractor(result.record_type, Some(&result.extractor.version_ref()))?
                            .debug_patterns();
                        let path = debug_dir.join(format!("{}_rule_trace.html", result.doc_id));
                        if let Err(e) = html_debug::write_rule_trace(&text, &path, &patterns) {
                            tracing::warn!("Failed to create rule trace: {}", e);
                        }
                    }
                    Err(e) => tracing::warn!("No rule trace for {}: {}", result.doc_id, e),
                }
            }
            if save {
                match orchestrator.store().write(&result, false)? {
                    WriteOutcome::Written => tracing::info!("Stored result for {} under {}", result.doc_id, result.extractor),
                    WriteOutcome::AlreadyPresent => tracing::warn!(
                        "A result for {} under {} already exists; kept it",
                        result.doc_id,
                        result.extractor
                    ),
                }
            }
            print_json(&result)?;
        }

        Command::Reprocess {
            record_type,
            extractor,
            start_year,
            end_year,
            batch_size,
            max_concurrency,
            dry_run,
            overwrite,
        } => {
            if let Some(max_concurrency) = max_concurrency {
                config.max_concurrency = max_concurrency;
            }
            config.validate()?;
            let source = FsDocumentSource::open(config.documents_dir())?;
            let orchestrator = build_orchestrator(config, Arc::new(source))?;

            let cancel = CancellationFlag::new();
            let on_interrupt = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::warn!("Interrupt received; stopping after the current batch");
                    on_interrupt.cancel();
                }
            });

            let request = ReprocessRequest {
                record_type,
                year_range: (start_year, end_year),
                extractor_version: extractor,
                batch_size,
                dry_run,
                overwrite,
            };
            let report = orchestrator.reprocess(&request, &cancel).await?;
            print_json(&report)?;
        }

        Command::Promote { record_type, extractor } => {
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let version = orchestrator.registry().promote(&version_id(record_type, &extractor)?)?;
            print_json(&version)?;
        }

        Command::Rollback { record_type, extractor } => {
            let (class, target) = split_version_ref(&extractor).map_err(AppError::InvalidArgument)?;
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let version = orchestrator.registry().rollback(record_type, &class, target)?;
            print_json(&version)?;
        }

        Command::Retire { record_type, extractor } => {
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let version = orchestrator.registry().retire(&version_id(record_type, &extractor)?)?;
            print_json(&version)?;
        }

        Command::Versions {
            record_type,
            extractor_class,
        } => {
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let versions = orchestrator.registry().list_versions(record_type, &extractor_class)?;
            if versions.is_empty() {
                tracing::warn!("No versions deployed for {}/{}", record_type, extractor_class);
            }
            print_json(&versions)?;
        }

        Command::Show {
            record_type,
            year,
            doc_id,
            extractor,
        } => {
            let orchestrator = build_orchestrator(config, Arc::new(MemoryDocumentSource::new()))?;
            let store = orchestrator.store();
            let result = if extractor.contains('@') {
                store.load(&version_id(record_type, &extractor)?, year, &doc_id)?
            } else {
                store.load_current(orchestrator.registry(), record_type, &extractor, year, &doc_id)?
            };
            match result {
                Some(result) => print_json(&result)?,
                None => {
                    return Err(AppError::InvalidArgument(format!(
                        "no {} result for {} ({}) under {}",
                        record_type, doc_id, year, extractor
                    )))
                }
            }
        }
    }

    Ok(())
}
