use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use treesync_config::{Config, IndexBackend};
use treesync_index::{
    DispatchConfig, EmbeddingProvider, EngineConfig, EnrichingExtractor, GitignoreRules,
    IgnoreRules, LocalVectorIndex, NoIgnore, OllamaEmbeddings, OllamaEnricher,
    OllamaEnricherConfig, ParagraphSplitter, QdrantConfig, QdrantVectorIndex, StateStore,
    SyncEngine, SyncOutcome, TreeId, VectorIndex,
};

/// Incrementally sync a source tree into a chunk manifest and vector index.
#[derive(Parser, Debug)]
#[command(name = "treesync", version)]
struct Cli {
    /// Root of the source tree
    root: PathBuf,

    /// Identifier for the tree; derived from the root path when omitted
    #[arg(long)]
    tree_id: Option<String>,

    /// Configuration file (TOML); `./treesync.toml` is used if present
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Units processed concurrently
    #[arg(short, long)]
    workers: Option<usize>,

    /// Directory for caches, manifests and local indexes
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Do not apply the root .gitignore
    #[arg(long)]
    no_gitignore: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(workers) = cli.workers {
        config.workers = workers;
    }
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if cli.no_gitignore {
        config.respect_gitignore = false;
    }
    config.validate()?;

    let root = cli
        .root
        .canonicalize()
        .with_context(|| format!("Cannot open source root {}", cli.root.display()))?;
    let tree = match cli.tree_id {
        Some(id) => TreeId::new(&id),
        None => TreeId::from_source(&root.to_string_lossy()),
    };
    info!("Synchronising {} as {}", root.display(), tree);

    let rules: Box<dyn IgnoreRules> = if config.respect_gitignore {
        Box::new(GitignoreRules::load(&root)?)
    } else {
        Box::new(NoIgnore)
    };

    let enricher = OllamaEnricher::new(OllamaEnricherConfig {
        base_url: config.enrichment.base_url.clone(),
        model: config.enrichment.model.clone(),
        timeout: config.enrichment_timeout(),
    })?;
    let extractor = EnrichingExtractor::new(ParagraphSplitter::new(config.splitter.max_chars), enricher);

    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(OllamaEmbeddings::new(
        Some(config.embedding.base_url.clone()),
        Some(config.embedding.model.clone()),
        Some(config.embedding.dimensions),
    ));

    let index: Arc<dyn VectorIndex> = match config.index.backend {
        IndexBackend::Local => Arc::new(LocalVectorIndex::open(&config.data_dir, &tree, embedder)?),
        IndexBackend::Qdrant => Arc::new(QdrantVectorIndex::connect(
            &QdrantConfig {
                url: config.index.qdrant_url.clone(),
                api_key: config.index.api_key.clone(),
                collection_prefix: config.index.collection_prefix.clone(),
            },
            &tree,
            embedder,
        )?),
    };

    let engine = SyncEngine::new(
        Arc::new(extractor),
        index,
        StateStore::new(&config.data_dir),
        EngineConfig {
            dispatch: DispatchConfig {
                workers: config.workers,
                unit_timeout: config.unit_timeout(),
            },
            binary_extensions: config.binary_extensions.clone(),
        },
    );

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, abandoning in-flight units");
            on_signal.cancel();
        }
    });

    let report = engine.run(&root, &tree, rules.as_ref(), &cancel).await?;

    for failure in &report.failures {
        warn!("{}: {}", failure.unit, failure.error);
    }
    match report.outcome {
        SyncOutcome::NoChanges => println!("{}: up to date ({} units)", tree, report.unchanged),
        SyncOutcome::Applied(_) => println!("{}: {}", tree, report),
    }
    Ok(())
}
