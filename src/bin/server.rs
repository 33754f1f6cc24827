//! Mnemo recall API server
//!
//! Loads a store snapshot, builds or loads the indices, and serves the
//! recall API. Exits 1 on configuration errors (missing snapshot,
//! unusable companions, bad listen address).

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemo::embedding::{create_embedder, EmbedderConfig};
use mnemo::error::{MnemoError, Result};
use mnemo::index::{FusionWeights, HnswGraph, HybridIndex, IndexConfig};
use mnemo::recall::{RecallConfig, RecallService};
use mnemo::server::{serve, AppState};
use mnemo::store::{SnapshotPaths, VectorStore};

#[derive(Parser, Debug)]
#[command(name = "mnemo-server")]
#[command(about = "Mnemo recall API server")]
#[command(version)]
struct Args {
    /// Snapshot base path; expects `<path>.store` with optional
    /// `<path>.content.ann` / `<path>.context.ann` companions
    #[arg(
        long,
        env = "MNEMO_STORE_PATH",
        default_value = "vector_stores/conversations"
    )]
    store_path: String,

    /// Listen host
    #[arg(long, env = "MNEMO_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Listen port
    #[arg(long, env = "MNEMO_PORT", default_value = "8000")]
    port: u16,

    /// Embedding backend (rest, hashing)
    #[arg(long, env = "MNEMO_EMBEDDING_BACKEND", default_value = "hashing")]
    embedding_backend: String,

    /// OpenAI-compatible API base URL
    #[arg(
        long,
        env = "MNEMO_EMBED_BASE_URL",
        default_value = "https://api.openai.com/v1"
    )]
    embed_base_url: String,

    /// Embedding API key (required for the rest backend)
    #[arg(long, env = "MNEMO_EMBED_API_KEY")]
    embed_api_key: Option<String>,

    /// Embedding model name
    #[arg(long, env = "MNEMO_EMBED_MODEL", default_value = "text-embedding-3-small")]
    embed_model: String,

    /// Corpus size at which HNSW takes over from linear scan
    #[arg(long, env = "MNEMO_ANN_THRESHOLD", default_value = "5000")]
    ann_threshold: usize,

    /// HNSW connectivity
    #[arg(long, env = "MNEMO_HNSW_M", default_value = "32")]
    hnsw_m: usize,

    /// Recall cache TTL in seconds
    #[arg(long, env = "MNEMO_CACHE_TTL", default_value = "3600")]
    cache_ttl_secs: u64,

    /// Fusion weight of the normalized BM25 score
    #[arg(long, env = "MNEMO_BM25_WEIGHT", default_value = "0.5")]
    bm25_weight: f32,

    /// Fusion weight of the blended vector score
    #[arg(long, env = "MNEMO_VECTOR_WEIGHT", default_value = "0.5")]
    vector_weight: f32,

    /// Content share of the dual-vector blend
    #[arg(long, env = "MNEMO_CONTENT_WEIGHT", default_value = "0.85")]
    content_weight: f32,

    /// Context share of the dual-vector blend
    #[arg(long, env = "MNEMO_CONTEXT_WEIGHT", default_value = "0.15")]
    context_weight: f32,

    /// Rebuild the ANN graphs in-place instead of loading companions
    #[arg(long)]
    rebuild_ann: bool,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(args).await {
        tracing::error!(error = %e, "server startup failed");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let paths = SnapshotPaths::new(&args.store_path);
    let store = VectorStore::load(&paths.store)?;

    let index_config = IndexConfig {
        ann_threshold: args.ann_threshold,
        hnsw_m: args.hnsw_m,
        ..IndexConfig::default()
    };
    let mut index = HybridIndex::new(store, index_config);
    index.build_lexical();

    if args.rebuild_ann {
        index.build_ann();
    } else if paths.content_ann.exists() && paths.context_ann.exists() {
        let content = HnswGraph::load(&paths.content_ann)?;
        let context = HnswGraph::load(&paths.context_ann)?;
        index.set_ann(content, context)?;
    }
    tracing::info!(
        memories = index.store().len(),
        backend = if index.ann_active() { "hnsw" } else { "linear" },
        "indices ready"
    );

    let embedder = create_embedder(&EmbedderConfig {
        backend: args.embedding_backend,
        base_url: args.embed_base_url,
        api_key: args.embed_api_key,
        model: args.embed_model,
        dimensions: index.store().dimension(),
    })?;

    let recall_config = RecallConfig {
        cache_ttl: Duration::from_secs(args.cache_ttl_secs),
        weights: FusionWeights {
            bm25: args.bm25_weight,
            vector: args.vector_weight,
            content: args.content_weight,
            context: args.context_weight,
        },
        ..RecallConfig::default()
    };
    let service = RecallService::new(Arc::new(index), embedder, recall_config);

    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .map_err(|e| MnemoError::Config(format!("invalid listen address: {}", e)))?;
    serve(AppState::new(Arc::new(service)), addr).await?;
    Ok(())
}
