//! Mnemo CLI
//!
//! Offline tooling: chat-dump ingestion (with per-conversation shards),
//! ANN companion builds, snapshot stats, and ad-hoc search.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mnemo::embedding::{create_embedder, DualVectorGenerator, EmbedderConfig};
use mnemo::index::{FusionWeights, HybridIndex, IndexConfig, SearchQuery};
use mnemo::ingest::{load_conversation, SegmentConfig, SessionBuilder};
use mnemo::store::{SnapshotPaths, VectorStore};
use mnemo::MnemoError;

#[derive(Parser)]
#[command(name = "mnemo")]
#[command(about = "Mnemo offline ingest and index tooling")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(ClapArgs, Debug)]
struct EmbedArgs {
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

    /// Vector dimensionality
    #[arg(long, env = "MNEMO_EMBED_DIMENSION", default_value = "768")]
    dimension: usize,
}

impl EmbedArgs {
    fn config(&self) -> EmbedderConfig {
        EmbedderConfig {
            backend: self.embedding_backend.clone(),
            base_url: self.embed_base_url.clone(),
            api_key: self.embed_api_key.clone(),
            model: self.embed_model.clone(),
            dimensions: self.dimension,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest a directory of conversation dumps into a store snapshot
    Ingest {
        /// Directory of conversation JSON dumps
        data_dir: PathBuf,

        /// Snapshot base path for the merged store
        #[arg(long, env = "MNEMO_STORE_PATH", default_value = "vector_stores/conversations")]
        out: String,

        #[command(flatten)]
        embed: EmbedArgs,

        /// Segmentation time gap in minutes
        #[arg(long, default_value = "30")]
        time_gap_minutes: i64,

        /// Minimum messages per session
        #[arg(long, default_value = "3")]
        min_msgs: usize,

        /// Maximum messages per session
        #[arg(long, default_value = "20")]
        max_msgs: usize,

        /// Messages taken from each side of a boundary overlap
        #[arg(long, default_value = "5")]
        overlap_window: usize,

        /// Longest gap (hours) still bridged by an overlap session
        #[arg(long, default_value = "2")]
        overlap_max_gap_hours: i64,

        /// Skip conversations whose shard already exists
        #[arg(long)]
        resume: bool,

        /// Also build and save ANN companions after the merge
        #[arg(long)]
        build_ann: bool,
    },
    /// Build ANN companions for an existing snapshot
    BuildAnn {
        /// Snapshot base path
        #[arg(long, env = "MNEMO_STORE_PATH", default_value = "vector_stores/conversations")]
        store_path: String,

        /// HNSW connectivity
        #[arg(long, default_value = "32")]
        hnsw_m: usize,
    },
    /// Print snapshot statistics
    Stats {
        /// Snapshot base path
        #[arg(long, env = "MNEMO_STORE_PATH", default_value = "vector_stores/conversations")]
        store_path: String,
    },
    /// Run a hybrid search against a snapshot
    Search {
        /// Query text
        query: String,

        /// Snapshot base path
        #[arg(long, env = "MNEMO_STORE_PATH", default_value = "vector_stores/conversations")]
        store_path: String,

        /// Maximum results
        #[arg(short, long, default_value = "5")]
        top_k: usize,

        #[command(flatten)]
        embed: EmbedArgs,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Ingest {
            data_dir,
            out,
            embed,
            time_gap_minutes,
            min_msgs,
            max_msgs,
            overlap_window,
            overlap_max_gap_hours,
            resume,
            build_ann,
        } => {
            let segment = SegmentConfig {
                time_gap_secs: time_gap_minutes * 60,
                min_msgs,
                max_msgs,
                overlap_window,
                overlap_max_gap_secs: overlap_max_gap_hours * 3600,
            };
            ingest(data_dir, out, embed, segment, resume, build_ann).await
        }
        Commands::BuildAnn { store_path, hnsw_m } => build_ann_companions(store_path, hnsw_m),
        Commands::Stats { store_path } => stats(store_path),
        Commands::Search { query, store_path, top_k, embed } => {
            search(query, store_path, top_k, embed).await
        }
    }
}

async fn ingest(
    data_dir: PathBuf,
    out: String,
    embed: EmbedArgs,
    segment: SegmentConfig,
    resume: bool,
    build_ann: bool,
) -> anyhow::Result<()> {
    let embedder = create_embedder(&embed.config())?;
    let generator = DualVectorGenerator::new(embedder);
    let builder = SessionBuilder::new(segment);

    let paths = SnapshotPaths::new(&out);
    let shard_dir = paths
        .store
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .join("shards");
    std::fs::create_dir_all(&shard_dir)?;

    let mut dumps: Vec<PathBuf> = std::fs::read_dir(&data_dir)
        .with_context(|| format!("cannot read data dir {}", data_dir.display()))?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "json").unwrap_or(false))
        .collect();
    dumps.sort();
    anyhow::ensure!(!dumps.is_empty(), "no .json dumps in {}", data_dir.display());

    let mut total_failed = 0usize;
    for dump in &dumps {
        let stem = dump
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "conversation".to_string());
        let shard_path = shard_dir.join(format!("{}.store", stem));
        if resume && shard_path.exists() {
            println!("skipping {} (shard exists)", stem);
            continue;
        }

        let (messages, conv) = match load_conversation(dump) {
            Ok(loaded) => loaded,
            Err(MnemoError::InvalidInput(msg)) => {
                eprintln!("skipping unreadable dump: {}", msg);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        let mut sessions = builder.split(&messages, &conv);
        let failed = generator.generate(&mut sessions).await?;
        total_failed += failed;

        let mut shard = VectorStore::new(embed.dimension);
        for session in sessions {
            shard.add(session.content_vector, session.context_vector, session.meta)?;
        }
        shard.save(&shard_path)?;
        println!("{}: {} messages -> {} sessions", conv.name, messages.len(), shard.len());
    }

    // Merge every shard (including ones kept from a previous resume run)
    let mut shard_files: Vec<PathBuf> = std::fs::read_dir(&shard_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().map(|e| e == "store").unwrap_or(false))
        .collect();
    shard_files.sort();

    let mut merged = VectorStore::new(embed.dimension);
    for shard_file in &shard_files {
        merged.merge(VectorStore::load(shard_file)?)?;
    }
    merged.save(&paths.store)?;
    println!(
        "merged {} shards into {} ({} sessions, {} with zero vectors)",
        shard_files.len(),
        paths.store.display(),
        merged.len(),
        total_failed
    );

    if build_ann {
        build_graphs(&merged, &paths, 32)?;
    }
    Ok(())
}

fn build_ann_companions(store_path: String, hnsw_m: usize) -> anyhow::Result<()> {
    let paths = SnapshotPaths::new(&store_path);
    let store = VectorStore::load(&paths.store)?;
    build_graphs(&store, &paths, hnsw_m)
}

fn build_graphs(store: &VectorStore, paths: &SnapshotPaths, hnsw_m: usize) -> anyhow::Result<()> {
    use mnemo::index::{AnnParams, HnswGraph};

    let params = AnnParams { m: hnsw_m, ..AnnParams::default() };
    let content = HnswGraph::build(store.content_vectors(), &params);
    content.save(&paths.content_ann)?;
    let context = HnswGraph::build(store.context_vectors(), &params);
    context.save(&paths.context_ann)?;
    println!(
        "ann companions written: {} / {}",
        paths.content_ann.display(),
        paths.context_ann.display()
    );
    Ok(())
}

fn stats(store_path: String) -> anyhow::Result<()> {
    let paths = SnapshotPaths::new(&store_path);
    let store = VectorStore::load(&paths.store)?;

    let conversations: std::collections::BTreeSet<&str> = store
        .metadata()
        .iter()
        .map(|m| m.conversation_name.as_str())
        .collect();
    let earliest = store.metadata().iter().map(|m| m.start_ts).min().unwrap_or(0);
    let latest = store.metadata().iter().map(|m| m.start_ts).max().unwrap_or(0);

    println!("snapshot:       {}", paths.store.display());
    println!("sessions:       {}", store.len());
    println!("conversations:  {}", conversations.len());
    println!("dimension:      {}", store.dimension());
    println!("time range:     {} .. {}", earliest, latest);
    println!(
        "ann companions: {}",
        if paths.content_ann.exists() && paths.context_ann.exists() { "present" } else { "absent" }
    );
    Ok(())
}

async fn search(
    query: String,
    store_path: String,
    top_k: usize,
    embed: EmbedArgs,
) -> anyhow::Result<()> {
    let paths = SnapshotPaths::new(&store_path);
    let store = VectorStore::load(&paths.store)?;

    let embedder = create_embedder(&EmbedderConfig {
        dimensions: store.dimension(),
        ..embed.config()
    })?;
    let mut index = HybridIndex::new(store, IndexConfig::default());
    index.build_lexical();

    let texts = [query.clone()];
    let query_vector = embedder.embed(&texts).await?.remove(0);
    let hits = index.search(&SearchQuery {
        content_vector: &query_vector,
        context_vector: None,
        text: &query,
        top_k,
        filters: &[],
        weights: FusionWeights::default(),
    })?;

    if hits.is_empty() {
        println!("no results");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({}, bm25 {:.2}, vec {:.2})",
            rank + 1,
            hit.hybrid,
            hit.meta.conversation_name,
            hit.meta.session_kind.as_str(),
            hit.bm25,
            hit.vector,
        );
        let preview: String = hit.meta.content_text.chars().take(120).collect();
        println!("   {}", preview.replace('\n', " / "));
    }
    Ok(())
}
