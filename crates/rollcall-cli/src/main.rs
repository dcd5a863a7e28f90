use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use rollcall_core::types::Embedding;
use rollcall_core::{MatchingEngine, ProfileStore};

mod config;
mod gallery;
mod session;

use config::CliConfig;
use gallery::{GalleryFile, PhotoFile};
use session::CancelToken;

#[derive(Parser)]
#[command(name = "rollcall", about = "Rollcall photo attendance matching CLI")]
struct Cli {
    /// Gallery JSON path (overrides ROLLCALL_GALLERY).
    #[arg(long, global = true)]
    gallery: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Match one photo's detections against the gallery
    Match {
        /// Photo observation file (JSON)
        photo: PathBuf,
        /// Attach a per-face top-N candidate trace to the output
        #[arg(long, default_value_t = 0)]
        trace: usize,
    },
    /// Process several photo files as one attendance session
    Batch {
        /// Photo observation files (JSON), processed in order
        photos: Vec<PathBuf>,
    },
    /// Enroll a new identity from an embeddings file
    Enroll {
        /// Identity id (e.g., student number)
        #[arg(short, long)]
        id: String,
        /// Display label
        #[arg(short, long)]
        label: String,
        /// JSON file: array of per-model embedding sets; the first
        /// becomes the primary reference, the rest variants
        embeddings: PathBuf,
    },
    /// List enrolled identities
    List,
    /// Remove an enrolled identity
    Remove {
        /// Identity id to remove
        id: String,
    },
    /// Show per-identity match statistics
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let mut cfg = CliConfig::from_env();
    if let Some(path) = cli.gallery {
        cfg.gallery_path = path;
    }

    match cli.command {
        Commands::Match { photo, trace } => run_match(&cfg, &photo, trace).await,
        Commands::Batch { photos } => run_batch(&cfg, &photos).await,
        Commands::Enroll { id, label, embeddings } => run_enroll(&cfg, &id, &label, &embeddings),
        Commands::List => run_list(&cfg),
        Commands::Remove { id } => run_remove(&cfg, &id),
        Commands::Stats => run_stats(&cfg),
    }
}

/// Build the engine over the persisted gallery.
fn open_engine(cfg: &CliConfig, trace: usize) -> Result<(MatchingEngine, GalleryFile)> {
    let mut engine_cfg = cfg.engine_config()?;
    if trace > 0 {
        engine_cfg.trace_top_n = trace;
    }

    let gallery = GalleryFile::load(&cfg.gallery_path)?;
    let store = Arc::new(ProfileStore::from_profiles(
        engine_cfg.profile.clone(),
        gallery.profiles.clone(),
    ));
    Ok((MatchingEngine::new(engine_cfg, store), gallery))
}

async fn run_match(cfg: &CliConfig, photo_path: &PathBuf, trace: usize) -> Result<()> {
    let (engine, _) = open_engine(cfg, trace)?;
    if engine.store().is_empty() {
        bail!("gallery {} has no enrolled identities", cfg.gallery_path.display());
    }

    let photo = PhotoFile::load(photo_path)?;
    let observations = photo.observations(&engine.config().quality);

    // The store outlives the engine handed to the session thread.
    let store = engine.store().clone();
    let handle = session::spawn_session(engine, cfg.session_queue);
    let report = handle
        .process(observations, CancelToken::new())
        .await
        .context("session worker failed")?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    save_profiles(cfg, &store)
}

async fn run_batch(cfg: &CliConfig, photos: &[PathBuf]) -> Result<()> {
    if photos.is_empty() {
        bail!("no photo files given");
    }
    let (engine, _) = open_engine(cfg, 0)?;
    let quality_cfg = engine.config().quality.clone();
    let store = engine.store().clone();
    let handle = session::spawn_session(engine, cfg.session_queue);

    for path in photos {
        let photo = PhotoFile::load(path)?;
        let observations = photo.observations(&quality_cfg);
        let report = handle
            .process(observations, CancelToken::new())
            .await
            .context("session worker failed")?;

        let matched = report.decisions.iter().filter(|d| d.is_matched()).count();
        tracing::info!(
            photo = %path.display(),
            faces = report.decisions.len(),
            matched,
            "photo processed"
        );
        println!("{}", serde_json::to_string(&report.decisions)?);
    }

    save_profiles(cfg, &store)
}

/// Persist the store's current profiles to the gallery file.
fn save_profiles(cfg: &CliConfig, store: &Arc<ProfileStore>) -> Result<()> {
    GalleryFile {
        profiles: store.snapshot(),
    }
    .save(&cfg.gallery_path)
}

fn run_enroll(cfg: &CliConfig, id: &str, label: &str, embeddings_path: &PathBuf) -> Result<()> {
    let (engine, _) = open_engine(cfg, 0)?;

    let raw = std::fs::read_to_string(embeddings_path)
        .with_context(|| format!("reading embeddings {}", embeddings_path.display()))?;
    let sets: Vec<BTreeMap<String, Embedding>> =
        serde_json::from_str(&raw).context("parsing embeddings file")?;

    engine.store().enroll(id, label, sets)?;
    save_profiles(cfg, engine.store())?;
    println!("enrolled {id} ({label})");
    Ok(())
}

fn run_list(cfg: &CliConfig) -> Result<()> {
    let (engine, _) = open_engine(cfg, 0)?;
    for profile in engine.store().snapshot() {
        let variants: usize = profile.variants.values().map(Vec::len).sum();
        println!(
            "{}  {}  models={}  variants={variants}",
            profile.id,
            profile.label,
            profile.primary.len(),
        );
    }
    Ok(())
}

fn run_remove(cfg: &CliConfig, id: &str) -> Result<()> {
    let (engine, _) = open_engine(cfg, 0)?;
    if !engine.store().remove(id) {
        bail!("identity {id} is not enrolled");
    }
    save_profiles(cfg, engine.store())?;
    println!("removed {id}");
    Ok(())
}

fn run_stats(cfg: &CliConfig) -> Result<()> {
    let (engine, _) = open_engine(cfg, 0)?;
    for profile in engine.store().snapshot() {
        println!(
            "{}  threshold={:.3}  success={}  failure={}  rate={:.2}  updated={}",
            profile.id,
            profile.threshold,
            profile.successes,
            profile.failures,
            profile.success_rate(),
            profile.updated_at.to_rfc3339(),
        );
    }
    Ok(())
}
