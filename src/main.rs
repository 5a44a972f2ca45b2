//! Amnesia Reader demo
//!
//! Opens a directory of XHTML content units in the headless renderer, restores
//! preferences and runs a search against the whole book.
//!
//! ```text
//! amnesia-reader <book-dir> [query]
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use amnesia_reader::error;
use amnesia_reader::narration::{SpeechEnd, SpeechSynthesizer, Utterance, Voice};
use amnesia_reader::settings::{JsonFileSettings, MemorySettings, SettingsStore};
use amnesia_reader::{
    EngineConfig, MemoryRenderer, MemoryStore, ReaderSession, Renderer, SessionServices,
    StoreScope,
};

/// Narration backend that writes utterances to the log
struct LogSynth;

#[async_trait]
impl SpeechSynthesizer for LogSynth {
    fn voices(&self) -> Vec<Voice> {
        vec![Voice {
            id: "log".to_string(),
            name: "Log".to_string(),
            lang: "en".to_string(),
            default: true,
        }]
    }

    async fn speak(&self, utterance: Utterance) -> amnesia_reader::Result<SpeechEnd> {
        tracing::info!(chars = utterance.text.chars().count(), rate = utterance.rate, "Speaking");
        Ok(SpeechEnd::Finished)
    }

    fn pause(&self) {}

    fn resume(&self) {}

    fn cancel(&self) {}
}

fn content_units(dir: &Path) -> anyhow::Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|e| e.to_str()),
                Some("xhtml") | Some("html") | Some("htm")
            )
        })
        .collect();
    files.sort();
    Ok(files)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "amnesia_reader=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = EngineConfig::from_env();

    let mut args = std::env::args().skip(1);
    let Some(book_dir) = args.next().map(PathBuf::from) else {
        bail!("usage: amnesia-reader <book-dir> [query]");
    };
    let query = args.next();

    let mut sections = Vec::new();
    for path in content_units(&book_dir)? {
        let markup = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let href = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        sections.push((href, markup));
    }
    if sections.is_empty() {
        bail!("No content units found in {}", book_dir.display());
    }

    let renderer = Arc::new(MemoryRenderer::from_sections(sections)?);

    let settings: Arc<dyn SettingsStore> = match &config.settings_path {
        Some(path) => Arc::new(JsonFileSettings::open(path)?),
        None => Arc::new(MemorySettings::new()),
    };

    let book_id = book_dir
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());

    let session = ReaderSession::new(
        config,
        StoreScope::new("local", book_id),
        SessionServices {
            store: Arc::new(MemoryStore::new()),
            settings,
            synth: Arc::new(LogSynth),
            on_error: error::log_only(),
        },
    );

    session.mount(renderer.clone(), None).await?;
    println!(
        "{} content units, {} pages",
        renderer.section_count(),
        renderer.page_count()
    );

    if let Some(query) = query {
        session.search().search(&query).await;
        let results = session.search().results();
        println!("{} results for {:?}", results.len(), query);
        for (i, result) in results.iter().enumerate() {
            println!("{:>4}  [{}] {}", i + 1, result.section, result.excerpt);
        }
    }

    session.unmount().await;
    Ok(())
}
