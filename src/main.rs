use std::{
    fs,
    path::PathBuf,
    sync::{atomic::Ordering, Arc},
};

use anyhow::Context;
use clap::Parser;
use harvester::{chrome::ChromeBrowser, config::CrawlerConfig, engine::CrawlEngine, sink};
use log::{error, info, warn};
use serde::Serialize;
use signal_hook::consts::{SIGINT, SIGTERM};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Documentation-site component crawler", long_about = None)]
struct Args {
    /// Path to a JSON file holding one crawl configuration or an array of them
    #[arg(short = 'c', long)]
    config: PathBuf,
    /// Overrides the output directory of every configured crawl
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,
    /// Resume each crawl from its checkpoint when one exists
    #[arg(short = 'r', long, default_value_t = false)]
    resume: bool,
    /// Caps the number of pages visited per crawl
    #[arg(short = 'm', long)]
    max_pages: Option<usize>,
}

#[derive(Serialize)]
struct BatchSummary {
    generated_at: chrono::DateTime<chrono::Utc>,
    crawls: Vec<SummaryEntry>,
}

#[derive(Serialize)]
struct SummaryEntry {
    name: String,
    source: String,
    success: bool,
    components: usize,
    pages: usize,
    errors: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    let mut configs = load_configs(&args.config)?;
    for config in configs.iter_mut() {
        if let Some(dir) = &args.output_dir {
            config.output_dir = dir.clone();
        }
        if args.resume {
            config.resume_from_checkpoint = true;
        }
        if args.max_pages.is_some() {
            config.max_pages = args.max_pages;
        }
        config.validate()?;
    }

    let summary_dir = args
        .output_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("./output"));

    let mut summary = vec![];
    for config in configs {
        let name = config.name.clone();
        let source = config.base_url.clone();

        let browser = Arc::new(
            ChromeBrowser::launch(config.headless)
                .with_context(|| format!("could not launch browser for {}", name))?,
        );
        let mut engine = CrawlEngine::new(config.clone(), browser)?;

        // SIGINT/SIGTERM pause the running crawl; once set, the flags of
        // the remaining crawls are set too, so the whole batch drains
        let pause = engine.pause_handle();
        signal_hook::flag::register(SIGTERM, pause.clone())?;
        signal_hook::flag::register(SIGINT, pause.clone())?;

        match engine.run().await {
            Ok(result) => {
                sink::write_outputs(&config.output_dir, &name, &result)?;
                summary.push(SummaryEntry {
                    name,
                    source,
                    success: result.success,
                    components: result.metadata.total_components,
                    pages: result.metadata.total_pages,
                    errors: result.metadata.errors.len(),
                });
            }
            Err(e) => {
                error!("crawl of {} failed: {:#}", name, e);
                summary.push(SummaryEntry {
                    name,
                    source,
                    success: false,
                    components: 0,
                    pages: 0,
                    errors: 1,
                });
            }
        }

        if pause.load(Ordering::Relaxed) {
            warn!("interrupted, skipping remaining crawls");
            break;
        }
    }

    fs::create_dir_all(&summary_dir)?;
    let summary = BatchSummary {
        generated_at: chrono::Utc::now(),
        crawls: summary,
    };
    let summary_path = summary_dir.join("crawl-summary.json");
    fs::write(&summary_path, serde_json::to_vec_pretty(&summary)?)
        .with_context(|| format!("could not write summary {:?}", summary_path))?;
    info!("wrote batch summary to {:?}", summary_path);

    Ok(())
}

/// The config file may hold a single crawl or an array of crawls.
fn load_configs(path: &PathBuf) -> anyhow::Result<Vec<CrawlerConfig>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read config file {:?}", path))?;
    serde_json::from_str::<Vec<CrawlerConfig>>(&raw)
        .or_else(|_| serde_json::from_str::<CrawlerConfig>(&raw).map(|c| vec![c]))
        .with_context(|| format!("could not parse config file {:?}", path))
}
