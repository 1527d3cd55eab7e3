use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, RwLock,
    },
};

use chrono::Utc;
use futures::StreamExt;
use tokio::{sync::mpsc, task};

use crate::{
    browser::{Browser, Page},
    checkpoint::CheckpointStore,
    config::{CrawlerConfig, SelectorConfig},
    extract::{Extractor, ExtractorPipeline},
    fetcher::{establish_session, PageFetcher},
    frontier::UrlFrontier,
    limiter::RateLimiter,
    types::{
        CheckpointState, Component, CrawlErrorEntry, CrawlMetadata, CrawlProgress, CrawlResult,
        CrawlState, CrawlerError,
    },
    utils::normalize_url,
};

/// Everything one in-flight fetch reports back to the coordinator.
struct PageOutcome {
    url: String,
    components: Vec<Component>,
    links: Vec<String>,
    extraction_errors: Vec<CrawlErrorEntry>,
    version: Option<String>,
    failed: Option<CrawlErrorEntry>,
}

/// Orchestrates frontier, rate limiter, fetcher, extractor pipeline and
/// checkpoint store. The coordinator loop inside `run` is the single
/// writer of all shared crawl state; workers only fetch and extract.
///
/// State machine: crawling -> paused (resumable) -> crawling -> completed
/// or error; completed and error are terminal.
pub struct CrawlEngine {
    config: CrawlerConfig,
    browser: Arc<dyn Browser>,
    frontier: UrlFrontier,
    components: HashMap<String, Component>,
    errors: Vec<CrawlErrorEntry>,
    pages_processed: usize,
    version: Option<String>,
    pipeline: ExtractorPipeline,
    checkpoints: CheckpointStore,
    progress: Arc<RwLock<CrawlProgress>>,
    pause_flag: Arc<AtomicBool>,
}

impl CrawlEngine {
    pub fn new(config: CrawlerConfig, browser: Arc<dyn Browser>) -> Result<Self, CrawlerError> {
        config.validate()?;
        let frontier = UrlFrontier::new(&config.base_url, &config.url_patterns)?;
        let pipeline = ExtractorPipeline::new(config.selectors.clone());
        let checkpoints = CheckpointStore::new(config.checkpoint_path());
        Ok(CrawlEngine {
            frontier,
            pipeline,
            checkpoints,
            browser,
            components: HashMap::new(),
            errors: vec![],
            pages_processed: 0,
            version: None,
            progress: Arc::new(RwLock::new(CrawlProgress::default())),
            pause_flag: Arc::new(AtomicBool::new(false)),
            config,
        })
    }

    /// Registers a named custom extractor; it runs after the generic
    /// selector extraction, in registration order.
    pub fn register_extractor(&mut self, extractor: Arc<dyn Extractor>) {
        self.pipeline.register(extractor);
    }

    /// Live status handle; safe to read from other tasks while the crawl
    /// runs. Only the coordinator writes to it.
    pub fn progress_handle(&self) -> Arc<RwLock<CrawlProgress>> {
        self.progress.clone()
    }

    pub fn progress(&self) -> CrawlProgress {
        self.progress.read().expect("progress lock poisoned").clone()
    }

    /// Cooperative pause signal: the engine stops dequeuing new URLs,
    /// drains in-flight fetches, checkpoints and returns with state
    /// `paused`. Shareable with a signal handler.
    pub fn pause_handle(&self) -> Arc<AtomicBool> {
        self.pause_flag.clone()
    }

    pub fn pause(&self) {
        self.pause_flag.store(true, Ordering::Relaxed);
    }

    /// Runs the crawl to a terminal or paused state. Fatal setup failures
    /// (auth, session) propagate as errors and produce no result; per-URL
    /// failures are logged into the result and never abort the crawl.
    pub async fn run(&mut self) -> anyhow::Result<CrawlResult> {
        let started_at = Utc::now();
        // a paused run leaves the flag set; every run starts live so the
        // same engine instance can resume in place
        self.pause_flag.store(false, Ordering::Relaxed);

        if self.config.resume_from_checkpoint {
            self.restore_from_checkpoint();
        }

        if let Some(auth) = &self.config.authentication {
            if let Err(e) =
                establish_session(self.browser.as_ref(), auth, self.config.timeout()).await
            {
                self.set_state(CrawlState::Error);
                return Err(CrawlerError::Initialization(format!("{:#}", e)).into());
            }
        }

        // the base URL takes the same normalization as discovered links so
        // a link back to it dedupes instead of refetching
        let base = normalize_url(&self.config.base_url, &self.config.base_url)
            .unwrap_or_else(|| self.config.base_url.clone());
        self.frontier.enqueue(&base);
        self.set_state(CrawlState::Crawling);

        info!(
            "starting crawl of {} with {} concurrent fetches at {} req/s",
            self.config.base_url, self.config.max_concurrent, self.config.requests_per_second
        );

        let max_concurrent = self.config.max_concurrent.max(1);
        let (visit_tx, visit_rx) = mpsc::channel::<String>(max_concurrent);
        let (outcome_tx, mut outcome_rx) = mpsc::channel::<PageOutcome>(max_concurrent + 10);

        let workers = self.spawn_workers(visit_rx, outcome_tx);

        let mut in_flight = 0usize;
        loop {
            let paused = self.pause_flag.load(Ordering::Relaxed);
            while !paused && in_flight < max_concurrent && self.under_page_cap(in_flight) {
                let url = match self.frontier.next() {
                    Some(url) => url,
                    None => break,
                };
                debug!("dispatching {}", url);
                if let Err(e) = visit_tx.send(url).await {
                    error!("could not dispatch url to workers: {}", e);
                    break;
                }
                in_flight += 1;
            }

            if in_flight == 0 {
                break;
            }

            // workers hold the other end, so recv only fails after they
            // all exited, which cannot happen while work is in flight
            match outcome_rx.recv().await {
                Some(outcome) => {
                    in_flight -= 1;
                    self.process_outcome(outcome);
                }
                None => break,
            }
        }

        drop(visit_tx);
        if let Err(e) = workers.await {
            error!("worker pool did not shut down cleanly: {}", e);
        }

        let paused = self.pause_flag.load(Ordering::Relaxed);
        let state = if paused {
            CrawlState::Paused
        } else {
            CrawlState::Completed
        };
        self.set_state(state);
        self.write_checkpoint();

        let success = state == CrawlState::Completed;
        if success {
            info!(
                "crawl of {} completed: {} pages, {} components, {} errors",
                self.config.base_url,
                self.pages_processed,
                self.components.len(),
                self.errors.len()
            );
        } else {
            info!(
                "crawl of {} paused after {} pages, checkpoint saved to {:?}",
                self.config.base_url,
                self.pages_processed,
                self.checkpoints.path()
            );
        }

        let mut components: Vec<Component> = self.components.values().cloned().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(CrawlResult {
            success,
            metadata: CrawlMetadata {
                source: self.config.base_url.clone(),
                started_at,
                finished_at: Utc::now(),
                total_components: components.len(),
                total_pages: self.pages_processed,
                errors: self.errors.clone(),
                version: self.version.clone(),
            },
            components,
        })
    }

    fn spawn_workers(
        &self,
        visit_rx: mpsc::Receiver<String>,
        outcome_tx: mpsc::Sender<PageOutcome>,
    ) -> task::JoinHandle<()> {
        let fetcher = Arc::new(PageFetcher::new(self.browser.clone(), &self.config));
        let limiter = Arc::new(RateLimiter::new(
            self.config.requests_per_second,
            self.config.max_concurrent,
        ));
        let pipeline = Arc::new(self.pipeline.clone());
        let selectors = Arc::new(self.config.selectors.clone());
        let concurrency = self.config.max_concurrent.max(1);

        tokio::spawn(async move {
            tokio_stream::wrappers::ReceiverStream::new(visit_rx)
                .for_each_concurrent(concurrency, |url| {
                    let fetcher = fetcher.clone();
                    let limiter = limiter.clone();
                    let pipeline = pipeline.clone();
                    let selectors = selectors.clone();
                    let outcome_tx = outcome_tx.clone();

                    async move {
                        let permit = limiter.acquire().await;
                        let outcome =
                            Self::process_url(&url, &fetcher, &pipeline, &selectors).await;
                        drop(permit);
                        if let Err(e) = outcome_tx.send(outcome).await {
                            error!("could not report outcome for {}: {}", url, e);
                        }
                    }
                })
                .await;
        })
    }

    /// Fetch + extract for one URL. The page resource is scoped here:
    /// acquired, used, and unconditionally closed on success and failure
    /// alike, before the rate-limiter slot frees in the caller.
    async fn process_url(
        url: &str,
        fetcher: &PageFetcher,
        pipeline: &ExtractorPipeline,
        selectors: &SelectorConfig,
    ) -> PageOutcome {
        match fetcher.navigate(url).await {
            Ok(page) => {
                let output = pipeline.run(page.as_ref(), url).await;
                let links = collect_links(page.as_ref(), selectors, url).await;
                let version = detect_version(page.as_ref(), selectors).await;
                page.close().await;
                PageOutcome {
                    url: url.into(),
                    components: output.components,
                    links,
                    extraction_errors: output.errors,
                    version,
                    failed: None,
                }
            }
            Err(e) => {
                error!("{}", e);
                PageOutcome {
                    url: url.into(),
                    components: vec![],
                    links: vec![],
                    extraction_errors: vec![],
                    version: None,
                    failed: Some(CrawlErrorEntry::new(url, e.to_string())),
                }
            }
        }
    }

    /// Single-writer merge of one outcome into engine state, followed by
    /// a checkpoint write. Checkpoints are serialized by construction:
    /// only this loop writes them.
    fn process_outcome(&mut self, outcome: PageOutcome) {
        self.pages_processed += 1;

        if let Some(entry) = outcome.failed {
            self.errors.push(entry);
        } else {
            for component in outcome.components {
                self.merge_component(component);
            }
            self.errors.extend(outcome.extraction_errors);
            for link in outcome.links {
                self.frontier.enqueue(&link);
            }
            if self.version.is_none() {
                self.version = outcome.version;
            }
        }

        self.publish_progress(Some(outcome.url));
        self.write_checkpoint();
    }

    /// Records are keyed by content id; re-extracting an existing id only
    /// refreshes its metadata (last write wins), the content fields keep
    /// the first extraction.
    fn merge_component(&mut self, component: Component) {
        match self.components.get_mut(&component.id) {
            Some(existing) => existing.metadata = component.metadata,
            None => {
                debug!("new component {} ({})", component.name, component.id);
                self.components.insert(component.id.clone(), component);
            }
        }
    }

    fn under_page_cap(&self, in_flight: usize) -> bool {
        match self.config.max_pages {
            Some(cap) => self.pages_processed + in_flight < cap,
            None => true,
        }
    }

    fn restore_from_checkpoint(&mut self) {
        let state = match self.checkpoints.load() {
            Some(state) => state,
            None => return,
        };
        info!(
            "resuming from checkpoint: {} visited, {} queued, {} components",
            state.visited.len(),
            state.queued.len(),
            state.components.len()
        );
        self.frontier.restore(state.visited, state.queued);
        self.components = state.components;
        self.errors = state.errors;
        self.pages_processed = state.progress.current_page;
    }

    fn write_checkpoint(&self) {
        let (visited, queued) = self.frontier.snapshot();
        let state = CheckpointState {
            visited,
            queued,
            components: self.components.clone(),
            errors: self.errors.clone(),
            progress: self.progress(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.checkpoints.save(&state) {
            // a failed save must not abort the current URL's processing
            warn!("{}", e);
        }
    }

    fn publish_progress(&self, current_url: Option<String>) {
        let mut progress = self.progress.write().expect("progress lock poisoned");
        progress.current_page = self.pages_processed;
        progress.total_pages = self.pages_processed + self.frontier.pending();
        progress.components_found = self.components.len();
        progress.errors_count = self.errors.len();
        if current_url.is_some() {
            progress.current_url = current_url;
        }
    }

    fn set_state(&self, state: CrawlState) {
        self.publish_progress(None);
        self.progress.write().expect("progress lock poisoned").state = state;
    }
}

async fn collect_links(page: &dyn Page, selectors: &SelectorConfig, page_url: &str) -> Vec<String> {
    let mut links = vec![];
    if let Ok(anchors) = page.query_all(selectors.link_selector()).await {
        for anchor in anchors {
            if let Ok(Some(href)) = anchor.attr("href").await {
                if let Some(url) = normalize_url(page_url, &href) {
                    links.push(url);
                }
            }
        }
    }
    // pagination "next" links may live outside the generic link selector
    if let Some(next) = &selectors.next_page {
        if let Ok(Some(el)) = page.query(next).await {
            if let Ok(Some(href)) = el.attr("href").await {
                if let Some(url) = normalize_url(page_url, &href) {
                    links.push(url);
                }
            }
        }
    }
    links
}

async fn detect_version(page: &dyn Page, selectors: &SelectorConfig) -> Option<String> {
    let selector = selectors.version.as_deref()?;
    match page.query(selector).await {
        Ok(Some(el)) => el.text().await.ok().flatten(),
        _ => None,
    }
}
