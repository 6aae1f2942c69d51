//! The coordinator: validates the configuration, seeds the queue, hands the
//! shared state to the configured backend and collects the finished model.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::config::{CrawlConfig, Mode};
use crate::error::Error;
use crate::model::SiteModel;

use super::backend;
use super::boundaries::Boundaries;
use super::counter::Counter;
use super::downloader::{Downloader, HyperDownloader};
use super::parser::{parser_for, Parser};
use super::reporter::Reporter;
use super::state::CrawlState;
use super::worker::CrawlWorker;

/// The two injectable collaborators of a crawl. Called once per worker, so
/// each worker owns its connection pool.
pub trait Capabilities: Send + Sync + 'static {
    fn downloader(&self, config: &CrawlConfig, auth_hosts: &BTreeSet<String>)
        -> Arc<dyn Downloader>;
    fn parser(&self, config: &CrawlConfig) -> Arc<dyn Parser>;
}

pub struct DefaultCapabilities;

impl Capabilities for DefaultCapabilities {
    fn downloader(
        &self,
        config: &CrawlConfig,
        auth_hosts: &BTreeSet<String>,
    ) -> Arc<dyn Downloader> {
        Arc::new(HyperDownloader::new(config, auth_hosts.clone()))
    }

    fn parser(&self, config: &CrawlConfig) -> Arc<dyn Parser> {
        parser_for(config.parser)
    }
}

/// Everything a backend needs to stand up one worker.
pub struct WorkerContext {
    pub config: Arc<CrawlConfig>,
    pub capabilities: Arc<dyn Capabilities>,
    pub counter: Arc<Counter>,
    pub auth_hosts: BTreeSet<String>,
}

impl WorkerContext {
    pub fn build_worker(&self) -> CrawlWorker {
        CrawlWorker::new(
            self.config.clone(),
            self.capabilities.downloader(&self.config, &self.auth_hosts),
            self.capabilities.parser(&self.config),
        )
    }
}

pub struct CrawlMaster {
    config: Arc<CrawlConfig>,
    capabilities: Arc<dyn Capabilities>,
}

impl CrawlMaster {
    pub fn new(config: CrawlConfig) -> CrawlMaster {
        CrawlMaster::with_capabilities(config, DefaultCapabilities)
    }

    pub fn with_capabilities<C: Capabilities>(config: CrawlConfig, capabilities: C) -> CrawlMaster {
        CrawlMaster {
            config: Arc::new(config),
            capabilities: Arc::new(capabilities),
        }
    }

    /// Runs the crawl to completion and returns the finalized model. The
    /// model is read-only from here on.
    pub fn run(self) -> Result<SiteModel, Error> {
        // Set panics to be logged:
        crate::panic::log_panics();

        self.config.validate()?;

        let start_urls = super::resolve_start_urls(&self.config)?;
        let boundaries = Boundaries::new(&self.config, &start_urls);
        let auth_hosts = boundaries.in_scope_hosts();
        let counter = Arc::new(Counter::default());

        let mut state = CrawlState::new(self.config.clone(), boundaries, counter.clone());
        state.model.mark_started();
        state.seed(&start_urls);

        log::info!(
            "seeding:\n    {}",
            start_urls
                .iter()
                .map(|seed| seed.as_str())
                .collect::<Vec<_>>()
                .join("\n    ")
        );

        let reporter = self
            .config
            .progress
            .then(|| Reporter::spawn(counter.clone()));

        let context = WorkerContext {
            config: self.config.clone(),
            capabilities: self.capabilities.clone(),
            counter: counter.clone(),
            auth_hosts,
        };

        let outcome = match self.config.mode {
            Mode::Thread => backend::threads::run(state, &context),
            Mode::Green => backend::tasks::run(state, &context),
            Mode::Process => backend::process::run(state, &context),
        };

        if let Some(reporter) = reporter {
            reporter.stop();
        }

        let mut state = outcome?;
        state.model.mark_finished();

        log::info!(
            "crawl done: {} pages, {} broken",
            state.model.len(),
            state.model.erroneous_count(),
        );

        Ok(state.into_model())
    }
}
