use std::net::SocketAddr;
use structopt::StructOpt;

use crate::config::{BasicAuth, CrawlConfig, Mode, ParserKind};
use crate::error::Error;
use crate::model::RefKind;

/// Crawls a site and reports broken links.
#[derive(Debug, StructOpt)]
pub struct Cli {
    /// Start URLs, seeded at depth 0.
    #[structopt(name = "URL", required_unless = "ipc-worker")]
    pub urls: Vec<String>,

    /// Fetch outside hosts once instead of skipping them.
    #[structopt(short = "O", long)]
    pub test_outside: bool,

    /// Extra hosts whose pages are crawled and followed.
    #[structopt(short = "H", long, use_delimiter = true)]
    pub accepted_hosts: Vec<String>,

    /// host/path prefixes that are never fetched.
    #[structopt(short = "i", long = "ignore", use_delimiter = true)]
    pub ignored_prefixes: Vec<String>,

    /// HTTP Basic username.
    #[structopt(long, env = "LINKWALKER_USERNAME")]
    pub username: Option<String>,

    /// HTTP Basic password.
    #[structopt(long, env = "LINKWALKER_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,

    /// Tags to extract: any of a, img, link, script.
    #[structopt(short = "t", long, use_delimiter = true)]
    pub types: Vec<RefKind>,

    /// Per-request timeout in seconds.
    #[structopt(short = "T", long, default_value = "10")]
    pub timeout: f64,

    /// Do not trim whitespace around href/src values.
    #[structopt(short = "C", long)]
    pub strict: bool,

    /// Fetch the start URLs only (same as --depth 0).
    #[structopt(short = "N", long)]
    pub run_once: bool,

    /// Maximum crawl depth (0 = start URLs only).
    #[structopt(long)]
    pub depth: Option<u16>,

    /// Worker count.
    #[structopt(short = "w", long, default_value = "1", env = "LINKWALKER_WORKERS")]
    pub workers: usize,

    /// Scheduling backend: thread, process or green.
    #[structopt(short = "m", long, default_value = "thread")]
    pub mode: Mode,

    /// HTML parser: scraper or quick.
    #[structopt(short = "R", long, default_value = "scraper")]
    pub parser: ParserKind,

    /// Silently skip malformed tel: links.
    #[structopt(long)]
    pub ignore_bad_tel_urls: bool,

    /// Disable TLS certificate verification.
    #[structopt(long)]
    pub allow_insecure_content: bool,

    /// User-Agent header override.
    #[structopt(long, env = "LINKWALKER_USER_AGENT")]
    pub user_agent: Option<String>,

    /// Log a progress line every few seconds.
    #[structopt(long)]
    pub progress: bool,

    /// Print the report as JSON.
    #[structopt(short = "j", long)]
    pub json: bool,

    #[structopt(short = "v", long)]
    pub verbose: bool,

    /// Internal: run as a fetch worker attached to the given coordinator.
    #[structopt(long, hidden = true)]
    pub ipc_worker: Option<SocketAddr>,
}

impl Cli {
    pub fn into_config(self) -> Result<CrawlConfig, Error> {
        let mut config = CrawlConfig::new(self.urls);

        config.test_outside = self.test_outside;
        config
            .accepted_hosts
            .extend(self.accepted_hosts.iter().map(|host| host.to_ascii_lowercase()));
        config.ignored_prefixes = self.ignored_prefixes;
        config.timeout = self.timeout;
        config.strict = self.strict;
        config.max_depth = if self.run_once { Some(0) } else { self.depth };
        config.workers = self.workers;
        config.mode = self.mode;
        config.parser = self.parser;
        config.ignore_bad_tel_urls = self.ignore_bad_tel_urls;
        config.allow_insecure_content = self.allow_insecure_content;
        config.user_agent = self.user_agent;
        config.progress = self.progress;

        if !self.types.is_empty() {
            config.types = self.types.into_iter().collect();
        }

        match (self.username, self.password) {
            (None, None) => {}
            (username, password) => {
                config.auth = Some(BasicAuth {
                    username: username.unwrap_or_default(),
                    password: password.unwrap_or_default(),
                });
            }
        }

        config.validate()?;
        Ok(config)
    }
}
