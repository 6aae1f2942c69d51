//! The crawl configuration: built once from the CLI or the programmatic
//! option map, then passed around immutably. In process mode the whole value
//! crosses the IPC boundary so worker processes can rebuild their own
//! downloader and parser from it.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::model::RefKind;

/// Which scheduling substrate runs the workers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    /// N OS threads sharing the queue and the model behind a mutex.
    Thread,
    /// N child processes pulling work over an IPC channel.
    Process,
    /// One thread multiplexing N cooperative tasks over non-blocking I/O.
    Green,
}

impl Default for Mode {
    fn default() -> Mode {
        Mode::Thread
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Mode, String> {
        match s {
            "thread" => Ok(Mode::Thread),
            "process" => Ok(Mode::Process),
            "green" => Ok(Mode::Green),
            _ => Err(format!("unknown mode `{}` (expected thread, process or green)", s)),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            Mode::Thread => "thread",
            Mode::Process => "process",
            Mode::Green => "green",
        };
        f.write_str(text)
    }
}

/// Which HTML extractor backs the crawl.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParserKind {
    /// Full html5ever-based parsing. No source positions.
    Scraper,
    /// Regex tag scanner. Cheaper, and it knows line/column.
    Quick,
}

impl Default for ParserKind {
    fn default() -> ParserKind {
        ParserKind::Scraper
    }
}

impl FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<ParserKind, String> {
        match s {
            "scraper" => Ok(ParserKind::Scraper),
            "quick" => Ok(ParserKind::Quick),
            _ => Err(format!("unknown parser `{}` (expected scraper or quick)", s)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// See `CrawlConfig::new` for defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CrawlConfig {
    /// Raw start URLs; resolved to canonical form at `run()` entry.
    pub start_urls: Vec<String>,
    /// Hosts beyond the start hosts whose pages are crawled and followed.
    pub accepted_hosts: BTreeSet<String>,
    /// `host/path` (or bare `/path`) prefixes that are never fetched.
    pub ignored_prefixes: Vec<String>,
    /// Fetch out-of-scope URLs once instead of skipping them.
    pub test_outside: bool,
    /// Which tags are extracted from HTML documents.
    pub types: BTreeSet<RefKind>,
    /// Per-request timeout, in seconds.
    pub timeout: f64,
    /// Pass attribute values through untrimmed.
    pub strict: bool,
    /// Maximum crawl depth; `None` means unbounded, `Some(0)` fetches the
    /// start URLs only.
    pub max_depth: Option<u16>,
    pub workers: usize,
    pub mode: Mode,
    pub parser: ParserKind,
    pub auth: Option<BasicAuth>,
    /// Silently drop malformed `tel:` references.
    pub ignore_bad_tel_urls: bool,
    /// Disable TLS certificate verification.
    pub allow_insecure_content: bool,
    pub user_agent: Option<String>,
    /// Log a periodic progress line.
    pub progress: bool,
    /// Response bodies are truncated past this many bytes.
    pub max_body_size: usize,
    /// A redirect chain longer than this records an error on the last hop.
    pub max_redirects: u8,
}

impl CrawlConfig {
    pub fn new<I, S>(start_urls: I) -> CrawlConfig
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CrawlConfig {
            start_urls: start_urls.into_iter().map(Into::into).collect(),
            accepted_hosts: BTreeSet::new(),
            ignored_prefixes: vec![],
            test_outside: false,
            types: [RefKind::Anchor, RefKind::Image, RefKind::Stylesheet, RefKind::Script]
                .into_iter()
                .collect(),
            timeout: 10.0,
            strict: false,
            max_depth: None,
            workers: 1,
            mode: Mode::default(),
            parser: ParserKind::default(),
            auth: None,
            ignore_bad_tel_urls: false,
            allow_insecure_content: false,
            user_agent: None,
            progress: false,
            max_body_size: 10 * 1024 * 1024,
            max_redirects: 20,
        }
    }

    pub fn user_agent(&self) -> &str {
        self.user_agent
            .as_deref()
            .unwrap_or_else(|| crate::default_user_agent())
    }

    /// Contradiction checks that must abort the run before anything is
    /// fetched.
    pub fn validate(&self) -> Result<(), Error> {
        if self.start_urls.is_empty() {
            return Err(Error::Config("no start URLs given".to_owned()));
        }
        if self.workers == 0 {
            return Err(Error::Config(format!(
                "mode={} with workers=0 cannot make progress",
                self.mode
            )));
        }
        if self.types.is_empty() {
            return Err(Error::Config("empty --types set: nothing to extract".to_owned()));
        }
        if !self.timeout.is_finite() || self.timeout <= 0.0 {
            return Err(Error::Config(format!("bad timeout: {}", self.timeout)));
        }
        if self.auth.is_some() && self.allow_insecure_content {
            log::warn!("sending credentials with TLS verification disabled");
        }
        Ok(())
    }

    /// Applies one option from the programmatic API. Keys mirror the long
    /// CLI flags; hyphens and underscores are interchangeable.
    pub fn apply_option(&mut self, key: &str, value: &str) -> Result<(), Error> {
        let normalized = key.replace('_', "-");

        let bad = |detail: &dyn fmt::Display| Error::Config(format!("option `{}`: {}", key, detail));

        match normalized.as_str() {
            "test-outside" => self.test_outside = parse_bool(value).map_err(|e| bad(&e))?,
            "accepted-hosts" => {
                self.accepted_hosts
                    .extend(split_list(value).map(|host| host.to_ascii_lowercase()));
            }
            "ignore" => self.ignored_prefixes.extend(split_list(value).map(str::to_owned)),
            "username" => {
                self.auth.get_or_insert_with(BasicAuth::default).username = value.to_owned()
            }
            "password" => {
                self.auth.get_or_insert_with(BasicAuth::default).password = value.to_owned()
            }
            "types" => {
                self.types = split_list(value)
                    .map(RefKind::from_str)
                    .collect::<Result<_, _>>()
                    .map_err(|e| bad(&e))?;
            }
            "timeout" => self.timeout = value.parse().map_err(|e| bad(&e))?,
            "strict" => self.strict = parse_bool(value).map_err(|e| bad(&e))?,
            "run-once" => {
                if parse_bool(value).map_err(|e| bad(&e))? {
                    self.max_depth = Some(0);
                }
            }
            "depth" => self.max_depth = Some(value.parse().map_err(|e| bad(&e))?),
            "workers" => self.workers = value.parse().map_err(|e| bad(&e))?,
            "mode" => self.mode = value.parse().map_err(|e| bad(&e))?,
            "parser" => self.parser = value.parse().map_err(|e| bad(&e))?,
            "ignore-bad-tel-urls" => {
                self.ignore_bad_tel_urls = parse_bool(value).map_err(|e| bad(&e))?
            }
            "allow-insecure-content" => {
                self.allow_insecure_content = parse_bool(value).map_err(|e| bad(&e))?
            }
            "user-agent" => self.user_agent = Some(value.to_owned()),
            "progress" => self.progress = parse_bool(value).map_err(|e| bad(&e))?,
            "max-body-size" => self.max_body_size = value.parse().map_err(|e| bad(&e))?,
            "max-redirects" => self.max_redirects = value.parse().map_err(|e| bad(&e))?,
            _ => return Err(Error::Config(format!("unknown option `{}`", key))),
        }

        Ok(())
    }
}

impl Default for BasicAuth {
    fn default() -> BasicAuth {
        BasicAuth {
            username: String::new(),
            password: String::new(),
        }
    }
}

fn split_list(value: &str) -> impl Iterator<Item = &str> {
    value.split(',').map(str::trim).filter(|part| !part.is_empty())
}

fn parse_bool(value: &str) -> Result<bool, String> {
    match value {
        "true" | "yes" | "1" | "" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(format!("not a boolean: `{}`", value)),
    }
}
