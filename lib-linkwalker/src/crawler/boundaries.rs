//! The admission policy: decided once per canonical URL, before it can enter
//! the work queue.

use serde_derive::{Deserialize, Serialize};
use std::collections::BTreeSet;
use url::Url;

use crate::config::CrawlConfig;
use crate::error::Error;
use crate::model::SkipReason;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Admission {
    /// Fetch, and on HTML parse and admit what it references.
    CrawlAndFollow,
    /// Verify reachability with a single request; never extract.
    FetchOnly,
    Skip(SkipReason),
}

#[derive(Debug)]
pub struct Boundaries {
    /// `host:port` keys of the start URLs and of accepted hosts given with an
    /// explicit port.
    exact_hosts: BTreeSet<String>,
    /// Accepted hosts given without a port; any port matches.
    bare_hosts: BTreeSet<String>,
    ignored_prefixes: Vec<String>,
    test_outside: bool,
}

fn host_key(url: &Url) -> Option<String> {
    let host = url.host_str()?;
    let port = url.port_or_known_default()?;
    Some(format!("{}:{}", host.to_ascii_lowercase(), port))
}

impl Boundaries {
    /// Builds the policy from the config and the resolved start URLs.
    pub fn new(config: &CrawlConfig, start_urls: &[Url]) -> Boundaries {
        let mut exact_hosts = BTreeSet::new();
        let mut bare_hosts = BTreeSet::new();

        for url in start_urls {
            if let Some(key) = host_key(url) {
                exact_hosts.insert(key);
            }
        }

        for host in &config.accepted_hosts {
            if host.contains(':') {
                exact_hosts.insert(host.clone());
            } else {
                bare_hosts.insert(host.clone());
            }
        }

        Boundaries {
            exact_hosts,
            bare_hosts,
            ignored_prefixes: config.ignored_prefixes.clone(),
            test_outside: config.test_outside,
        }
    }

    /// Convenience for the pieces that only have the config at hand (worker
    /// processes re-derive the policy on their side of the IPC channel).
    pub fn from_config(config: &CrawlConfig) -> Result<(Boundaries, Vec<Url>), Error> {
        let starts = crate::crawler::resolve_start_urls(config)?;
        let boundaries = Boundaries::new(config, &starts);
        Ok((boundaries, starts))
    }

    /// Bare host names considered in scope; Basic credentials are only ever
    /// sent to these.
    pub fn in_scope_hosts(&self) -> BTreeSet<String> {
        self.exact_hosts
            .iter()
            .filter_map(|key| key.rsplit_once(':').map(|(host, _)| host.to_owned()))
            .chain(self.bare_hosts.iter().cloned())
            .collect()
    }

    fn is_ignored(&self, url: &Url) -> bool {
        if self.ignored_prefixes.is_empty() {
            return false;
        }

        let host = url.host_str().unwrap_or("").to_ascii_lowercase();
        let host_and_path = format!("{}{}", host, url.path());

        self.ignored_prefixes.iter().any(|prefix| {
            if prefix.starts_with('/') {
                url.path().starts_with(prefix.as_str())
            } else {
                host_and_path.starts_with(prefix.as_str())
            }
        })
    }

    fn is_crawl_host(&self, url: &Url) -> bool {
        let bare = url
            .host_str()
            .map(|host| host.to_ascii_lowercase())
            .unwrap_or_default();

        host_key(url)
            .map(|key| self.exact_hosts.contains(&key))
            .unwrap_or(false)
            || self.bare_hosts.contains(&bare)
    }

    pub fn classify(&self, url: &Url) -> Admission {
        if self.is_ignored(url) {
            Admission::Skip(SkipReason::Ignored)
        } else if self.is_crawl_host(url) {
            Admission::CrawlAndFollow
        } else if self.test_outside {
            Admission::FetchOnly
        } else {
            Admission::Skip(SkipReason::OutsideScope)
        }
    }
}
