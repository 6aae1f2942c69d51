//! The crawl engine façade.

pub mod backend;
mod boundaries;
mod counter;
mod downloader;
mod master;
mod parser;
mod reporter;
mod state;
mod worker;

pub use self::backend::process::run_ipc_worker;
pub use self::boundaries::{Admission, Boundaries};
pub use self::counter::Counter;
pub use self::downloader::{DownloadError, Downloaded, Downloader, FetchMode, HyperDownloader};
pub use self::master::{Capabilities, CrawlMaster, DefaultCapabilities, WorkerContext};
pub use self::parser::{
    is_html_content_type, parser_for, Parsed, Parser, QuickParser, RawRef, ScraperParser,
};
pub use self::state::{CrawlState, ItemReport, WorkItem};
pub use self::worker::{CrawlWorker, FetchOutcome, ResolvedRef};

use url::Url;

use crate::config::CrawlConfig;
use crate::error::Error;

/// Start URLs must stand on their own; anything unfetchable here is a fatal
/// configuration error, not a broken page.
pub fn resolve_start_urls(config: &CrawlConfig) -> Result<Vec<Url>, Error> {
    config
        .start_urls
        .iter()
        .map(|raw| {
            let url: Url = raw.trim().parse().map_err(|err: url::ParseError| {
                Error::BadStartUrl {
                    raw: raw.clone(),
                    detail: err.to_string(),
                }
            })?;

            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(Error::BadStartUrl {
                    raw: raw.clone(),
                    detail: format!("unsupported scheme `{}`", url.scheme()),
                });
            }
            if url.host_str().is_none() {
                return Err(Error::BadStartUrl {
                    raw: raw.clone(),
                    detail: "no host".to_owned(),
                });
            }

            Ok(url)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_urls_must_be_absolute_http() {
        let ok = CrawlConfig::new(["http://h/", " https://h/padded "]);
        assert_eq!(resolve_start_urls(&ok).unwrap().len(), 2);

        for bad in ["/relative", "mailto:x@example.com", "http://"] {
            let config = CrawlConfig::new([bad]);
            assert!(matches!(
                resolve_start_urls(&config),
                Err(Error::BadStartUrl { .. })
            ));
        }
    }
}
