//! linkwalker: a site-crawling link validator.
//!
//! Seed it with one or more URLs and it walks the site with bounded
//! parallelism, records the HTTP outcome of every reference it meets, and
//! hands back an in-memory [`SiteModel`] you can mine for broken links.
//!
//! ```no_run
//! let model = lib_linkwalker::crawl("http://example.com/")?;
//! for page in model.pages().filter(|page| page.is_erroneous()) {
//!     eprintln!("{}: {}", page.url, page.status);
//! }
//! # Ok::<(), lib_linkwalker::Error>(())
//! ```

pub mod canonical;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod logger;
pub mod model;
mod panic;

pub use canonical::{canonicalize, CanonicalUrl, Resolution, UrlPolicy};
pub use cli::Cli;
pub use config::{BasicAuth, CrawlConfig, Mode, ParserKind};
pub use crawler::{
    run_ipc_worker, Admission, Capabilities, CrawlMaster, DownloadError, Downloaded, Downloader,
    FetchMode, Parsed, Parser, RawRef,
};
pub use error::Error;
pub use logger::init_logger;
pub use model::{
    FetchStatus, ModelStats, Page, PageRef, RefKind, ResponseMeta, SiteModel, SkipReason,
};
pub use structopt::StructOpt;

pub fn default_user_agent() -> &'static str {
    concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
}

/// Crawls a single start URL with the default configuration.
pub fn crawl(start_url: &str) -> Result<SiteModel, Error> {
    crawl_with_options([start_url], std::iter::empty())
}

/// Crawls with options mirroring the long CLI flags; hyphens and underscores
/// in keys are interchangeable.
///
/// ```no_run
/// let model = lib_linkwalker::crawl_with_options(
///     ["http://example.com/"],
///     [("depth", "2"), ("workers", "4"), ("test_outside", "true")],
/// )?;
/// # Ok::<(), lib_linkwalker::Error>(())
/// ```
pub fn crawl_with_options<'a, U, O>(start_urls: U, options: O) -> Result<SiteModel, Error>
where
    U: IntoIterator,
    U::Item: Into<String>,
    O: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut config = CrawlConfig::new(start_urls);
    for (key, value) in options {
        config.apply_option(key, value)?;
    }

    CrawlMaster::new(config).run()
}
