//! The in-memory site model: one `Page` per canonical URL, plus the reference
//! edges between them. This is the single structure a crawl accumulates into
//! and the one thing `run()` hands back.

use serde_derive::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::time::SystemTime;

use crate::canonical::CanonicalUrl;

/// Why a URL was left unfetched. None of these count as link errors.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SkipReason {
    Ignored,
    OutsideScope,
    DepthExceeded,
    UnsupportedScheme,
    RedirectedOutOfScope,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let text = match self {
            SkipReason::Ignored => "ignored prefix",
            SkipReason::OutsideScope => "outside scope",
            SkipReason::DepthExceeded => "depth exceeded",
            SkipReason::UnsupportedScheme => "unsupported scheme",
            SkipReason::RedirectedOutOfScope => "redirected out of scope",
        };
        f.write_str(text)
    }
}

/// What kind of reference led to a URL.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RefKind {
    Anchor,
    Image,
    Stylesheet,
    Script,
    Redirect,
}

impl RefKind {
    /// The HTML tag this kind is extracted from, if any.
    pub fn tag(&self) -> Option<&'static str> {
        match self {
            RefKind::Anchor => Some("a"),
            RefKind::Image => Some("img"),
            RefKind::Stylesheet => Some("link"),
            RefKind::Script => Some("script"),
            RefKind::Redirect => None,
        }
    }

    /// The attribute carrying the reference for this tag.
    pub fn attr(&self) -> Option<&'static str> {
        match self {
            RefKind::Anchor | RefKind::Stylesheet => Some("href"),
            RefKind::Image | RefKind::Script => Some("src"),
            RefKind::Redirect => None,
        }
    }

    pub fn from_tag(tag: &str) -> Option<RefKind> {
        match tag {
            "a" => Some(RefKind::Anchor),
            "img" => Some(RefKind::Image),
            "link" => Some(RefKind::Stylesheet),
            "script" => Some(RefKind::Script),
            _ => None,
        }
    }

    /// Resources of this kind are never HTML; a HEAD request settles them.
    pub fn is_resource(&self) -> bool {
        matches!(self, RefKind::Image | RefKind::Stylesheet | RefKind::Script)
    }
}

impl FromStr for RefKind {
    type Err = String;

    fn from_str(s: &str) -> Result<RefKind, String> {
        RefKind::from_tag(s).ok_or_else(|| format!("unknown tag `{}` (expected a, img, link or script)", s))
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.tag().unwrap_or("redirect"))
    }
}

/// Terminal and transient fetch states of a page.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FetchStatus {
    Pending,
    InFlight,
    Ok(u16),
    Redirected { target: CanonicalUrl, code: u16 },
    HttpError(u16),
    Timeout,
    ConnectionError(String),
    InvalidUrl(String),
    Skipped(SkipReason),
}

impl FetchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, FetchStatus::Pending | FetchStatus::InFlight)
    }

    /// Whether this status makes the page count as broken.
    pub fn is_erroneous(&self) -> bool {
        matches!(
            self,
            FetchStatus::HttpError(_)
                | FetchStatus::Timeout
                | FetchStatus::ConnectionError(_)
                | FetchStatus::InvalidUrl(_)
        )
    }
}

impl fmt::Display for FetchStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FetchStatus::Pending => write!(f, "pending"),
            FetchStatus::InFlight => write!(f, "in flight"),
            FetchStatus::Ok(code) => write!(f, "ok ({})", code),
            FetchStatus::Redirected { target, code } => {
                write!(f, "redirected ({}) to {}", code, target)
            }
            FetchStatus::HttpError(code) => write!(f, "http error ({})", code),
            FetchStatus::Timeout => write!(f, "timed out"),
            FetchStatus::ConnectionError(detail) => write!(f, "connection error: {}", detail),
            FetchStatus::InvalidUrl(detail) => write!(f, "invalid url: {}", detail),
            FetchStatus::Skipped(reason) => write!(f, "skipped: {}", reason),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseMeta {
    pub http_status: u16,
    /// Where the content actually came from; differs from the page URL only
    /// for redirected pages.
    pub final_url: CanonicalUrl,
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub elapsed_ms: u64,
}

/// One edge of the site graph. Immutable once created.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PageRef {
    pub url: CanonicalUrl,
    pub source: CanonicalUrl,
    pub kind: RefKind,
    pub raw: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub depth: u16,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Page {
    pub url: CanonicalUrl,
    /// Minimum depth at which the URL was discovered.
    pub depth: u16,
    pub status: FetchStatus,
    pub response: Option<ResponseMeta>,
    pub outgoing: Vec<PageRef>,
    pub incoming: Vec<PageRef>,
    pub is_html: bool,
    pub parse_diagnostic: Option<String>,
}

impl Page {
    fn new(url: CanonicalUrl, depth: u16) -> Page {
        Page {
            url,
            depth,
            status: FetchStatus::Pending,
            response: None,
            outgoing: vec![],
            incoming: vec![],
            is_html: false,
            parse_diagnostic: None,
        }
    }

    pub fn is_erroneous(&self) -> bool {
        self.status.is_erroneous()
    }
}

/// Aggregate counts for reporters and formatters.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct ModelStats {
    pub pages: usize,
    pub fetched: usize,
    pub erroneous: usize,
    pub skipped: usize,
}

#[derive(Debug, Default)]
pub struct SiteModel {
    pages: HashMap<CanonicalUrl, Page>,
    start_urls: Vec<CanonicalUrl>,
    start_time: Option<SystemTime>,
    end_time: Option<SystemTime>,
}

impl SiteModel {
    pub fn new() -> SiteModel {
        SiteModel::default()
    }

    pub fn mark_started(&mut self) {
        self.start_time = Some(SystemTime::now());
    }

    pub fn mark_finished(&mut self) {
        self.end_time = Some(SystemTime::now());
    }

    pub fn start_time(&self) -> Option<SystemTime> {
        self.start_time
    }

    pub fn end_time(&self) -> Option<SystemTime> {
        self.end_time
    }

    pub fn push_start_url(&mut self, url: CanonicalUrl) {
        if !self.start_urls.contains(&url) {
            self.start_urls.push(url);
        }
    }

    pub fn start_urls(&self) -> &[CanonicalUrl] {
        &self.start_urls
    }

    /// Looks a page up, creating it as `Pending` when absent. On an existing
    /// page the discovery depth is lowered to the minimum and `origin`, when
    /// given, joins its incoming references.
    pub fn get_or_create(
        &mut self,
        url: &CanonicalUrl,
        depth: u16,
        origin: Option<PageRef>,
    ) -> (&mut Page, bool) {
        let was_new = !self.pages.contains_key(url);
        let page = self
            .pages
            .entry(url.clone())
            .or_insert_with(|| Page::new(url.clone(), depth));

        page.depth = page.depth.min(depth);
        if let Some(origin) = origin {
            page.incoming.push(origin);
        }

        (page, was_new)
    }

    /// Transitions a page's status. Legal transitions are
    /// `Pending → InFlight → terminal` and `Pending → terminal` (admission
    /// skips and insertion-time invalids). Anything else is logged and
    /// dropped.
    pub fn set_status(
        &mut self,
        url: &CanonicalUrl,
        status: FetchStatus,
        response: Option<ResponseMeta>,
    ) {
        let page = match self.pages.get_mut(url) {
            Some(page) => page,
            None => {
                log::warn!("status {} for unknown page {}", status, url);
                return;
            }
        };

        let legal = match (&page.status, &status) {
            (FetchStatus::Pending, FetchStatus::InFlight) => true,
            (FetchStatus::Pending, terminal) | (FetchStatus::InFlight, terminal) => {
                terminal.is_terminal()
            }
            _ => false,
        };

        if !legal {
            log::warn!(
                "illegal status transition for {}: {} -> {}",
                url,
                page.status,
                status
            );
            return;
        }

        page.status = status;
        if response.is_some() {
            page.response = response;
        }
    }

    /// Puts a terminally-skipped page back into play. Used when a URL first
    /// seen past the depth cap is rediscovered within it.
    pub(crate) fn reopen(&mut self, url: &CanonicalUrl) {
        if let Some(page) = self.pages.get_mut(url) {
            if matches!(page.status, FetchStatus::Skipped(SkipReason::DepthExceeded)) {
                page.status = FetchStatus::Pending;
            }
        }
    }

    /// Sets the outgoing references of a page, once, in document order.
    pub fn record_refs(&mut self, url: &CanonicalUrl, refs: Vec<PageRef>) {
        let page = match self.pages.get_mut(url) {
            Some(page) => page,
            None => {
                log::warn!("refs for unknown page {}", url);
                return;
            }
        };

        if !page.outgoing.is_empty() {
            log::warn!("outgoing refs for {} recorded twice", url);
            return;
        }

        page.outgoing = refs;
    }

    pub(crate) fn page_mut(&mut self, url: &CanonicalUrl) -> Option<&mut Page> {
        self.pages.get_mut(url)
    }

    pub fn page(&self, url: &CanonicalUrl) -> Option<&Page> {
        self.pages.get(url)
    }

    pub fn pages(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn erroneous_count(&self) -> usize {
        self.pages.values().filter(|page| page.is_erroneous()).count()
    }

    /// Immutable aggregate view; what reporters poll.
    pub fn stats(&self) -> ModelStats {
        let mut stats = ModelStats {
            pages: self.pages.len(),
            ..ModelStats::default()
        };

        for page in self.pages.values() {
            match &page.status {
                FetchStatus::Ok(_) | FetchStatus::Redirected { .. } => stats.fetched += 1,
                FetchStatus::Skipped(_) => stats.skipped += 1,
                status if status.is_erroneous() => stats.erroneous += 1,
                _ => {}
            }
        }

        stats
    }
}
