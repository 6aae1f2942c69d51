//! The per-item work, identical under every backend: fetch, decide whether
//! the body is parseable, extract and resolve references. Everything here is
//! I/O and pure computation; the shared state is touched only by
//! `CrawlState::apply` on the result.

use serde_derive::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{self, Duration};
use url::{ParseError, Url};

use crate::canonical::{canonicalize, Resolution, UrlPolicy};
use crate::config::CrawlConfig;
use crate::model::{RefKind, ResponseMeta};

use super::downloader::{Downloaded, Downloader, FetchMode};
use super::parser::{is_html_content_type, Parsed, Parser};
use super::state::WorkItem;

/// One extracted reference, already canonicalized against the effective base.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResolvedRef {
    pub resolution: Resolution,
    pub raw: String,
    pub kind: RefKind,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// What happened to one work item. Serializable: in process mode this is the
/// worker's result message.
#[derive(Debug, Serialize, Deserialize)]
pub enum FetchOutcome {
    /// 2xx. `refs` is empty for non-HTML bodies and HEAD probes.
    Fetched {
        meta: ResponseMeta,
        is_html: bool,
        refs: Vec<ResolvedRef>,
        parse_diagnostic: Option<String>,
    },
    /// Final status >= 400.
    BadStatus { code: u16, meta: ResponseMeta },
    /// One redirect hop, location not yet resolved.
    Redirect {
        code: u16,
        location: String,
        meta: ResponseMeta,
    },
    TimedOut,
    /// Transport-level failure.
    Failed { detail: String },
}

pub struct CrawlWorker {
    config: Arc<CrawlConfig>,
    downloader: Arc<dyn Downloader>,
    parser: Arc<dyn Parser>,
    policy: UrlPolicy,
}

impl CrawlWorker {
    pub fn new(
        config: Arc<CrawlConfig>,
        downloader: Arc<dyn Downloader>,
        parser: Arc<dyn Parser>,
    ) -> CrawlWorker {
        let policy = UrlPolicy {
            strict: config.strict,
            ignore_bad_tel: config.ignore_bad_tel_urls,
        };

        CrawlWorker {
            config,
            downloader,
            parser,
            policy,
        }
    }

    pub async fn process(&self, item: &WorkItem) -> FetchOutcome {
        let page_url = match item.url.as_url() {
            Some(url) => url,
            None => {
                return FetchOutcome::Failed {
                    detail: "not a fetchable url".to_owned(),
                }
            }
        };

        let started = Instant::now();
        let fetch = time::timeout(
            Duration::from_secs_f64(self.config.timeout),
            self.downloader.download(page_url, item.mode),
        );
        let fetched = fetch.await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let meta = |http_status: u16, content_type: Option<String>, content_length: Option<u64>| {
            ResponseMeta {
                http_status,
                final_url: item.url.clone(),
                content_type,
                content_length,
                elapsed_ms,
            }
        };

        match fetched {
            Ok(Ok(Downloaded::Body {
                code,
                content_type,
                content,
            })) => {
                let is_html = is_html_content_type(content_type.as_deref());

                let (refs, parse_diagnostic) = if is_html && item.mode == FetchMode::Get {
                    match self
                        .parser
                        .parse(&content, content_type.as_deref(), &self.config.types)
                    {
                        Parsed::Accepted { base_href, refs } => {
                            let base = effective_base(page_url, base_href);
                            let resolved = refs
                                .into_iter()
                                .map(|raw_ref| ResolvedRef {
                                    resolution: canonicalize(&raw_ref.raw, &base, &self.policy),
                                    raw: raw_ref.raw,
                                    kind: raw_ref.kind,
                                    line: raw_ref.line,
                                    column: raw_ref.column,
                                })
                                .collect();
                            (resolved, None)
                        }
                        Parsed::NotHtml => (vec![], None),
                        Parsed::Failed { diagnostic } => {
                            log::warn!("at {}: parse failed: {}", page_url, diagnostic);
                            (vec![], Some(diagnostic))
                        }
                    }
                } else {
                    (vec![], None)
                };

                FetchOutcome::Fetched {
                    meta: meta(code, content_type, Some(content.len() as u64)),
                    is_html,
                    refs,
                    parse_diagnostic,
                }
            }
            Ok(Ok(Downloaded::Empty {
                code,
                content_type,
                content_length,
            })) => {
                let is_html = is_html_content_type(content_type.as_deref());
                FetchOutcome::Fetched {
                    meta: meta(code, content_type, content_length),
                    is_html,
                    refs: vec![],
                    parse_diagnostic: None,
                }
            }
            Ok(Ok(Downloaded::BadStatus { code })) => FetchOutcome::BadStatus {
                code,
                meta: meta(code, None, None),
            },
            Ok(Ok(Downloaded::Redirect { code, location })) => FetchOutcome::Redirect {
                code,
                location,
                meta: meta(code, None, None),
            },
            Ok(Err(error)) => {
                log::debug!("at {} got: {}", page_url, error);
                FetchOutcome::Failed {
                    detail: error.to_string(),
                }
            }
            Err(_) => {
                log::debug!("at {}: got timeout", page_url);
                FetchOutcome::TimedOut
            }
        }
    }
}

/// The base for reference resolution: a `<base href>` when present (itself
/// resolved against the response URL), the response URL otherwise.
fn effective_base(page_url: &Url, base_href: Option<String>) -> Url {
    base_href
        .and_then(|raw| {
            let trimmed = raw.trim().to_owned();
            trimmed
                .parse()
                .or_else(|err| {
                    if err == ParseError::RelativeUrlWithoutBase {
                        page_url.join(&trimmed)
                    } else {
                        Err(err)
                    }
                })
                .ok()
        })
        .unwrap_or_else(|| page_url.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_href_overrides_the_response_url() {
        let page = Url::parse("http://h/dir/page.html").unwrap();

        let absolute = effective_base(&page, Some("http://cdn.example/assets/".to_owned()));
        assert_eq!(absolute.as_str(), "http://cdn.example/assets/");

        let relative = effective_base(&page, Some("/root/".to_owned()));
        assert_eq!(relative.as_str(), "http://h/root/");

        let missing = effective_base(&page, None);
        assert_eq!(missing, page);

        let garbage = effective_base(&page, Some("http://[oops".to_owned()));
        assert_eq!(garbage, page);
    }
}
