//! The shared heart of a crawl: the FIFO work queue, the page map doubling as
//! the dedup index, the busy count that decides termination, and the two
//! mutations every backend funnels through (`admit` and `apply`).
//!
//! Whatever the backend, mutations of this structure are serialized: behind a
//! mutex (threads), between yield points (cooperative tasks), or confined to
//! the coordinator process (processes).

use serde_derive::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use url::Url;

use crate::canonical::{canonicalize, CanonicalUrl, Resolution, UrlPolicy};
use crate::config::CrawlConfig;
use crate::model::{FetchStatus, PageRef, RefKind, ResponseMeta, SiteModel, SkipReason};

use super::boundaries::{Admission, Boundaries};
use super::counter::Counter;
use super::downloader::FetchMode;
use super::worker::{FetchOutcome, ResolvedRef};

/// One unit of work. Consumed exactly once; a canonical URL is enqueued at
/// most once per crawl.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    pub url: CanonicalUrl,
    pub depth: u16,
    pub mode: FetchMode,
    /// Redirect hops taken to reach this URL.
    pub hops: u8,
    pub origin: Option<PageRef>,
}

/// A finished item together with everything the worker found out about it.
#[derive(Debug, Serialize, Deserialize)]
pub struct ItemReport {
    pub item: WorkItem,
    pub outcome: FetchOutcome,
}

pub struct CrawlState {
    pub model: SiteModel,
    queue: VecDeque<WorkItem>,
    busy: usize,
    boundaries: Boundaries,
    config: Arc<CrawlConfig>,
    counter: Arc<Counter>,
    policy: UrlPolicy,
}

impl CrawlState {
    pub fn new(
        config: Arc<CrawlConfig>,
        boundaries: Boundaries,
        counter: Arc<Counter>,
    ) -> CrawlState {
        let policy = UrlPolicy {
            strict: config.strict,
            ignore_bad_tel: config.ignore_bad_tel_urls,
        };

        CrawlState {
            model: SiteModel::new(),
            queue: VecDeque::new(),
            busy: 0,
            boundaries,
            config,
            counter,
            policy,
        }
    }

    /// Admits the start URLs at depth 0, in order.
    pub fn seed(&mut self, start_urls: &[Url]) {
        for url in start_urls {
            let canonical = CanonicalUrl::from_http(url.clone());
            self.model.push_start_url(canonical.clone());
            self.admit(&canonical, 0, None, 0, None);
        }
    }

    /// Pops the next item and marks its page in flight.
    pub fn claim(&mut self) -> Option<WorkItem> {
        let item = self.queue.pop_front()?;
        self.busy += 1;
        self.counter.register_open();
        self.model.set_status(&item.url, FetchStatus::InFlight, None);
        Some(item)
    }

    /// Queue drained and nobody working: the crawl is over.
    pub fn is_done(&self) -> bool {
        self.queue.is_empty() && self.busy == 0
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn busy(&self) -> usize {
        self.busy
    }

    pub fn into_model(self) -> SiteModel {
        self.model
    }

    /// Admission: creates the page on first sight, enforces the depth cap and
    /// the host policy, and enqueues at most once. Runs inside the same
    /// critical section as the page-map lookup, so two workers racing on a
    /// newly-discovered URL enqueue it exactly once.
    fn admit(
        &mut self,
        url: &CanonicalUrl,
        depth: u16,
        origin: Option<PageRef>,
        hops: u8,
        inherited_mode: Option<FetchMode>,
    ) {
        let origin_kind = origin.as_ref().map(|page_ref| page_ref.kind);
        let origin_for_item = origin.clone();

        let (page, was_new) = self.model.get_or_create(url, depth, origin);

        let within_cap = self
            .config
            .max_depth
            .map(|cap| depth <= cap)
            .unwrap_or(true);

        if !was_new {
            // Out-of-order discovery can sink a URL below the depth cap after
            // it was first seen beyond it; give it its fetch back.
            let stranded =
                matches!(page.status, FetchStatus::Skipped(SkipReason::DepthExceeded));
            if !(stranded && within_cap) {
                return;
            }
            self.model.reopen(url);
        }

        if !within_cap {
            self.model
                .set_status(url, FetchStatus::Skipped(SkipReason::DepthExceeded), None);
            return;
        }

        let target = match url.as_url() {
            Some(target) => target,
            None => {
                log::warn!("opaque url {} cannot be admitted", url);
                return;
            }
        };

        match self.boundaries.classify(target) {
            Admission::Skip(reason) => {
                self.model
                    .set_status(url, FetchStatus::Skipped(reason), None);
            }
            admission => {
                let mode = match admission {
                    Admission::FetchOnly => FetchMode::Head,
                    _ => inherited_mode.unwrap_or_else(|| {
                        if origin_kind.map(|kind| kind.is_resource()).unwrap_or(false) {
                            FetchMode::Head
                        } else {
                            FetchMode::Get
                        }
                    }),
                };

                self.queue.push_back(WorkItem {
                    url: url.clone(),
                    depth,
                    mode,
                    hops,
                    origin: origin_for_item,
                });
            }
        }
    }

    /// Folds a finished item back into the model and admits whatever it
    /// discovered. The counterpart of `claim`.
    pub fn apply(&mut self, report: ItemReport) {
        let item = report.item;

        match report.outcome {
            FetchOutcome::Fetched {
                meta,
                is_html,
                refs,
                parse_diagnostic,
            } => {
                if let Some(length) = meta.content_length {
                    self.counter.add_to_download_count(length as usize);
                }

                self.model
                    .set_status(&item.url, FetchStatus::Ok(meta.http_status), Some(meta));
                if let Some(page) = self.model.page_mut(&item.url) {
                    page.is_html = is_html;
                    page.parse_diagnostic = parse_diagnostic;
                }

                self.admit_refs(&item, refs);
            }
            FetchOutcome::BadStatus { code, meta } => {
                self.model
                    .set_status(&item.url, FetchStatus::HttpError(code), Some(meta));
            }
            FetchOutcome::Redirect {
                code,
                location,
                meta,
            } => self.apply_redirect(&item, code, location, meta),
            FetchOutcome::TimedOut => {
                self.model.set_status(&item.url, FetchStatus::Timeout, None);
            }
            FetchOutcome::Failed { detail } => {
                self.model
                    .set_status(&item.url, FetchStatus::ConnectionError(detail), None);
            }
        }

        self.busy -= 1;
        self.counter.register_closed();
        if self
            .model
            .page(&item.url)
            .map(|page| page.is_erroneous())
            .unwrap_or(false)
        {
            self.counter.register_error();
        }
    }

    fn admit_refs(&mut self, item: &WorkItem, refs: Vec<ResolvedRef>) {
        let next_depth = item.depth.saturating_add(1);
        let mut outgoing = vec![];

        for resolved in refs {
            let target = match &resolved.resolution {
                Resolution::Crawl(url) | Resolution::UnsupportedScheme(url) => url.clone(),
                Resolution::Invalid { url, .. } => url.clone(),
                Resolution::Ignored => continue,
            };

            let page_ref = PageRef {
                url: target,
                source: item.url.clone(),
                kind: resolved.kind,
                raw: resolved.raw,
                line: resolved.line,
                column: resolved.column,
                depth: next_depth,
            };
            outgoing.push(page_ref.clone());

            match resolved.resolution {
                Resolution::Crawl(url) => {
                    self.admit(&url, next_depth, Some(page_ref), 0, None);
                }
                Resolution::UnsupportedScheme(url) => {
                    let (_, was_new) = self.model.get_or_create(&url, next_depth, Some(page_ref));
                    if was_new {
                        self.model.set_status(
                            &url,
                            FetchStatus::Skipped(SkipReason::UnsupportedScheme),
                            None,
                        );
                    }
                }
                Resolution::Invalid { url, detail } => {
                    let (_, was_new) = self.model.get_or_create(&url, next_depth, Some(page_ref));
                    if was_new {
                        self.model
                            .set_status(&url, FetchStatus::InvalidUrl(detail), None);
                    }
                }
                Resolution::Ignored => {}
            }
        }

        self.model.record_refs(&item.url, outgoing);
    }

    fn apply_redirect(&mut self, item: &WorkItem, code: u16, location: String, mut meta: ResponseMeta) {
        let base = match item.url.as_url() {
            Some(base) => base.clone(),
            None => {
                self.model.set_status(
                    &item.url,
                    FetchStatus::ConnectionError("redirect from opaque url".to_owned()),
                    None,
                );
                return;
            }
        };

        let target = match canonicalize(&location, &base, &self.policy) {
            Resolution::Crawl(target) => target,
            _ => {
                self.model.set_status(
                    &item.url,
                    FetchStatus::ConnectionError(format!(
                        "redirect to unresolvable location `{}`",
                        location
                    )),
                    None,
                );
                return;
            }
        };

        // The admission rules chase every hop; a redirect is not a way out of
        // the configured scope.
        let target_url = match target.as_url() {
            Some(url) => url,
            None => return,
        };
        if let Admission::Skip(_) = self.boundaries.classify(target_url) {
            self.model.set_status(
                &item.url,
                FetchStatus::Skipped(SkipReason::RedirectedOutOfScope),
                None,
            );
            return;
        }

        meta.final_url = target.clone();
        self.model.set_status(
            &item.url,
            FetchStatus::Redirected {
                target: target.clone(),
                code,
            },
            Some(meta),
        );

        let via = PageRef {
            url: target.clone(),
            source: item.url.clone(),
            kind: RefKind::Redirect,
            raw: location,
            line: None,
            column: None,
            depth: item.depth,
        };

        if item.hops >= self.config.max_redirects {
            let (_, was_new) = self.model.get_or_create(&target, item.depth, Some(via));
            if was_new {
                self.model.set_status(
                    &target,
                    FetchStatus::ConnectionError("redirect limit exceeded".to_owned()),
                    None,
                );
            }
        } else {
            // The target stands in for the same resource: same depth, one
            // more hop, same fetch mode.
            self.admit(
                &target,
                item.depth,
                Some(via),
                item.hops + 1,
                Some(item.mode),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RefKind;

    fn state(mut mutate: impl FnMut(&mut CrawlConfig)) -> (CrawlState, Vec<Url>) {
        let mut config = CrawlConfig::new(["http://h/"]);
        mutate(&mut config);
        let starts = vec![Url::parse("http://h/").unwrap()];
        let boundaries = Boundaries::new(&config, &starts);
        let state = CrawlState::new(Arc::new(config), boundaries, Arc::new(Counter::default()));
        (state, starts)
    }

    fn canonical(raw: &str) -> CanonicalUrl {
        CanonicalUrl::from_http(Url::parse(raw).unwrap())
    }

    fn anchor(resolution: Resolution, raw: &str) -> ResolvedRef {
        ResolvedRef {
            resolution,
            raw: raw.to_owned(),
            kind: RefKind::Anchor,
            line: None,
            column: None,
        }
    }

    fn ok_outcome(refs: Vec<ResolvedRef>) -> FetchOutcome {
        FetchOutcome::Fetched {
            meta: ResponseMeta {
                http_status: 200,
                final_url: canonical("http://h/"),
                content_type: Some("text/html".to_owned()),
                content_length: Some(0),
                elapsed_ms: 1,
            },
            is_html: true,
            refs,
            parse_diagnostic: None,
        }
    }

    #[test]
    fn admission_is_idempotent() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        assert_eq!(state.queued(), 1);

        // Seeding again changes nothing.
        state.seed(&starts);
        assert_eq!(state.queued(), 1);
        assert_eq!(state.model.len(), 1);
    }

    #[test]
    fn claim_apply_round_trip_terminates() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);

        let item = state.claim().unwrap();
        assert!(!state.is_done());
        assert!(matches!(
            state.model.page(&item.url).unwrap().status,
            FetchStatus::InFlight
        ));

        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![]),
        });
        assert!(state.is_done());
    }

    #[test]
    fn discovered_refs_are_admitted_once() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        let shared = canonical("http://h/shared");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![
                anchor(Resolution::Crawl(shared.clone()), "/shared"),
                anchor(Resolution::Crawl(shared.clone()), "/shared"),
            ]),
        });

        // Two references, one queue entry, two incoming edges.
        assert_eq!(state.queued(), 1);
        let page = state.model.page(&shared).unwrap();
        assert_eq!(page.incoming.len(), 2);
        let start = state.model.page(&canonical("http://h/")).unwrap();
        assert_eq!(start.outgoing.len(), 2);
    }

    #[test]
    fn depth_cap_parks_pages_unfetched() {
        let (mut state, starts) = state(|config| config.max_depth = Some(0));
        state.seed(&starts);
        let item = state.claim().unwrap();

        let deep = canonical("http://h/deep");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![anchor(Resolution::Crawl(deep.clone()), "/deep")]),
        });

        assert_eq!(state.queued(), 0);
        assert!(state.is_done());
        let page = state.model.page(&deep).unwrap();
        assert_eq!(page.depth, 1);
        assert!(matches!(
            page.status,
            FetchStatus::Skipped(SkipReason::DepthExceeded)
        ));
    }

    #[test]
    fn outside_refs_are_skipped_without_test_outside() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        let outside = canonical("http://other/x");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![anchor(Resolution::Crawl(outside.clone()), "http://other/x")]),
        });

        assert_eq!(state.queued(), 0);
        assert!(matches!(
            state.model.page(&outside).unwrap().status,
            FetchStatus::Skipped(SkipReason::OutsideScope)
        ));
    }

    #[test]
    fn outside_refs_are_head_probed_with_test_outside() {
        let (mut state, starts) = state(|config| config.test_outside = true);
        state.seed(&starts);
        let item = state.claim().unwrap();

        let outside = canonical("http://other/x");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![anchor(Resolution::Crawl(outside.clone()), "http://other/x")]),
        });

        let queued = state.claim().unwrap();
        assert_eq!(queued.url, outside);
        assert_eq!(queued.mode, FetchMode::Head);
    }

    #[test]
    fn resource_refs_are_head_probed() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        let image = canonical("http://h/logo.png");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![ResolvedRef {
                resolution: Resolution::Crawl(image.clone()),
                raw: "/logo.png".to_owned(),
                kind: RefKind::Image,
                line: None,
                column: None,
            }]),
        });

        let queued = state.claim().unwrap();
        assert_eq!(queued.url, image);
        assert_eq!(queued.mode, FetchMode::Head);
    }

    #[test]
    fn unsupported_and_invalid_refs_become_pages_not_work() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        let mailto = CanonicalUrl::opaque("mailto:x@example.com");
        let broken = CanonicalUrl::opaque("http://[half-open");
        state.apply(ItemReport {
            item,
            outcome: ok_outcome(vec![
                anchor(Resolution::UnsupportedScheme(mailto.clone()), "mailto:x@example.com"),
                anchor(
                    Resolution::Invalid {
                        url: broken.clone(),
                        detail: "invalid ipv6 address".to_owned(),
                    },
                    "http://[half-open",
                ),
                anchor(Resolution::Ignored, "tel:nope"),
            ]),
        });

        assert_eq!(state.queued(), 0);
        assert!(matches!(
            state.model.page(&mailto).unwrap().status,
            FetchStatus::Skipped(SkipReason::UnsupportedScheme)
        ));
        assert!(matches!(
            state.model.page(&broken).unwrap().status,
            FetchStatus::InvalidUrl(_)
        ));
        // The ignored reference left no trace, not even an edge.
        let start = state.model.page(&canonical("http://h/")).unwrap();
        assert_eq!(start.outgoing.len(), 2);
        assert_eq!(state.model.len(), 3);
    }

    #[test]
    fn redirect_out_of_scope_marks_the_origin() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        state.apply(ItemReport {
            item: item.clone(),
            outcome: FetchOutcome::Redirect {
                code: 302,
                location: "http://other/welcome".to_owned(),
                meta: ResponseMeta {
                    http_status: 302,
                    final_url: item.url.clone(),
                    content_type: None,
                    content_length: None,
                    elapsed_ms: 1,
                },
            },
        });

        assert!(matches!(
            state.model.page(&canonical("http://h/")).unwrap().status,
            FetchStatus::Skipped(SkipReason::RedirectedOutOfScope)
        ));
        // The target was never created.
        assert!(state.model.page(&canonical("http://other/welcome")).is_none());
        assert!(state.is_done());
    }

    #[test]
    fn in_scope_redirect_admits_the_target_at_the_same_depth() {
        let (mut state, starts) = state(|_| {});
        state.seed(&starts);
        let item = state.claim().unwrap();

        state.apply(ItemReport {
            item: item.clone(),
            outcome: FetchOutcome::Redirect {
                code: 301,
                location: "/moved".to_owned(),
                meta: ResponseMeta {
                    http_status: 301,
                    final_url: item.url.clone(),
                    content_type: None,
                    content_length: None,
                    elapsed_ms: 1,
                },
            },
        });

        let origin = state.model.page(&canonical("http://h/")).unwrap();
        let target = canonical("http://h/moved");
        assert!(
            matches!(&origin.status, FetchStatus::Redirected { target: t, code: 301 } if *t == target)
        );

        let queued = state.claim().unwrap();
        assert_eq!(queued.url, target);
        assert_eq!(queued.depth, 0);
        assert_eq!(queued.hops, 1);
        assert_eq!(queued.origin.as_ref().map(|r| r.kind), Some(RefKind::Redirect));
    }

    #[test]
    fn redirect_chains_are_capped() {
        let (mut state, starts) = state(|config| config.max_redirects = 1);
        state.seed(&starts);
        let mut item = state.claim().unwrap();
        item.hops = 1;

        state.apply(ItemReport {
            item: item.clone(),
            outcome: FetchOutcome::Redirect {
                code: 302,
                location: "/next".to_owned(),
                meta: ResponseMeta {
                    http_status: 302,
                    final_url: item.url.clone(),
                    content_type: None,
                    content_length: None,
                    elapsed_ms: 1,
                },
            },
        });

        let next = state.model.page(&canonical("http://h/next")).unwrap();
        assert!(matches!(next.status, FetchStatus::ConnectionError(_)));
        assert_eq!(state.queued(), 0);
    }
}
