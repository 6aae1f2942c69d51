//! URL canonicalization: every reference found in a document is reduced to a
//! stable, comparable form before it touches the queue or the page map.

use serde_derive::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use url::{ParseError, Url};

/// The deduplication key of the whole crawl.
///
/// `Http` is a fetchable URL, already normalized: lower-cased IDNA host,
/// default port dropped, `.`/`..` resolved, empty path turned into `/`,
/// fragment stripped, query kept verbatim. `Opaque` keys the pages we record
/// but never fetch: unsupported schemes (`mailto:`, `javascript:`, …) and
/// syntactically broken references, keyed by their (trimmed) text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CanonicalUrl {
    Http(Url),
    Opaque(String),
}

impl CanonicalUrl {
    pub fn from_http(mut url: Url) -> CanonicalUrl {
        url.set_fragment(None);
        CanonicalUrl::Http(url)
    }

    pub fn opaque(text: impl Into<String>) -> CanonicalUrl {
        CanonicalUrl::Opaque(text.into())
    }

    pub fn as_url(&self) -> Option<&Url> {
        match self {
            CanonicalUrl::Http(url) => Some(url),
            CanonicalUrl::Opaque(_) => None,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            CanonicalUrl::Http(url) => url.as_str(),
            CanonicalUrl::Opaque(text) => text.as_str(),
        }
    }

    pub fn host_str(&self) -> Option<&str> {
        self.as_url().and_then(|url| url.host_str())
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialOrd for CanonicalUrl {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CanonicalUrl {
    fn cmp(&self, other: &Self) -> Ordering {
        fn rank(this: &CanonicalUrl) -> u8 {
            match this {
                CanonicalUrl::Http(_) => 0,
                CanonicalUrl::Opaque(_) => 1,
            }
        }

        self.as_str()
            .cmp(other.as_str())
            .then_with(|| rank(self).cmp(&rank(other)))
    }
}

/// What `canonicalize` made of a raw reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// An http/https URL; eligible for the work queue.
    Crawl(CanonicalUrl),
    /// Syntactically fine, but a scheme we do not fetch (`mailto:`,
    /// `javascript:`, `data:`, a well-formed `tel:`, …).
    UnsupportedScheme(CanonicalUrl),
    /// Broken reference; the page keyed by `url` gets an `InvalidUrl` status.
    Invalid { url: CanonicalUrl, detail: String },
    /// Dropped without a trace (malformed `tel:` under the ignore option).
    Ignored,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UrlPolicy {
    /// Leave attribute values untouched instead of trimming whitespace.
    pub strict: bool,
    /// Silently drop malformed `tel:` references.
    pub ignore_bad_tel: bool,
}

/// Resolves `raw` against `base` per RFC 3986 and normalizes the result.
pub fn canonicalize(raw: &str, base: &Url, policy: &UrlPolicy) -> Resolution {
    let text = if policy.strict { raw } else { raw.trim() };

    let parsed = text.parse().or_else(|err| {
        if err == ParseError::RelativeUrlWithoutBase {
            base.join(text)
        } else {
            Err(err)
        }
    });

    let url: Url = match parsed {
        Ok(url) => url,
        Err(err) => {
            return Resolution::Invalid {
                url: CanonicalUrl::opaque(text),
                detail: err.to_string(),
            }
        }
    };

    match url.scheme() {
        "http" | "https" => {
            if url.host_str().is_none() {
                Resolution::Invalid {
                    url: CanonicalUrl::opaque(text),
                    detail: "no host".to_owned(),
                }
            } else {
                Resolution::Crawl(CanonicalUrl::from_http(url))
            }
        }
        "tel" => match validate_tel(&url) {
            Ok(()) => Resolution::UnsupportedScheme(CanonicalUrl::opaque(url.as_str())),
            Err(_) if policy.ignore_bad_tel => Resolution::Ignored,
            Err(detail) => Resolution::Invalid {
                url: CanonicalUrl::opaque(text),
                detail,
            },
        },
        _ => Resolution::UnsupportedScheme(CanonicalUrl::opaque(url.as_str())),
    }
}

/// RFC 3966, the parts that matter for validation: a global number is `+`
/// followed by digits; a local number is dial digits and requires a
/// `phone-context` parameter. Visual separators are allowed in both.
fn validate_tel(url: &Url) -> Result<(), String> {
    let rest = url.path();
    let (number, params) = match rest.split_once(';') {
        Some((number, params)) => (number, params),
        None => (rest, ""),
    };

    let cleaned: String = number
        .chars()
        .filter(|c| !matches!(c, '-' | '.' | '(' | ')' | ' '))
        .collect();
    // The url parser percent-encodes blanks in cannot-be-a-base paths.
    let cleaned = cleaned.replace("%20", "");

    if cleaned.is_empty() {
        return Err("empty telephone number".to_owned());
    }

    if let Some(global) = cleaned.strip_prefix('+') {
        if !global.is_empty() && global.chars().all(|c| c.is_ascii_digit()) {
            Ok(())
        } else {
            Err(format!("bad global telephone number: {}", number))
        }
    } else if cleaned
        .chars()
        .all(|c| c.is_ascii_hexdigit() || matches!(c, '*' | '#'))
    {
        if params.contains("phone-context=") {
            Ok(())
        } else {
            Err(format!(
                "local telephone number without phone-context: {}",
                number
            ))
        }
    } else {
        Err(format!("bad local telephone number: {}", number))
    }
}
