//
// url_normalizer.rs
//
// Canonical http/https tab URLs
//

use std::cmp::Ordering;
use std::fmt;

use url::Url;

use crate::browser::{Tab, TabApiError};

/// Placeholder URL shown by a freshly opened tab; never tracked.
pub const NEW_TAB_URL: &str = "chrome://newtab/";

/// A parsed http/https URL identified by its full `href`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalUrl {
    inner: Url,
}

impl CanonicalUrl {
    /// Parse a raw tab URL, rejecting anything that is not http/https.
    ///
    /// Empty strings, the new-tab placeholder, other schemes, and strings that
    /// pass the scheme check but fail structural parsing all yield an error.
    pub fn try_parse(raw: &str) -> Result<Self, TabApiError> {
        if raw.is_empty() || raw == NEW_TAB_URL {
            return Err(TabApiError::InvalidUrl(raw.to_string()));
        }
        if !(raw.starts_with("http:") || raw.starts_with("https:")) {
            return Err(TabApiError::InvalidUrl(raw.to_string()));
        }
        let inner = Url::parse(raw).map_err(|e| TabApiError::InvalidUrl(format!("{raw}: {e}")))?;
        match inner.scheme() {
            "http" | "https" => Ok(Self { inner }),
            _ => Err(TabApiError::InvalidUrl(raw.to_string())),
        }
    }

    /// The identity key used by the reverse index.
    pub fn href(&self) -> &str {
        self.inner.as_str()
    }

    pub fn hostname(&self) -> &str {
        self.inner.host_str().unwrap_or("")
    }

    pub fn pathname(&self) -> &str {
        self.inner.path()
    }

    /// Query string including the leading `?`, or empty when there is none.
    pub fn search(&self) -> String {
        match self.inner.query() {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        }
    }

    /// Fragment including the leading `#`, or empty when there is none.
    pub fn hash(&self) -> String {
        match self.inner.fragment() {
            Some(f) if !f.is_empty() => format!("#{f}"),
            _ => String::new(),
        }
    }

    pub fn as_url(&self) -> &Url {
        &self.inner
    }

    /// Ordering used by the tab sorter: hostname, then path, query, fragment.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        locale_compare(self.hostname(), other.hostname())
            .then_with(|| locale_compare(self.pathname(), other.pathname()))
            .then_with(|| locale_compare(&self.search(), &other.search()))
            .then_with(|| locale_compare(&self.hash(), &other.hash()))
    }
}

impl fmt::Display for CanonicalUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.href())
    }
}

/// `parse(rawUrlCandidate) -> CanonicalUrl | None`
pub fn parse(raw: &str) -> Option<CanonicalUrl> {
    CanonicalUrl::try_parse(raw).ok()
}

fn is_http_like(raw: &str) -> bool {
    raw.starts_with("http:") || raw.starts_with("https:")
}

/// Pick the URL string of a tab that best describes where it is headed.
///
/// Prefers the committed URL when it is a real http/https address, then the
/// pending URL, then whatever committed URL is available. Tabs observed
/// mid-navigation often carry `about:blank` or an internal page as `url`.
pub fn resolve_tab_url(tab: &Tab) -> Option<&str> {
    if let Some(url) = tab.url.as_deref().filter(|u| is_http_like(u)) {
        return Some(url);
    }
    tab.pending_url
        .as_deref()
        .filter(|u| !u.is_empty())
        .or(tab.url.as_deref())
}

/// Resolve and parse a tab's URL in one step.
pub fn canonical_tab_url(tab: &Tab) -> Option<CanonicalUrl> {
    resolve_tab_url(tab).and_then(parse)
}

/// Case-insensitive comparison with a case-sensitive tie-break.
///
/// Approximates a root-locale collation for URL components: `a.com` and
/// `A.com` sort together, lowercase before uppercase when otherwise equal.
pub fn locale_compare(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded.then_with(|| {
        // Lowercase first on ties, as collators do.
        b.cmp(a)
    })
}
