//
// tab_index/cache.rs
//
// Bidirectional tab <-> URL index
//

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use indexmap::IndexMap;

use crate::browser::{Tab, TabId, WindowId};
use crate::url_normalizer::{canonical_tab_url, CanonicalUrl};

/// Forward entry: what the index believes a tab is showing, and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackedTab {
    pub tab_id: TabId,
    pub url: CanonicalUrl,
    pub window_id: WindowId,
}

/// Forward map (tab -> url/window) and reverse map (href -> tabs showing it).
///
/// Reverse buckets keep insertion order, so the first entry of a bucket is
/// the tab that has shown that URL the longest. Buckets are keyed by tab id,
/// which makes a second pair for the same tab unrepresentable, and a bucket
/// is dropped the moment it becomes empty.
#[derive(Debug, Default)]
pub struct TabUrlIndex {
    /// Forward lookup: tab -> tracked entry
    forward: HashMap<TabId, TrackedTab>,
    /// Reverse lookup: href -> (tab -> window), insertion ordered
    reverse: HashMap<String, IndexMap<TabId, WindowId>>,
    /// Tabs a reconciliation has committed to closing
    pending_removal: HashSet<TabId>,
}

impl TabUrlIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite the entry for a tab.
    ///
    /// A tab already listed under `url` keeps its position in the bucket and
    /// only has its window corrected (tab moved without navigating). A tab
    /// previously cached under another URL is evicted from that bucket first.
    pub fn put(&mut self, tab_id: TabId, url: CanonicalUrl, window_id: WindowId) {
        if let Some(previous) = self.forward.get(&tab_id) {
            if previous.url.href() != url.href() {
                let old_href = previous.url.href().to_string();
                self.remove_from_bucket(tab_id, &old_href);
            }
        }

        let bucket = self.reverse.entry(url.href().to_string()).or_default();
        let stored = bucket.entry(tab_id).or_insert(window_id);
        if *stored != window_id {
            log::trace!(
                "Correcting window for tab {} under {}: {} -> {}",
                tab_id,
                url,
                stored,
                window_id
            );
            *stored = window_id;
        }

        log::trace!("Indexed tab {} (window {}) at {}", tab_id, window_id, url);
        self.forward.insert(
            tab_id,
            TrackedTab {
                tab_id,
                url,
                window_id,
            },
        );
    }

    /// Drop a tab from the index.
    ///
    /// The forward entry is deleted unconditionally. When `url` is given the
    /// tab's pair is removed from that URL's bucket; the bucket of the URL the
    /// forward entry pointed to is cleaned as well, so a stale `url` argument
    /// cannot leave an orphaned pair behind.
    pub fn remove(&mut self, tab_id: TabId, url: Option<&CanonicalUrl>) {
        let previous = self.forward.remove(&tab_id);
        self.pending_removal.remove(&tab_id);

        if let Some(url) = url {
            self.remove_from_bucket(tab_id, url.href());
        }
        if let Some(previous) = previous {
            if url.map(|u| u.href()) != Some(previous.url.href()) {
                self.remove_from_bucket(tab_id, previous.url.href());
            }
            log::trace!("Removed tab {} ({}) from index", tab_id, previous.url);
        }
    }

    /// Remove a tab using whatever URL the index has cached for it.
    pub fn forget(&mut self, tab_id: TabId) -> Option<TrackedTab> {
        let tracked = self.forward.get(&tab_id).cloned()?;
        self.remove(tab_id, Some(&tracked.url));
        Some(tracked)
    }

    /// Remove every tab cached as belonging to `window_id`.
    ///
    /// Returns the number of tabs removed.
    pub fn remove_all_for_window(&mut self, window_id: WindowId) -> usize {
        let doomed: Vec<(TabId, CanonicalUrl)> = self
            .forward
            .values()
            .filter(|tracked| tracked.window_id == window_id)
            .map(|tracked| (tracked.tab_id, tracked.url.clone()))
            .collect();

        for (tab_id, url) in &doomed {
            self.remove(*tab_id, Some(url));
        }
        log::trace!(
            "Removed {} tabs of closed window {} from index",
            doomed.len(),
            window_id
        );
        doomed.len()
    }

    /// Apply an observed tab change and report whether a duplicate check is due.
    ///
    /// A tab whose new URL is not trackable is dropped and never needs a
    /// check. Otherwise the entry is rewritten when the URL or window changed,
    /// and a check is due in that case or when the tab just finished loading
    /// (a redirect in place can still produce a new duplicate).
    pub fn reconcile_update(
        &mut self,
        tab_id: TabId,
        new_url: Option<CanonicalUrl>,
        window_id: WindowId,
        load_complete: bool,
    ) -> bool {
        let Some(new_url) = new_url else {
            if self.forward.contains_key(&tab_id) {
                log::trace!("Tab {} left tracked URLs, dropping from index", tab_id);
                self.forget(tab_id);
            }
            return false;
        };

        let (url_changed, window_changed) = match self.forward.get(&tab_id) {
            Some(old) => (
                old.url.href() != new_url.href(),
                old.window_id != window_id,
            ),
            None => (true, false),
        };

        if url_changed || window_changed {
            log::trace!(
                "Tab {} changed (url: {}, window: {}), re-indexing at {}",
                tab_id,
                url_changed,
                window_changed,
                new_url
            );
            self.forget(tab_id);
            self.put(tab_id, new_url, window_id);
            return true;
        }

        load_complete
    }

    /// Rebuild both maps from a snapshot of every open tab.
    ///
    /// Returns the number of tabs cached.
    pub fn initialize_from_snapshot(&mut self, tabs: &[Tab]) -> usize {
        self.forward.clear();
        self.reverse.clear();
        self.pending_removal.clear();

        let mut cached = 0;
        for tab in tabs {
            match canonical_tab_url(tab) {
                Some(url) => {
                    self.put(tab.id, url, tab.window_id);
                    cached += 1;
                }
                None => {
                    log::trace!("Not indexing tab {}: no trackable URL", tab.id);
                }
            }
        }
        cached
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TrackedTab> {
        self.forward.get(&tab_id)
    }

    pub fn contains(&self, tab_id: TabId) -> bool {
        self.forward.contains_key(&tab_id)
    }

    /// Tabs showing `href`, in insertion order.
    pub fn tabs_with_url(&self, href: &str) -> Vec<(TabId, WindowId)> {
        self.reverse
            .get(href)
            .map(|bucket| bucket.iter().map(|(t, w)| (*t, *w)).collect())
            .unwrap_or_default()
    }

    /// Number of tabs showing `href` in `window_id`, not counting tabs
    /// already reserved for removal.
    pub fn count_in_window(&self, href: &str, window_id: WindowId) -> usize {
        self.reverse
            .get(href)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|(t, w)| **w == window_id && !self.pending_removal.contains(*t))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Mark a tracked tab as about to be closed.
    ///
    /// Returns false when the tab is untracked or already reserved. The
    /// reservation ends when the tab is removed from the index or released.
    pub fn reserve_removal(&mut self, tab_id: TabId) -> bool {
        if !self.forward.contains_key(&tab_id) {
            return false;
        }
        let reserved = self.pending_removal.insert(tab_id);
        if reserved {
            log::trace!("Reserved tab {} for removal", tab_id);
        }
        reserved
    }

    pub fn release_removal(&mut self, tab_id: TabId) {
        if self.pending_removal.remove(&tab_id) {
            log::trace!("Released removal reservation for tab {}", tab_id);
        }
    }

    pub fn is_removal_pending(&self, tab_id: TabId) -> bool {
        self.pending_removal.contains(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.forward.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Number of distinct URLs in the reverse map.
    pub fn url_count(&self) -> usize {
        self.reverse.len()
    }

    /// Check that the forward and reverse maps agree.
    ///
    /// Every forward entry must appear exactly once, with the same window,
    /// in the bucket of its URL; every reverse pair must be backed by a
    /// forward entry for that URL; no bucket may be empty. Only tracked tabs
    /// may be reserved for removal.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (tab_id, tracked) in &self.forward {
            let Some(bucket) = self.reverse.get(tracked.url.href()) else {
                return Err(format!(
                    "tab {} cached at {} but no reverse bucket exists",
                    tab_id, tracked.url
                ));
            };
            match bucket.get(tab_id) {
                Some(window_id) if *window_id == tracked.window_id => {}
                Some(window_id) => {
                    return Err(format!(
                        "tab {} window mismatch: forward {}, reverse {}",
                        tab_id, tracked.window_id, window_id
                    ))
                }
                None => {
                    return Err(format!(
                        "tab {} missing from reverse bucket {}",
                        tab_id, tracked.url
                    ))
                }
            }
        }

        for (href, bucket) in &self.reverse {
            if bucket.is_empty() {
                return Err(format!("empty reverse bucket for {href}"));
            }
            for tab_id in bucket.keys() {
                match self.forward.get(tab_id) {
                    Some(tracked) if tracked.url.href() == href => {}
                    _ => {
                        return Err(format!(
                            "reverse pair for tab {tab_id} under {href} has no forward entry"
                        ))
                    }
                }
            }
        }

        if let Some(tab_id) = self
            .pending_removal
            .iter()
            .find(|t| !self.forward.contains_key(*t))
        {
            return Err(format!("untracked tab {tab_id} reserved for removal"));
        }
        Ok(())
    }

    fn remove_from_bucket(&mut self, tab_id: TabId, href: &str) {
        let Some(bucket) = self.reverse.get_mut(href) else {
            return;
        };
        bucket.shift_remove(&tab_id);
        if bucket.is_empty() {
            self.reverse.remove(href);
            log::trace!("URL {} no longer shown by any tab", href);
        }
    }
}

/// Shared handle to the index.
///
/// Each call holds the lock for the synchronous body of one index operation
/// and never across an `.await`, so every observer sees a consistent index.
#[derive(Debug, Clone, Default)]
pub struct SharedTabIndex {
    inner: Arc<Mutex<TabUrlIndex>>,
}

impl SharedTabIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` with exclusive access to the index.
    pub fn with<R>(&self, f: impl FnOnce(&mut TabUrlIndex) -> R) -> R {
        let mut guard = self.lock();
        f(&mut guard)
    }

    fn lock(&self) -> MutexGuard<'_, TabUrlIndex> {
        // A panic mid-operation cannot leave the maps half-updated in a way
        // later calls can't repair, so keep going with the inner value.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
