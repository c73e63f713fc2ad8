//
// sort.rs
//
// Orders a window's tabs by URL
//

use std::sync::Arc;

use crate::browser::{ApiResult, BrowserApi, MoveProperties, Tab, TabApiError, TabId, TabQuery, WindowId};
use crate::tab_index::SharedTabIndex;
use crate::url_normalizer::{canonical_tab_url, CanonicalUrl};

/// Result of one sort pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortReport {
    pub window_id: Option<WindowId>,
    /// Tabs with a parseable URL
    pub sortable: usize,
    /// Tabs kept at the tail (no http/https URL)
    pub unsortable: usize,
    pub moves: usize,
    pub failed_moves: usize,
}

/// Sorts tabs by hostname, path, query and fragment.
///
/// Only tabs whose position differs from their target are moved. Moves are
/// issued front to back against a running model of the window, so every
/// move lands where it was planned even though earlier moves shift indices.
#[derive(Clone)]
pub struct TabSorter {
    browser: Arc<dyn BrowserApi>,
    index: SharedTabIndex,
}

impl TabSorter {
    pub fn new(browser: Arc<dyn BrowserApi>, index: SharedTabIndex) -> Self {
        Self { browser, index }
    }

    pub async fn sort_current_window(&self) -> ApiResult<SortReport> {
        let window = self.browser.get_current_window().await?;
        self.sort_window(window.id).await
    }

    pub async fn sort_window(&self, window_id: WindowId) -> ApiResult<SortReport> {
        let mut tabs = self.browser.query_tabs(TabQuery::in_window(window_id)).await?;
        tabs.sort_by_key(|tab| tab.index);

        let (sortable, unsortable) = self.partition(&tabs);
        let mut report = SortReport {
            window_id: Some(window_id),
            sortable: sortable.len(),
            unsortable,
            ..Default::default()
        };

        let mut current: Vec<TabId> = tabs.iter().map(|tab| tab.id).collect();
        for (target, tab_id) in sortable.iter().enumerate() {
            let Some(position) = current.iter().position(|id| id == tab_id) else {
                continue;
            };
            if position == target {
                continue;
            }

            match self
                .browser
                .move_tab(*tab_id, MoveProperties::to_index(target))
                .await
            {
                Ok(_) => {
                    current.remove(position);
                    current.insert(target, *tab_id);
                    report.moves += 1;
                }
                Err(TabApiError::TabNotFound(_)) => {
                    log::debug!("Tab {} closed while sorting window {}", tab_id, window_id);
                    current.remove(position);
                    self.index.with(|index| index.forget(*tab_id));
                    report.failed_moves += 1;
                }
                Err(e) => {
                    log::warn!("Failed to move tab {} while sorting: {}", tab_id, e);
                    report.failed_moves += 1;
                }
            }
        }

        log::info!(
            "Sorted window {}: {} tabs, {} moved, {} unsortable",
            window_id,
            tabs.len(),
            report.moves,
            report.unsortable
        );
        Ok(report)
    }

    /// Sortable tab ids in target order, plus the number of unsortable tabs.
    ///
    /// Every parsed URL is written back to the index; tabs whose URL no
    /// longer parses are dropped from it.
    fn partition(&self, tabs: &[Tab]) -> (Vec<TabId>, usize) {
        let mut keyed: Vec<(TabId, CanonicalUrl)> = Vec::with_capacity(tabs.len());
        let mut unsortable = 0;

        self.index.with(|index| {
            for tab in tabs {
                match canonical_tab_url(tab) {
                    Some(url) => {
                        index.put(tab.id, url.clone(), tab.window_id);
                        keyed.push((tab.id, url));
                    }
                    None => {
                        if index.contains(tab.id) {
                            index.forget(tab.id);
                        }
                        unsortable += 1;
                    }
                }
            }
        });

        // Stable, so equal URLs keep their relative order and a sorted
        // window stays put.
        keyed.sort_by(|(_, a), (_, b)| a.sort_cmp(b));
        (keyed.into_iter().map(|(tab_id, _)| tab_id).collect(), unsortable)
    }
}
