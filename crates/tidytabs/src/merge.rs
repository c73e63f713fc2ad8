//
// merge.rs
//
// Collects the tabs of every window into the focused one
//

use std::sync::Arc;
use std::time::Instant;

use crate::browser::{ApiResult, BrowserApi, MoveProperties, Tab, TabApiError, WindowId};
use crate::sort::TabSorter;
use crate::tab_index::SharedTabIndex;
use crate::url_normalizer::canonical_tab_url;

/// Result of one merge
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub target: Option<WindowId>,
    pub moved: usize,
    /// Candidates that vanished or failed to move
    pub skipped: usize,
    pub closed_windows: Vec<WindowId>,
    pub sorted: bool,
}

/// Moves every non-pinned tab of every other window to the end of the
/// focused window.
///
/// Pinned tabs never move. Afterwards, windows left without tabs are closed
/// (and, when configured, windows left with pinned tabs only), the target is
/// focused and optionally sorted. Failures on single tabs or windows are
/// logged and skipped.
#[derive(Clone)]
pub struct WindowMerger {
    browser: Arc<dyn BrowserApi>,
    index: SharedTabIndex,
    sorter: TabSorter,
    sort_after_merge: bool,
    close_pinned_only_windows: bool,
}

impl WindowMerger {
    pub fn new(browser: Arc<dyn BrowserApi>, index: SharedTabIndex) -> Self {
        let sorter = TabSorter::new(browser.clone(), index.clone());
        Self {
            browser,
            index,
            sorter,
            sort_after_merge: true,
            close_pinned_only_windows: false,
        }
    }

    pub fn with_sort_after_merge(mut self, sort_after_merge: bool) -> Self {
        self.sort_after_merge = sort_after_merge;
        self
    }

    pub fn with_close_pinned_only_windows(mut self, close: bool) -> Self {
        self.close_pinned_only_windows = close;
        self
    }

    pub async fn merge_all(&self) -> ApiResult<MergeReport> {
        let start_time = Instant::now();
        let windows = self.browser.get_all_windows(true).await?;

        if windows.len() <= 1 {
            let window_id = match windows.first() {
                Some(window) => window.id,
                None => self.browser.get_current_window().await?.id,
            };
            log::debug!("Only window {} is open, nothing to merge", window_id);
            let mut report = MergeReport {
                target: Some(window_id),
                ..Default::default()
            };
            report.sorted = self.sort_target(window_id).await;
            return Ok(report);
        }

        let target = match windows.iter().find(|w| w.focused) {
            Some(window) => window.id,
            None => self.browser.get_current_window().await?.id,
        };

        let candidates: Vec<Tab> = windows
            .iter()
            .filter(|w| w.id != target)
            .flat_map(|w| w.tabs.iter())
            .filter(|tab| !tab.pinned)
            .cloned()
            .collect();
        log::info!(
            "Merging {} tabs from {} windows into window {}",
            candidates.len(),
            windows.len() - 1,
            target
        );

        let mut report = MergeReport {
            target: Some(target),
            ..Default::default()
        };
        for tab in &candidates {
            if self.move_to_target(tab, target).await {
                report.moved += 1;
            } else {
                report.skipped += 1;
            }
        }

        report.closed_windows = self.close_leftover_windows(target).await;

        if let Err(e) = self.browser.focus_window(target).await {
            log::warn!("Failed to focus window {} after merge: {}", target, e);
        }
        report.sorted = self.sort_target(target).await;

        log::info!(
            "Merged {} tabs into window {} ({} skipped, {} windows closed) in {:?}",
            report.moved,
            target,
            report.skipped,
            report.closed_windows.len(),
            start_time.elapsed()
        );
        Ok(report)
    }

    /// Verify a candidate, move it, and rebind its index entry to `target`.
    async fn move_to_target(&self, tab: &Tab, target: WindowId) -> bool {
        match self.browser.get_tab(tab.id).await {
            Ok(live) if live.pinned => {
                log::debug!("Tab {} was pinned during merge, leaving it", tab.id);
                return false;
            }
            Ok(live) if live.window_id == target => {
                log::debug!("Tab {} already in window {}", tab.id, target);
                return false;
            }
            Ok(_) => {}
            Err(TabApiError::TabNotFound(_)) => {
                log::debug!("Tab {} closed before it could be merged", tab.id);
                self.index.with(|index| index.forget(tab.id));
                return false;
            }
            Err(e) => {
                log::error!("Error verifying tab {} for merge: {}", tab.id, e);
                return false;
            }
        }

        match self
            .browser
            .move_tab(tab.id, MoveProperties::to_window_end(target))
            .await
        {
            Ok(moved) => {
                self.index.with(|index| {
                    // Moved tabs go to the back of their URL bucket.
                    let url = match index.forget(tab.id) {
                        Some(tracked) => Some(tracked.url),
                        None => canonical_tab_url(&moved),
                    };
                    if let Some(url) = url {
                        index.put(tab.id, url, moved.window_id);
                    }
                });
                true
            }
            Err(e) if e.is_not_found() => {
                log::debug!("Tab {} or window {} vanished mid-merge: {}", tab.id, target, e);
                self.index.with(|index| index.forget(tab.id));
                false
            }
            Err(e) => {
                log::error!("Error moving tab {} into window {}: {}", tab.id, target, e);
                false
            }
        }
    }

    async fn close_leftover_windows(&self, target: WindowId) -> Vec<WindowId> {
        let windows = match self.browser.get_all_windows(true).await {
            Ok(windows) => windows,
            Err(e) => {
                log::error!("Error listing windows after merge: {}", e);
                return Vec::new();
            }
        };

        let mut closed = Vec::new();
        for window in windows.iter().filter(|w| w.id != target) {
            let leftover = if self.close_pinned_only_windows {
                window.is_empty_or_pinned_only()
            } else {
                window.tabs.is_empty()
            };
            if !leftover {
                continue;
            }

            match self.browser.close_window(window.id).await {
                Ok(()) | Err(TabApiError::WindowNotFound(_)) => {
                    log::debug!("Closed window {} after merge", window.id);
                    self.index.with(|index| index.remove_all_for_window(window.id));
                    closed.push(window.id);
                }
                Err(e) => {
                    log::warn!("Failed to close window {}: {}", window.id, e);
                }
            }
        }
        closed
    }

    async fn sort_target(&self, window_id: WindowId) -> bool {
        if !self.sort_after_merge {
            return false;
        }
        match self.sorter.sort_window(window_id).await {
            Ok(_) => true,
            Err(e) => {
                log::warn!("Failed to sort window {} after merge: {}", window_id, e);
                false
            }
        }
    }
}
