//
// tab_index/reconcile.rs
//
// Duplicate detection and elimination for a freshly confirmed tab URL
//

use std::sync::Arc;

use crate::browser::{BrowserApi, Tab, TabApiError, TabId, WindowId};
use crate::url_normalizer::CanonicalUrl;

use super::cache::{SharedTabIndex, TabUrlIndex};

/// The tab whose event triggered a duplicate check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedTab {
    pub tab_id: TabId,
    pub window_id: WindowId,
    pub is_active: bool,
    pub url: CanonicalUrl,
}

impl ObservedTab {
    pub fn from_tab(tab: &Tab, url: CanonicalUrl) -> Self {
        Self {
            tab_id: tab.id,
            window_id: tab.window_id,
            is_active: tab.active,
            url,
        }
    }
}

/// Why a reconciliation stopped without closing anything
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// No other live tab shows the URL in this window
    NoDuplicate,
    /// The observed tab closed while the check was running
    ObservedGone,
    /// The index no longer lists more than one tab for the URL in this window
    LastInWindow,
    /// Another reconciliation is already closing the observed tab
    RemovalInProgress,
    /// A lookup failed for a reason other than the target being gone
    ApiError,
}

/// Terminal state of one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Aborted(AbortReason),
    /// The chosen survivor vanished before the observed tab could be closed;
    /// the observed tab is left open.
    SurvivorGone { survivor: TabId },
    /// The observed tab was closed (or was found already closed) in favor of `survivor`.
    ObservedRemoved { survivor: TabId },
}

impl ReconcileOutcome {
    pub fn removed_observed(&self) -> bool {
        matches!(self, ReconcileOutcome::ObservedRemoved { .. })
    }
}

/// Closes a tab that duplicates an older tab in the same window.
///
/// The survivor is the earliest-indexed live tab for the URL in the window;
/// the observed tab is the one closed. Every tab is re-checked against the
/// browser right before it is acted on, and tabs found missing are dropped
/// from the index on the spot.
///
/// Reconciliations may run concurrently. Before closing anything, one
/// reserves the observed tab in the index; reserved tabs are neither counted
/// nor picked as survivors by the others, so the last copy of a URL in a
/// window is never closed.
#[derive(Clone)]
pub struct DuplicateReconciler {
    browser: Arc<dyn BrowserApi>,
    index: SharedTabIndex,
    focus_survivor: bool,
}

impl DuplicateReconciler {
    pub fn new(browser: Arc<dyn BrowserApi>, index: SharedTabIndex) -> Self {
        Self {
            browser,
            index,
            focus_survivor: true,
        }
    }

    /// Whether to activate the survivor when the closed duplicate was active.
    pub fn with_focus_survivor(mut self, focus_survivor: bool) -> Self {
        self.focus_survivor = focus_survivor;
        self
    }

    pub async fn reconcile(&self, observed: &ObservedTab) -> ReconcileOutcome {
        let url = &observed.url;

        let candidates: Option<Vec<TabId>> = self.index.with(|index| {
            if index.is_removal_pending(observed.tab_id) {
                return None;
            }
            Some(
                index
                    .tabs_with_url(url.href())
                    .into_iter()
                    .filter(|(tab_id, window_id)| {
                        *window_id == observed.window_id
                            && *tab_id != observed.tab_id
                            && !index.is_removal_pending(*tab_id)
                    })
                    .map(|(tab_id, _)| tab_id)
                    .collect(),
            )
        });
        let Some(candidates) = candidates else {
            return ReconcileOutcome::Aborted(AbortReason::RemovalInProgress);
        };
        if candidates.is_empty() {
            return ReconcileOutcome::Aborted(AbortReason::NoDuplicate);
        }

        let live = self.live_candidates(&candidates, url).await;
        if live.is_empty() {
            log::debug!(
                "All {} cached duplicates of tab {} at {} were stale",
                candidates.len(),
                observed.tab_id,
                url
            );
            return ReconcileOutcome::Aborted(AbortReason::NoDuplicate);
        }
        log::info!(
            "Found {} duplicate(s) of tab {} ({}) in window {}",
            live.len(),
            observed.tab_id,
            url,
            observed.window_id
        );

        match self.browser.get_tab(observed.tab_id).await {
            Ok(_) => {}
            Err(TabApiError::TabNotFound(_)) => {
                log::debug!(
                    "Tab {} intended for removal as a duplicate was already closed",
                    observed.tab_id
                );
                self.index.with(|index| index.remove(observed.tab_id, Some(url)));
                return ReconcileOutcome::Aborted(AbortReason::ObservedGone);
            }
            Err(e) => {
                log::error!("Error re-checking tab {}: {}", observed.tab_id, e);
                return ReconcileOutcome::Aborted(AbortReason::ApiError);
            }
        }

        // Check and reserve under one lock: another reconciliation for the
        // same URL may have claimed a tab while this one was awaiting.
        let survivor = match self.index.with(|index| claim_removal(index, observed, &live)) {
            Ok(survivor) => survivor,
            Err(AbortReason::LastInWindow) => {
                log::warn!(
                    "Skipping duplicate removal for tab {}: it is the last one with {} in window {}",
                    observed.tab_id,
                    url,
                    observed.window_id
                );
                return ReconcileOutcome::Aborted(AbortReason::LastInWindow);
            }
            Err(reason) => {
                log::debug!("Tab {} is already being closed", observed.tab_id);
                return ReconcileOutcome::Aborted(reason);
            }
        };
        log::debug!("Keeping tab {} over duplicate {}", survivor, observed.tab_id);

        match self.browser.get_tab(survivor).await {
            Ok(_) => {}
            Err(TabApiError::TabNotFound(_)) => {
                log::warn!(
                    "Tab {} to keep closed before its duplicate {} could be removed; leaving {} open",
                    survivor,
                    observed.tab_id,
                    observed.tab_id
                );
                self.index.with(|index| {
                    index.remove(survivor, Some(url));
                    index.release_removal(observed.tab_id);
                });
                return ReconcileOutcome::SurvivorGone { survivor };
            }
            Err(e) => {
                log::error!("Error re-checking tab {}: {}", survivor, e);
                self.index.with(|index| index.release_removal(observed.tab_id));
                return ReconcileOutcome::Aborted(AbortReason::ApiError);
            }
        }

        if observed.is_active && self.focus_survivor {
            if let Err(e) = self.browser.set_tab_active(survivor).await {
                if e.is_not_found() {
                    log::warn!("Failed to focus tab {}: likely closed", survivor);
                } else {
                    log::error!("Error focusing tab {}: {}", survivor, e);
                }
            }
        }

        match self.browser.remove_tab(observed.tab_id).await {
            Ok(()) => {
                log::info!(
                    "Closed duplicate tab {} in favor of tab {}",
                    observed.tab_id,
                    survivor
                );
            }
            Err(TabApiError::TabNotFound(_)) => {
                log::debug!("Duplicate tab {} was already closed", observed.tab_id);
            }
            Err(e) => {
                log::error!("Error removing duplicate tab {}: {}", observed.tab_id, e);
                self.index.with(|index| index.release_removal(observed.tab_id));
                return ReconcileOutcome::Aborted(AbortReason::ApiError);
            }
        }
        self.index.with(|index| index.remove(observed.tab_id, Some(url)));
        ReconcileOutcome::ObservedRemoved { survivor }
    }

    /// Keep the candidates that still exist, in their original order.
    ///
    /// Missing candidates are removed from the index (their removal event was
    /// missed or has not been processed yet).
    async fn live_candidates(&self, candidates: &[TabId], url: &CanonicalUrl) -> Vec<TabId> {
        let mut live = Vec::with_capacity(candidates.len());
        for &candidate in candidates {
            match self.browser.get_tab(candidate).await {
                Ok(_) => live.push(candidate),
                Err(TabApiError::TabNotFound(_)) => {
                    log::debug!(
                        "Cached duplicate tab {} no longer exists, dropping it from the index",
                        candidate
                    );
                    self.index.with(|index| index.remove(candidate, Some(url)));
                }
                Err(e) => {
                    log::error!("Error verifying duplicate tab {}: {}", candidate, e);
                }
            }
        }
        live
    }
}

/// Reserve the observed tab for removal and pick its survivor: the first
/// live candidate that is still indexed and not itself being closed.
fn claim_removal(
    index: &mut TabUrlIndex,
    observed: &ObservedTab,
    live: &[TabId],
) -> Result<TabId, AbortReason> {
    if index.is_removal_pending(observed.tab_id) {
        return Err(AbortReason::RemovalInProgress);
    }
    if index.count_in_window(observed.url.href(), observed.window_id) <= 1 {
        return Err(AbortReason::LastInWindow);
    }
    let survivor = live
        .iter()
        .copied()
        .find(|t| index.contains(*t) && !index.is_removal_pending(*t))
        .ok_or(AbortReason::LastInWindow)?;
    index.reserve_removal(observed.tab_id);
    Ok(survivor)
}
