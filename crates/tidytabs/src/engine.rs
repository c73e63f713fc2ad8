//
// engine.rs
//
// Routes lifecycle events and user commands to the index, reconciler,
// merger and sorter
//

use std::sync::Arc;

use crate::browser::{BrowserApi, CreateProperties, Tab, TabApiError, TabId, TabQuery, TabStatus};
use crate::config::EngineConfig;
use crate::events::{ChangeInfo, Command, GestureAction, TabEvent};
use crate::merge::{MergeReport, WindowMerger};
use crate::sort::{SortReport, TabSorter};
use crate::tab_index::{DuplicateReconciler, ObservedTab, ReconcileOutcome, SharedTabIndex};
use crate::url_normalizer::canonical_tab_url;

/// What handling a command produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Sorted(SortReport),
    Merged(MergeReport),
    TabOpened(TabId),
    TabClosed(TabId),
    /// The command could not be carried out; the reason was logged
    Ignored,
}

/// The tab organizer.
///
/// Cheap to clone; every clone shares one index and one browser handle.
#[derive(Clone)]
pub struct TabEngine {
    browser: Arc<dyn BrowserApi>,
    index: SharedTabIndex,
    config: EngineConfig,
    reconciler: DuplicateReconciler,
    sorter: TabSorter,
    merger: WindowMerger,
}

impl TabEngine {
    pub fn new(browser: Arc<dyn BrowserApi>, config: EngineConfig) -> Self {
        let index = SharedTabIndex::new();
        let reconciler = DuplicateReconciler::new(browser.clone(), index.clone())
            .with_focus_survivor(config.focus_survivor);
        let sorter = TabSorter::new(browser.clone(), index.clone());
        let merger = WindowMerger::new(browser.clone(), index.clone())
            .with_sort_after_merge(config.sort_after_merge)
            .with_close_pinned_only_windows(config.close_pinned_only_windows);
        Self {
            browser,
            index,
            config,
            reconciler,
            sorter,
            merger,
        }
    }

    pub fn index(&self) -> &SharedTabIndex {
        &self.index
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Rebuild the index from every open tab.
    pub async fn initialize(&self) -> Result<usize, TabApiError> {
        let tabs = self.browser.query_tabs(TabQuery::all()).await?;
        let cached = self.index.with(|index| index.initialize_from_snapshot(&tabs));
        log::info!("Indexed {} of {} open tabs", cached, tabs.len());
        Ok(cached)
    }

    pub async fn handle_event(&self, event: TabEvent) {
        match event {
            TabEvent::Created(tab) => {
                if let Some(url) = canonical_tab_url(&tab) {
                    self.index.with(|index| index.put(tab.id, url, tab.window_id));
                }
            }
            TabEvent::Updated { tab_id, change, tab } => {
                self.on_updated(tab_id, &change, tab).await;
            }
            TabEvent::Removed { tab_id, info } => {
                self.index.with(|index| {
                    if info.is_window_closing {
                        index.remove_all_for_window(info.window_id);
                    }
                    index.forget(tab_id);
                });
            }
            // A tab arriving in a window may duplicate one already there,
            // even when the index already knows its new window.
            TabEvent::Attached { tab_id, .. } => match self.browser.get_tab(tab_id).await {
                Ok(tab) => self.on_tab_changed(&tab, true).await,
                Err(e) if e.is_not_found() => {
                    log::debug!("Attached tab {} closed before it could be read", tab_id);
                    self.index.with(|index| index.forget(tab_id));
                }
                Err(e) => log::error!("Error reading attached tab {}: {}", tab_id, e),
            },
            TabEvent::Detached { .. } => {}
        }
    }

    async fn on_updated(&self, tab_id: TabId, change: &ChangeInfo, tab: Option<Tab>) {
        let load_complete = change.status == Some(TabStatus::Complete);
        match tab {
            Some(tab) => {
                if change.url.is_some() || change.status.is_some() {
                    self.on_tab_changed(&tab, load_complete).await;
                }
            }
            // Some hosts send a bare id when loading finishes.
            None if load_complete => match self.browser.get_tab(tab_id).await {
                Ok(tab) => self.on_tab_changed(&tab, true).await,
                Err(e) if e.is_not_found() => {}
                Err(e) => log::error!("Error reading updated tab {}: {}", tab_id, e),
            },
            None => {}
        }
    }

    /// `settled` asks for a duplicate check even when the index entry is unchanged.
    async fn on_tab_changed(&self, tab: &Tab, settled: bool) {
        let url = canonical_tab_url(tab);
        let check = self.index.with(|index| {
            index.reconcile_update(tab.id, url.clone(), tab.window_id, settled)
        });

        let Some(url) = url else {
            log::trace!("Tab {} has no trackable URL", tab.id);
            return;
        };
        if !check || !self.config.dedupe_enabled {
            return;
        }

        let outcome = self
            .reconciler
            .reconcile(&ObservedTab::from_tab(tab, url))
            .await;
        if let ReconcileOutcome::SurvivorGone { survivor } = outcome {
            log::debug!("Kept tab {} because tab {} closed first", tab.id, survivor);
        }
    }

    pub async fn handle_command(&self, command: Command) -> CommandOutcome {
        match command {
            Command::SortTabs => match self.sorter.sort_current_window().await {
                Ok(report) => CommandOutcome::Sorted(report),
                Err(e) => {
                    log::warn!("Sort failed: {}", e);
                    CommandOutcome::Ignored
                }
            },
            Command::MergeWindows => match self.merger.merge_all().await {
                Ok(report) => CommandOutcome::Merged(report),
                Err(e) => {
                    log::warn!("Merge failed: {}", e);
                    CommandOutcome::Ignored
                }
            },
            Command::Gesture { gesture, tab_id } => match GestureAction::from_code(&gesture) {
                Some(GestureAction::NewTab) => self.open_tab_after(tab_id).await,
                Some(GestureAction::CloseTab) => self.close_tab(tab_id).await,
                None => {
                    log::warn!("Unknown gesture: '{}'", gesture);
                    CommandOutcome::Ignored
                }
            },
        }
    }

    async fn open_tab_after(&self, opener: TabId) -> CommandOutcome {
        let placed = match self.browser.get_tab(opener).await {
            Ok(tab) => CreateProperties {
                index: Some(tab.index + 1),
                opener_tab_id: Some(tab.id),
                active: true,
            },
            Err(e) => {
                log::debug!("Opener tab {} unavailable ({}), opening a plain tab", opener, e);
                CreateProperties {
                    active: true,
                    ..Default::default()
                }
            }
        };

        let created = match self.browser.create_tab(placed).await {
            Ok(tab) => Ok(tab),
            Err(e) if placed.opener_tab_id.is_some() => {
                log::debug!("Creating tab next to {} failed ({}), retrying", opener, e);
                self.browser
                    .create_tab(CreateProperties {
                        active: true,
                        ..Default::default()
                    })
                    .await
            }
            Err(e) => Err(e),
        };

        match created {
            Ok(tab) => CommandOutcome::TabOpened(tab.id),
            Err(e) => {
                log::error!("Error opening new tab: {}", e);
                CommandOutcome::Ignored
            }
        }
    }

    async fn close_tab(&self, tab_id: TabId) -> CommandOutcome {
        match self.browser.remove_tab(tab_id).await {
            Ok(()) => CommandOutcome::TabClosed(tab_id),
            Err(TabApiError::TabNotFound(_)) => {
                log::debug!("Tab {} to close was already gone", tab_id);
                CommandOutcome::TabClosed(tab_id)
            }
            Err(e) => {
                log::error!("Error closing tab {}: {}", tab_id, e);
                CommandOutcome::Ignored
            }
        }
    }
}
