//
// tab_index/integration_tests.rs
//
// End-to-end scenarios for deduplication, merging and sorting against the
// in-memory browser, including tabs that disappear mid-operation
//

use std::sync::Arc;

use crate::browser::{BrowserApi, TabId, WindowId};
use crate::config::EngineConfig;
use crate::coordinator;
use crate::engine::TabEngine;
use crate::events::Command;
use crate::memory_browser::{ApiCall, InMemoryBrowser};
use crate::merge::WindowMerger;
use crate::sort::TabSorter;
use crate::url_normalizer::parse;

use super::cache::SharedTabIndex;
use super::reconcile::{AbortReason, DuplicateReconciler, ObservedTab, ReconcileOutcome};

struct World {
    browser: Arc<InMemoryBrowser>,
    index: SharedTabIndex,
}

impl World {
    fn new() -> Self {
        Self {
            browser: Arc::new(InMemoryBrowser::new()),
            index: SharedTabIndex::new(),
        }
    }

    /// A browser that suspends on every call, so joined futures interleave.
    fn yielding() -> Self {
        Self {
            browser: Arc::new(InMemoryBrowser::new().with_yielding()),
            index: SharedTabIndex::new(),
        }
    }

    fn api(&self) -> Arc<dyn BrowserApi> {
        self.browser.clone()
    }

    /// Index every open tab, as on startup.
    fn snapshot(&self) {
        let tabs: Vec<_> = self
            .browser
            .windows()
            .into_iter()
            .flat_map(|w| w.tabs)
            .collect();
        self.index.with(|index| index.initialize_from_snapshot(&tabs));
    }

    fn reconciler(&self) -> DuplicateReconciler {
        DuplicateReconciler::new(self.api(), self.index.clone())
    }

    fn observed(&self, tab_id: TabId) -> ObservedTab {
        let tab = self.browser.tab(tab_id).unwrap();
        let url = parse(tab.url.as_deref().unwrap()).unwrap();
        ObservedTab::from_tab(&tab, url)
    }

    fn urls(&self, window_id: WindowId) -> Vec<String> {
        self.browser
            .window_tab_ids(window_id)
            .into_iter()
            .filter_map(|id| self.browser.tab(id).and_then(|t| t.url))
            .collect()
    }
}

// ============================================================================
// Deduplication
// ============================================================================

#[tokio::test]
async fn test_scenario_same_window_duplicate_keeps_first() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();

    let outcome = world.reconciler().reconcile(&world.observed(t2)).await;
    assert_eq!(outcome, ReconcileOutcome::ObservedRemoved { survivor: t1 });
    assert!(world.browser.tab_exists(t1));
    assert!(!world.browser.tab_exists(t2));
    world.index.with(|index| {
        assert!(index.contains(t1));
        assert!(!index.contains(t2));
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_scenario_other_window_is_not_a_duplicate() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let w2 = world.browser.add_window(false);
    world.browser.open_tab(w1, "https://a.com/");
    let t3 = world.browser.open_tab(w2, "https://a.com/");
    world.snapshot();

    let outcome = world.reconciler().reconcile(&world.observed(t3)).await;
    assert_eq!(outcome, ReconcileOutcome::Aborted(AbortReason::NoDuplicate));
    assert!(world.browser.mutating_calls().is_empty());
    assert_eq!(world.index.with(|index| index.len()), 2);
}

#[tokio::test]
async fn test_unique_url_never_mutates() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    world.browser.open_tab(w1, "https://a.com/");
    world.browser.open_tab(w1, "https://a.com/other");
    let t3 = world.browser.open_tab(w1, "https://b.com/");
    world.browser.set_active_externally(t3);
    world.snapshot();

    world.reconciler().reconcile(&world.observed(t3)).await;
    assert!(world.browser.mutating_calls().is_empty());
}

#[tokio::test]
async fn test_concurrent_reconciliations_remove_only_one() {
    let world = World::yielding();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();

    let reconciler = world.reconciler();
    let first = world.observed(t1);
    let second = world.observed(t2);
    let (a, b) = tokio::join!(reconciler.reconcile(&first), reconciler.reconcile(&second));

    let removed = [a, b].iter().filter(|o| o.removed_observed()).count();
    assert_eq!(removed, 1);
    assert!([a, b].contains(&ReconcileOutcome::Aborted(AbortReason::LastInWindow)));
    assert_eq!(world.browser.window_tab_ids(w1).len(), 1);
    world.index.with(|index| {
        assert_eq!(index.count_in_window("https://a.com/", w1), 1);
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_concurrent_reconciliations_keep_a_live_survivor() {
    let world = World::yielding();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    let t3 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();

    let reconciler = world.reconciler();
    let (o1, o2, o3) = (world.observed(t1), world.observed(t2), world.observed(t3));
    let (a, b, c) = tokio::join!(
        reconciler.reconcile(&o1),
        reconciler.reconcile(&o2),
        reconciler.reconcile(&o3)
    );

    let alive = world.browser.window_tab_ids(w1);
    assert_eq!(alive.len(), 1);
    let removed = [a, b, c].iter().filter(|o| o.removed_observed()).count();
    assert_eq!(removed, 2);
    world.index.with(|index| {
        assert_eq!(index.tabs_with_url("https://a.com/"), vec![(alive[0], w1)]);
        assert!(!index.is_removal_pending(alive[0]));
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_failed_removal_releases_reservation() {
    let world = World::yielding();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();
    world.browser.fail_transiently(t2);

    let reconciler = world.reconciler();
    let outcome = reconciler.reconcile(&world.observed(t2)).await;
    assert_eq!(outcome, ReconcileOutcome::Aborted(AbortReason::ApiError));
    world.index.with(|index| {
        assert!(!index.is_removal_pending(t2));
        assert_eq!(index.count_in_window("https://a.com/", w1), 2);
    });

    // A later attempt may still close the duplicate.
    world.browser.clear_transient_failures();
    let outcome = reconciler.reconcile(&world.observed(t2)).await;
    assert_eq!(outcome, ReconcileOutcome::ObservedRemoved { survivor: t1 });
}

#[tokio::test]
async fn test_missed_removal_event_heals_index() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    let t3 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();
    world.browser.close_tab_externally(t1);

    let outcome = world.reconciler().reconcile(&world.observed(t3)).await;
    assert_eq!(outcome, ReconcileOutcome::ObservedRemoved { survivor: t2 });
    world.index.with(|index| {
        assert!(!index.contains(t1));
        assert_eq!(index.tabs_with_url("https://a.com/"), vec![(t2, w1)]);
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_survivor_vanishing_leaves_observed_open() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();
    world.browser.vanish_after_gets(t1, 1);

    let outcome = world.reconciler().reconcile(&world.observed(t2)).await;
    assert_eq!(outcome, ReconcileOutcome::SurvivorGone { survivor: t1 });
    assert!(world.browser.tab_exists(t2));
    world.index.with(|index| {
        assert_eq!(index.tabs_with_url("https://a.com/"), vec![(t2, w1)]);
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_failed_removal_leaves_both_tabs() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let t1 = world.browser.open_tab(w1, "https://a.com/");
    let t2 = world.browser.open_tab(w1, "https://a.com/");
    world.snapshot();
    // Removing t2 fails with an error other than not-found.
    world.browser.fail_transiently(t2);
    world.browser.set_active_externally(t2);

    let outcome = world.reconciler().reconcile(&world.observed(t2)).await;
    assert_eq!(outcome, ReconcileOutcome::Aborted(AbortReason::ApiError));
    assert!(world.browser.tab_exists(t1));
    assert!(world.browser.tab_exists(t2));
    // The survivor was still focused before the removal attempt.
    assert!(world.browser.tab(t1).unwrap().active);
}

// ============================================================================
// Merging
// ============================================================================

#[tokio::test]
async fn test_scenario_pinned_tab_keeps_window_open() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let w2 = world.browser.add_window(false);
    world.browser.open_tab(w1, "https://a.com/");
    let pinned = world.browser.open_pinned_tab(w2, "https://c.com/");
    let loose = world.browser.open_tab(w2, "https://c.com/");
    world.snapshot();

    let merger = WindowMerger::new(world.api(), world.index.clone());
    let report = merger.merge_all().await.unwrap();

    assert_eq!(report.target, Some(w1));
    assert_eq!(report.moved, 1);
    assert!(report.closed_windows.is_empty());
    assert_eq!(world.browser.window_tab_ids(w2), vec![pinned]);
    assert!(world.browser.window_tab_ids(w1).contains(&loose));
    assert!(!world
        .browser
        .calls()
        .contains(&ApiCall::CloseWindow(w2)));
    world.index.with(|index| {
        assert_eq!(index.get(loose).unwrap().window_id, w1);
        assert_eq!(index.get(pinned).unwrap().window_id, w2);
        index.check_consistency().unwrap();
    });
}

#[tokio::test]
async fn test_pinned_tabs_never_leave_their_window() {
    let world = World::new();
    let w1 = world.browser.add_window(false);
    let w2 = world.browser.add_window(true);
    let w3 = world.browser.add_window(false);
    let p1 = world.browser.open_pinned_tab(w1, "https://p1.com/");
    world.browser.open_tab(w1, "https://x.com/");
    world.browser.open_tab(w2, "https://y.com/");
    let p3 = world.browser.open_pinned_tab(w3, "https://p3.com/");
    let p3b = world.browser.open_pinned_tab(w3, "https://p3b.com/");
    world.snapshot();

    let merger = WindowMerger::new(world.api(), world.index.clone());
    merger.merge_all().await.unwrap();

    assert_eq!(world.browser.tab(p1).unwrap().window_id, w1);
    assert_eq!(world.browser.tab(p3).unwrap().window_id, w3);
    assert_eq!(world.browser.tab(p3b).unwrap().window_id, w3);
    assert_eq!(world.browser.focused_window(), Some(w2));
}

#[tokio::test]
async fn test_merge_tab_closed_mid_merge() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    let w2 = world.browser.add_window(false);
    world.browser.open_tab(w1, "https://a.com/");
    let doomed = world.browser.open_tab(w2, "https://b.com/");
    world.browser.open_tab(w2, "https://c.com/");
    world.snapshot();
    world.browser.vanish_after_gets(doomed, 0);

    let merger = WindowMerger::new(world.api(), world.index.clone());
    let report = merger.merge_all().await.unwrap();
    assert_eq!(report.moved, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(world.browser.windows().len(), 1);
    world.index.with(|index| {
        assert!(!index.contains(doomed));
        index.check_consistency().unwrap();
    });
}

// ============================================================================
// Sorting
// ============================================================================

#[tokio::test]
async fn test_scenario_sort_order() {
    let world = World::new();
    let w1 = world.browser.add_window(true);
    world.browser.open_tab(w1, "https://b.com/x");
    world.browser.open_tab(w1, "https://a.com/y");
    world.browser.open_tab(w1, "https://a.com/z?q=1");

    let sorter = TabSorter::new(world.api(), world.index.clone());
    sorter.sort_window(w1).await.unwrap();
    assert_eq!(
        world.urls(w1),
        vec!["https://a.com/y", "https://a.com/z?q=1", "https://b.com/x"]
    );

    world.browser.clear_calls();
    let again = sorter.sort_window(w1).await.unwrap();
    assert_eq!(again.moves, 0);
}

// ============================================================================
// Whole engine through the coordinator
// ============================================================================

#[tokio::test]
async fn test_engine_session_through_coordinator() {
    let (handle, inbox) = coordinator::channel();
    let sink = handle.clone();
    let browser = Arc::new(InMemoryBrowser::new().with_event_listener(move |event| {
        sink.send_event(event);
    }));
    let w1 = browser.add_window(true);
    let w2 = browser.add_window(false);
    browser.open_tab(w1, "https://b.com/");
    browser.open_tab(w2, "https://a.com/");
    browser.open_tab(w2, "https://b.com/");

    let engine = TabEngine::new(browser.clone(), EngineConfig::default());
    let index = engine.index().clone();
    let join = inbox.spawn(engine);
    assert!(handle.settle().await);

    // Same URL in different windows: nothing closed yet.
    assert_eq!(browser.windows().len(), 2);

    // Merging brings the two b.com tabs together; the attach event for the
    // moved one then closes it as a duplicate.
    handle.send_command(Command::MergeWindows);
    assert!(handle.settle().await);

    let windows = browser.windows();
    assert_eq!(windows.len(), 1);
    let urls: Vec<String> = windows[0].tabs.iter().filter_map(|t| t.url.clone()).collect();
    assert_eq!(urls, vec!["https://a.com/", "https://b.com/"]);
    index.with(|index| {
        assert_eq!(index.len(), 2);
        index.check_consistency().unwrap();
    });

    handle.shutdown();
    join.await.unwrap();
}
