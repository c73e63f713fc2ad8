//
// memory_browser.rs
//
// Deterministic in-memory tab/window model implementing `BrowserApi`
//
// Used by the replay command and by tests. It records every API call,
// can report lifecycle events the way a real browser would, and can be
// told to make tabs vanish or fail so races can be reproduced on demand.
//

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::browser::{
    ApiResult, BrowserApi, CreateProperties, MoveProperties, MovePosition, Tab, TabApiError,
    TabId, TabQuery, TabStatus, Window, WindowId,
};
use crate::events::{ChangeInfo, RemoveInfo, TabEvent};
use crate::url_normalizer::NEW_TAB_URL;

/// One recorded call into the API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiCall {
    GetTab(TabId),
    QueryTabs(Option<WindowId>),
    RemoveTab(TabId),
    MoveTab {
        tab_id: TabId,
        position: MovePosition,
        window_id: Option<WindowId>,
    },
    SetTabActive(TabId),
    CreateTab(CreateProperties),
    GetAllWindows,
    GetCurrentWindow,
    CloseWindow(WindowId),
    FocusWindow(WindowId),
}

impl ApiCall {
    /// True for calls that change browser state.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            ApiCall::RemoveTab(_)
                | ApiCall::MoveTab { .. }
                | ApiCall::SetTabActive(_)
                | ApiCall::CreateTab(_)
                | ApiCall::CloseWindow(_)
                | ApiCall::FocusWindow(_)
        )
    }
}

#[derive(Debug, Clone)]
struct TabRecord {
    id: TabId,
    url: Option<String>,
    pending_url: Option<String>,
    pinned: bool,
    active: bool,
    status: TabStatus,
}

impl TabRecord {
    fn to_tab(&self, window_id: WindowId, index: usize) -> Tab {
        Tab {
            id: self.id,
            window_id,
            index,
            url: self.url.clone(),
            pending_url: self.pending_url.clone(),
            pinned: self.pinned,
            active: self.active,
            status: self.status,
        }
    }
}

#[derive(Debug, Default)]
struct BrowserState {
    windows: IndexMap<WindowId, Vec<TabRecord>>,
    focused: Option<WindowId>,
    last_tab_id: i64,
    last_window_id: i64,
    calls: Vec<ApiCall>,
    /// Remaining successful `get_tab` lookups before the tab disappears
    vanish_after_gets: HashMap<TabId, usize>,
    /// Tabs whose move/remove/activate calls fail with a transient error
    transient_failures: HashSet<TabId>,
}

impl BrowserState {
    fn locate(&self, tab_id: TabId) -> Option<(WindowId, usize)> {
        self.windows.iter().find_map(|(window_id, tabs)| {
            tabs.iter()
                .position(|t| t.id == tab_id)
                .map(|index| (*window_id, index))
        })
    }

    fn tab(&self, tab_id: TabId) -> Option<Tab> {
        let (window_id, index) = self.locate(tab_id)?;
        self.windows
            .get(&window_id)
            .map(|tabs| tabs[index].to_tab(window_id, index))
    }

    fn window(&self, window_id: WindowId, populate: bool) -> Option<Window> {
        let tabs = self.windows.get(&window_id)?;
        Some(Window {
            id: window_id,
            focused: self.focused == Some(window_id),
            tabs: if populate {
                tabs.iter()
                    .enumerate()
                    .map(|(index, t)| t.to_tab(window_id, index))
                    .collect()
            } else {
                Vec::new()
            },
        })
    }

    fn current_window_id(&self) -> Option<WindowId> {
        self.focused
            .filter(|id| self.windows.contains_key(id))
            .or_else(|| self.windows.keys().next().copied())
    }

    /// Remove a tab, closing its window when it was the last one.
    fn take_tab(&mut self, tab_id: TabId, events: &mut Vec<TabEvent>) -> Option<TabRecord> {
        let (window_id, index) = self.locate(tab_id)?;
        let tabs = self.windows.get_mut(&window_id)?;
        let record = tabs.remove(index);
        let window_closing = tabs.is_empty();
        events.push(TabEvent::Removed {
            tab_id,
            info: RemoveInfo {
                window_id,
                is_window_closing: window_closing,
            },
        });
        if window_closing {
            self.drop_window(window_id);
        }
        Some(record)
    }

    fn drop_window(&mut self, window_id: WindowId) {
        self.windows.shift_remove(&window_id);
        if self.focused == Some(window_id) {
            self.focused = self.windows.keys().next().copied();
        }
    }

    fn check_transient(&self, tab_id: TabId) -> ApiResult<()> {
        if self.transient_failures.contains(&tab_id) {
            return Err(TabApiError::Transient(format!(
                "simulated failure for tab {tab_id}"
            )));
        }
        Ok(())
    }
}

type EventListener = Box<dyn Fn(TabEvent) + Send + Sync>;

/// In-memory browser with normal windows only.
#[derive(Default)]
pub struct InMemoryBrowser {
    state: Mutex<BrowserState>,
    listener: Option<EventListener>,
    /// Yield to the scheduler at the start of every API call
    yielding: bool,
}

impl std::fmt::Debug for InMemoryBrowser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBrowser").finish_non_exhaustive()
    }
}

impl InMemoryBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a browser from a list of windows; tab indices are taken from list order.
    pub fn from_windows(windows: Vec<Window>) -> Self {
        let browser = Self::new();
        {
            let mut state = browser.lock();
            for window in windows {
                if window.focused {
                    state.focused = Some(window.id);
                }
                state.last_window_id = state.last_window_id.max(window.id.0);
                let records = window
                    .tabs
                    .into_iter()
                    .map(|tab| {
                        state.last_tab_id = state.last_tab_id.max(tab.id.0);
                        TabRecord {
                            id: tab.id,
                            url: tab.url,
                            pending_url: tab.pending_url,
                            pinned: tab.pinned,
                            active: tab.active,
                            status: tab.status,
                        }
                    })
                    .collect();
                state.windows.insert(window.id, records);
            }
            if state.focused.is_none() {
                state.focused = state.windows.keys().next().copied();
            }
        }
        browser
    }

    /// Report lifecycle events (tab created, removed, moved, navigated) to `listener`.
    pub fn with_event_listener(mut self, listener: impl Fn(TabEvent) + Send + Sync + 'static) -> Self {
        self.listener = Some(Box::new(listener));
        self
    }

    /// Suspend at the start of every API call, as a real browser round trip
    /// would, so concurrent callers interleave.
    pub fn with_yielding(mut self) -> Self {
        self.yielding = true;
        self
    }

    pub fn add_window(&self, focused: bool) -> WindowId {
        let mut state = self.lock();
        state.last_window_id += 1;
        let window_id = WindowId(state.last_window_id);
        state.windows.insert(window_id, Vec::new());
        if focused || state.focused.is_none() {
            state.focused = Some(window_id);
        }
        window_id
    }

    /// Open a loaded tab at the end of `window_id` (as the user would).
    pub fn open_tab(&self, window_id: WindowId, url: &str) -> TabId {
        self.open_tab_with(window_id, url, false)
    }

    pub fn open_pinned_tab(&self, window_id: WindowId, url: &str) -> TabId {
        self.open_tab_with(window_id, url, true)
    }

    fn open_tab_with(&self, window_id: WindowId, url: &str, pinned: bool) -> TabId {
        let mut events = Vec::new();
        let tab_id = {
            let mut state = self.lock();
            state.last_tab_id += 1;
            let tab_id = TabId(state.last_tab_id);
            let record = TabRecord {
                id: tab_id,
                url: Some(url.to_string()),
                pending_url: None,
                pinned,
                active: false,
                status: TabStatus::Complete,
            };
            let tabs = state.windows.entry(window_id).or_default();
            tabs.push(record);
            if let Some(tab) = state.tab(tab_id) {
                events.push(TabEvent::Created(tab.clone()));
                events.push(TabEvent::Updated {
                    tab_id,
                    change: ChangeInfo {
                        url: Some(url.to_string()),
                        status: Some(TabStatus::Complete),
                    },
                    tab: Some(tab),
                });
            }
            tab_id
        };
        self.emit(events);
        tab_id
    }

    /// Navigate a tab to `url` and finish loading it.
    pub fn navigate(&self, tab_id: TabId, url: &str) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            let Some((window_id, index)) = state.locate(tab_id) else {
                return;
            };
            if let Some(record) = state.windows.get_mut(&window_id).map(|tabs| &mut tabs[index]) {
                record.url = Some(url.to_string());
                record.pending_url = None;
                record.status = TabStatus::Complete;
            }
            if let Some(tab) = state.tab(tab_id) {
                events.push(TabEvent::Updated {
                    tab_id,
                    change: ChangeInfo {
                        url: Some(url.to_string()),
                        status: Some(TabStatus::Complete),
                    },
                    tab: Some(tab),
                });
            }
        }
        self.emit(events);
    }

    /// Close a tab outside of the engine (the user clicked its close button).
    pub fn close_tab_externally(&self, tab_id: TabId) {
        let mut events = Vec::new();
        {
            let mut state = self.lock();
            state.take_tab(tab_id, &mut events);
        }
        self.emit(events);
    }

    pub fn set_pinned(&self, tab_id: TabId, pinned: bool) {
        let mut state = self.lock();
        if let Some((window_id, index)) = state.locate(tab_id) {
            if let Some(tabs) = state.windows.get_mut(&window_id) {
                tabs[index].pinned = pinned;
            }
        }
    }

    pub fn set_active_externally(&self, tab_id: TabId) {
        let mut state = self.lock();
        Self::activate(&mut state, tab_id);
    }

    /// Let `get_tab(tab_id)` succeed `lookups` more times, then close the tab.
    pub fn vanish_after_gets(&self, tab_id: TabId, lookups: usize) {
        self.lock().vanish_after_gets.insert(tab_id, lookups);
    }

    /// Make mutating calls on `tab_id` fail with a transient error.
    pub fn fail_transiently(&self, tab_id: TabId) {
        self.lock().transient_failures.insert(tab_id);
    }

    pub fn clear_transient_failures(&self) {
        self.lock().transient_failures.clear();
    }

    pub fn tab_exists(&self, tab_id: TabId) -> bool {
        self.lock().locate(tab_id).is_some()
    }

    pub fn tab(&self, tab_id: TabId) -> Option<Tab> {
        self.lock().tab(tab_id)
    }

    /// Current windows with their tabs, in creation order.
    pub fn windows(&self) -> Vec<Window> {
        let state = self.lock();
        state
            .windows
            .keys()
            .filter_map(|id| state.window(*id, true))
            .collect()
    }

    pub fn window_tab_ids(&self, window_id: WindowId) -> Vec<TabId> {
        self.lock()
            .windows
            .get(&window_id)
            .map(|tabs| tabs.iter().map(|t| t.id).collect())
            .unwrap_or_default()
    }

    pub fn focused_window(&self) -> Option<WindowId> {
        self.lock().focused
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.lock().calls.clone()
    }

    pub fn mutating_calls(&self) -> Vec<ApiCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.is_mutating())
            .cloned()
            .collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn activate(state: &mut BrowserState, tab_id: TabId) -> bool {
        let Some((window_id, _)) = state.locate(tab_id) else {
            return false;
        };
        if let Some(tabs) = state.windows.get_mut(&window_id) {
            for tab in tabs.iter_mut() {
                tab.active = tab.id == tab_id;
            }
        }
        true
    }

    fn lock(&self) -> MutexGuard<'_, BrowserState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, call: ApiCall) -> MutexGuard<'_, BrowserState> {
        let mut state = self.lock();
        state.calls.push(call);
        state
    }

    async fn pause(&self) {
        if self.yielding {
            tokio::task::yield_now().await;
        }
    }

    fn emit(&self, events: Vec<TabEvent>) {
        if let Some(listener) = &self.listener {
            for event in events {
                listener(event);
            }
        }
    }
}

#[async_trait]
impl BrowserApi for InMemoryBrowser {
    async fn get_tab(&self, tab_id: TabId) -> ApiResult<Tab> {
        self.pause().await;
        let mut events = Vec::new();
        let result = {
            let mut state = self.record(ApiCall::GetTab(tab_id));
            match state.vanish_after_gets.get(&tab_id).copied() {
                Some(0) => {
                    state.vanish_after_gets.remove(&tab_id);
                    state.take_tab(tab_id, &mut events);
                }
                Some(remaining) => {
                    state.vanish_after_gets.insert(tab_id, remaining - 1);
                }
                None => {}
            }
            state.tab(tab_id).ok_or(TabApiError::TabNotFound(tab_id))
        };
        self.emit(events);
        result
    }

    async fn query_tabs(&self, query: TabQuery) -> ApiResult<Vec<Tab>> {
        self.pause().await;
        let state = self.record(ApiCall::QueryTabs(query.window_id));
        if let Some(window_id) = query.window_id {
            let window = state
                .window(window_id, true)
                .ok_or(TabApiError::WindowNotFound(window_id))?;
            return Ok(window.tabs);
        }
        Ok(state
            .windows
            .keys()
            .filter_map(|id| state.window(*id, true))
            .flat_map(|w| w.tabs)
            .collect())
    }

    async fn remove_tab(&self, tab_id: TabId) -> ApiResult<()> {
        self.pause().await;
        let mut events = Vec::new();
        let result = {
            let mut state = self.record(ApiCall::RemoveTab(tab_id));
            state.check_transient(tab_id).and_then(|_| {
                state
                    .take_tab(tab_id, &mut events)
                    .map(|_| ())
                    .ok_or(TabApiError::TabNotFound(tab_id))
            })
        };
        self.emit(events);
        result
    }

    async fn move_tab(&self, tab_id: TabId, props: MoveProperties) -> ApiResult<Tab> {
        self.pause().await;
        let mut events = Vec::new();
        let result = {
            let mut state = self.record(ApiCall::MoveTab {
                tab_id,
                position: props.position,
                window_id: props.window_id,
            });
            Self::apply_move(&mut state, tab_id, props, &mut events)
        };
        self.emit(events);
        result
    }

    async fn set_tab_active(&self, tab_id: TabId) -> ApiResult<()> {
        self.pause().await;
        let mut state = self.record(ApiCall::SetTabActive(tab_id));
        state.check_transient(tab_id)?;
        if Self::activate(&mut state, tab_id) {
            Ok(())
        } else {
            Err(TabApiError::TabNotFound(tab_id))
        }
    }

    async fn create_tab(&self, props: CreateProperties) -> ApiResult<Tab> {
        self.pause().await;
        let mut events = Vec::new();
        let result = {
            let mut state = self.record(ApiCall::CreateTab(props));
            let window_id = state
                .current_window_id()
                .ok_or_else(|| TabApiError::Transient("no window to open a tab in".into()))?;
            state.last_tab_id += 1;
            let tab_id = TabId(state.last_tab_id);
            let record = TabRecord {
                id: tab_id,
                url: Some(NEW_TAB_URL.to_string()),
                pending_url: None,
                pinned: false,
                active: false,
                status: TabStatus::Complete,
            };
            if let Some(tabs) = state.windows.get_mut(&window_id) {
                let index = props.index.unwrap_or(tabs.len()).min(tabs.len());
                tabs.insert(index, record);
            }
            if props.active {
                Self::activate(&mut state, tab_id);
            }
            let tab = state
                .tab(tab_id)
                .ok_or(TabApiError::TabNotFound(tab_id))?;
            events.push(TabEvent::Created(tab.clone()));
            Ok(tab)
        };
        self.emit(events);
        result
    }

    async fn get_all_windows(&self, populate_tabs: bool) -> ApiResult<Vec<Window>> {
        self.pause().await;
        let state = self.record(ApiCall::GetAllWindows);
        Ok(state
            .windows
            .keys()
            .filter_map(|id| state.window(*id, populate_tabs))
            .collect())
    }

    async fn get_current_window(&self) -> ApiResult<Window> {
        self.pause().await;
        let state = self.record(ApiCall::GetCurrentWindow);
        state
            .current_window_id()
            .and_then(|id| state.window(id, true))
            .ok_or_else(|| TabApiError::Transient("no current window".into()))
    }

    async fn close_window(&self, window_id: WindowId) -> ApiResult<()> {
        self.pause().await;
        let mut events = Vec::new();
        let result = {
            let mut state = self.record(ApiCall::CloseWindow(window_id));
            match state.windows.get(&window_id) {
                Some(tabs) => {
                    for tab in tabs {
                        events.push(TabEvent::Removed {
                            tab_id: tab.id,
                            info: RemoveInfo {
                                window_id,
                                is_window_closing: true,
                            },
                        });
                    }
                    state.drop_window(window_id);
                    Ok(())
                }
                None => Err(TabApiError::WindowNotFound(window_id)),
            }
        };
        self.emit(events);
        result
    }

    async fn focus_window(&self, window_id: WindowId) -> ApiResult<()> {
        self.pause().await;
        let mut state = self.record(ApiCall::FocusWindow(window_id));
        if !state.windows.contains_key(&window_id) {
            return Err(TabApiError::WindowNotFound(window_id));
        }
        state.focused = Some(window_id);
        Ok(())
    }
}

impl InMemoryBrowser {
    fn apply_move(
        state: &mut BrowserState,
        tab_id: TabId,
        props: MoveProperties,
        events: &mut Vec<TabEvent>,
    ) -> ApiResult<Tab> {
        state.check_transient(tab_id)?;
        let (source, index) = state
            .locate(tab_id)
            .ok_or(TabApiError::TabNotFound(tab_id))?;
        let target = props.window_id.unwrap_or(source);
        if !state.windows.contains_key(&target) {
            return Err(TabApiError::WindowNotFound(target));
        }

        let mut record = match state.windows.get_mut(&source) {
            Some(tabs) => tabs.remove(index),
            None => return Err(TabApiError::TabNotFound(tab_id)),
        };
        let crossing = source != target;
        if crossing {
            record.active = false;
        }

        if let Some(tabs) = state.windows.get_mut(&target) {
            let at = match props.position {
                MovePosition::Index(i) => i.min(tabs.len()),
                MovePosition::End => tabs.len(),
            };
            tabs.insert(at, record);
        }

        if crossing {
            events.push(TabEvent::Detached {
                tab_id,
                old_window_id: source,
            });
            events.push(TabEvent::Attached {
                tab_id,
                new_window_id: target,
            });
            if state.windows.get(&source).is_some_and(|tabs| tabs.is_empty()) {
                state.drop_window(source);
            }
        }

        state.tab(tab_id).ok_or(TabApiError::TabNotFound(tab_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_open_and_get_tab() {
        let browser = InMemoryBrowser::new();
        let w = browser.add_window(true);
        let t = browser.open_tab(w, "https://a.com/");

        let tab = browser.get_tab(t).await.unwrap();
        assert_eq!(tab.window_id, w);
        assert_eq!(tab.index, 0);
        assert_eq!(tab.url.as_deref(), Some("https://a.com/"));
        assert_eq!(browser.calls(), vec![ApiCall::GetTab(t)]);
    }

    #[tokio::test]
    async fn test_remove_last_tab_closes_window() {
        let browser = InMemoryBrowser::new();
        let w1 = browser.add_window(true);
        let w2 = browser.add_window(false);
        let t = browser.open_tab(w2, "https://a.com/");
        browser.open_tab(w1, "https://b.com/");

        browser.remove_tab(t).await.unwrap();
        assert_eq!(browser.windows().len(), 1);
        assert_eq!(
            browser.remove_tab(t).await,
            Err(TabApiError::TabNotFound(t))
        );
    }

    #[tokio::test]
    async fn test_move_within_and_across_windows() {
        let browser = InMemoryBrowser::new();
        let w1 = browser.add_window(true);
        let w2 = browser.add_window(false);
        let a = browser.open_tab(w1, "https://a.com/");
        let b = browser.open_tab(w1, "https://b.com/");
        let c = browser.open_tab(w2, "https://c.com/");
        let d = browser.open_tab(w2, "https://d.com/");

        let moved = browser.move_tab(b, MoveProperties::to_index(0)).await.unwrap();
        assert_eq!(moved.index, 0);
        assert_eq!(browser.window_tab_ids(w1), vec![b, a]);

        let moved = browser
            .move_tab(c, MoveProperties::to_window_end(w1))
            .await
            .unwrap();
        assert_eq!(moved.window_id, w1);
        assert_eq!(browser.window_tab_ids(w1), vec![b, a, c]);
        assert_eq!(browser.window_tab_ids(w2), vec![d]);

        assert_eq!(
            browser
                .move_tab(d, MoveProperties::to_window_end(WindowId(99)))
                .await,
            Err(TabApiError::WindowNotFound(WindowId(99)))
        );
    }

    #[tokio::test]
    async fn test_vanish_after_gets() {
        let browser = InMemoryBrowser::new();
        let w = browser.add_window(true);
        let t = browser.open_tab(w, "https://a.com/");
        browser.open_tab(w, "https://b.com/");
        browser.vanish_after_gets(t, 1);

        assert!(browser.get_tab(t).await.is_ok());
        assert_eq!(browser.get_tab(t).await, Err(TabApiError::TabNotFound(t)));
        assert!(!browser.tab_exists(t));
    }

    #[tokio::test]
    async fn test_transient_failure() {
        let browser = InMemoryBrowser::new();
        let w = browser.add_window(true);
        let t = browser.open_tab(w, "https://a.com/");
        browser.fail_transiently(t);

        assert!(matches!(
            browser.remove_tab(t).await,
            Err(TabApiError::Transient(_))
        ));
        assert!(browser.tab_exists(t));
    }

    #[tokio::test]
    async fn test_events_are_reported() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let browser = InMemoryBrowser::new().with_event_listener(move |event| {
            sink.lock().unwrap().push(event);
        });
        let w = browser.add_window(true);
        let t = browser.open_tab(w, "https://a.com/");
        browser.remove_tab(t).await.unwrap();

        let seen = seen.lock().unwrap();
        assert!(matches!(seen[0], TabEvent::Created(_)));
        assert!(matches!(seen[1], TabEvent::Updated { .. }));
        assert!(matches!(
            seen[2],
            TabEvent::Removed {
                info: RemoveInfo {
                    is_window_closing: true,
                    ..
                },
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_create_tab_after_index() {
        let browser = InMemoryBrowser::new();
        let w = browser.add_window(true);
        let a = browser.open_tab(w, "https://a.com/");
        let b = browser.open_tab(w, "https://b.com/");

        let created = browser
            .create_tab(CreateProperties {
                index: Some(1),
                opener_tab_id: Some(a),
                active: true,
            })
            .await
            .unwrap();
        assert_eq!(browser.window_tab_ids(w), vec![a, created.id, b]);
        assert!(browser.tab(created.id).unwrap().active);
    }

    #[test]
    fn test_from_windows_keeps_ids() {
        let browser = InMemoryBrowser::from_windows(vec![Window {
            id: WindowId(5),
            focused: true,
            tabs: vec![Tab {
                id: TabId(40),
                window_id: WindowId(5),
                index: 0,
                url: Some("https://a.com/".into()),
                pending_url: None,
                pinned: false,
                active: true,
                status: TabStatus::Complete,
            }],
        }]);
        assert_eq!(browser.focused_window(), Some(WindowId(5)));
        assert_eq!(browser.window_tab_ids(WindowId(5)), vec![TabId(40)]);
        let w = browser.add_window(false);
        assert_eq!(w, WindowId(6));
    }
}
