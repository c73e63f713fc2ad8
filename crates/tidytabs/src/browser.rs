//
// browser.rs
//
// Typed browser objects and the outbound tab/window API
//
// Every method on `BrowserApi` is a suspension point: other lifecycle events
// may be processed before the call settles, and the tab or window it targets
// may be gone by the time it runs.
//

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Browser-assigned tab identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Browser-assigned window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub i64);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Loading state reported for a tab
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Unloaded,
    Loading,
    #[default]
    Complete,
}

/// A tab as reported by the browser, after normalization at the adapter edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: TabId,
    pub window_id: WindowId,
    /// Position of the tab within its window
    pub index: usize,
    /// Committed URL, if the browser reported one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// URL the tab is navigating to but has not committed yet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_url: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub status: TabStatus,
}

/// A normal browser window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Window {
    pub id: WindowId,
    #[serde(default)]
    pub focused: bool,
    /// Tabs in index order. Empty unless the window was fetched with `populate`.
    #[serde(default)]
    pub tabs: Vec<Tab>,
}

impl Window {
    /// True when the window has no tab that a merge could have moved out.
    pub fn is_empty_or_pinned_only(&self) -> bool {
        self.tabs.iter().all(|tab| tab.pinned)
    }
}

/// Filter for `BrowserApi::query_tabs`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TabQuery {
    /// Restrict to one window; `None` means every normal window
    pub window_id: Option<WindowId>,
}

impl TabQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn in_window(window_id: WindowId) -> Self {
        Self {
            window_id: Some(window_id),
        }
    }
}

/// Where a moved tab should land
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePosition {
    Index(usize),
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveProperties {
    pub position: MovePosition,
    /// Destination window; `None` keeps the tab in its current window
    pub window_id: Option<WindowId>,
}

impl MoveProperties {
    pub fn to_index(index: usize) -> Self {
        Self {
            position: MovePosition::Index(index),
            window_id: None,
        }
    }

    pub fn to_window_end(window_id: WindowId) -> Self {
        Self {
            position: MovePosition::End,
            window_id: Some(window_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateProperties {
    pub index: Option<usize>,
    pub opener_tab_id: Option<TabId>,
    pub active: bool,
}

/// Failure taxonomy for the tab/window API.
///
/// The not-found variants are the normal outcome of acting on a tab or window
/// that closed while a call was in flight.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TabApiError {
    #[error("no tab with id {0}")]
    TabNotFound(TabId),
    #[error("no window with id {0}")]
    WindowNotFound(WindowId),
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("tab api error: {0}")]
    Transient(String),
}

impl TabApiError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            TabApiError::TabNotFound(_) | TabApiError::WindowNotFound(_)
        )
    }
}

pub type ApiResult<T> = Result<T, TabApiError>;

/// Outbound tab/window operations.
///
/// Implementations only ever report normal windows; popup and devtools
/// windows are invisible to the engine.
#[async_trait]
pub trait BrowserApi: Send + Sync {
    async fn get_tab(&self, tab_id: TabId) -> ApiResult<Tab>;

    async fn query_tabs(&self, query: TabQuery) -> ApiResult<Vec<Tab>>;

    async fn remove_tab(&self, tab_id: TabId) -> ApiResult<()>;

    async fn move_tab(&self, tab_id: TabId, props: MoveProperties) -> ApiResult<Tab>;

    async fn set_tab_active(&self, tab_id: TabId) -> ApiResult<()>;

    async fn create_tab(&self, props: CreateProperties) -> ApiResult<Tab>;

    async fn get_all_windows(&self, populate_tabs: bool) -> ApiResult<Vec<Window>>;

    async fn get_current_window(&self) -> ApiResult<Window>;

    async fn close_window(&self, window_id: WindowId) -> ApiResult<()>;

    async fn focus_window(&self, window_id: WindowId) -> ApiResult<()>;
}
