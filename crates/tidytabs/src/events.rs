//
// events.rs
//
// Lifecycle events and user commands at the host boundary
//
// The host delivers loosely-shaped tab objects (ids may be missing for
// devtools or prerender tabs, most fields are optional). They are normalized
// here, once, into the typed `Tab` and `TabEvent` the engine works with.
//

use serde::{Deserialize, Serialize};

use crate::browser::{Tab, TabId, TabStatus, WindowId};

/// What changed in a tab update
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TabStatus>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveInfo {
    pub window_id: WindowId,
    #[serde(default)]
    pub is_window_closing: bool,
}

/// A normalized tab lifecycle event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TabEvent {
    Created(Tab),
    Updated {
        tab_id: TabId,
        change: ChangeInfo,
        /// Full tab object, when the host supplied a usable one
        tab: Option<Tab>,
    },
    Removed {
        tab_id: TabId,
        info: RemoveInfo,
    },
    Attached {
        tab_id: TabId,
        new_window_id: WindowId,
    },
    Detached {
        tab_id: TabId,
        old_window_id: WindowId,
    },
}

impl TabEvent {
    pub fn tab_id(&self) -> TabId {
        match self {
            TabEvent::Created(tab) => tab.id,
            TabEvent::Updated { tab_id, .. }
            | TabEvent::Removed { tab_id, .. }
            | TabEvent::Attached { tab_id, .. }
            | TabEvent::Detached { tab_id, .. } => *tab_id,
        }
    }
}

/// A tab object as the host reports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTab {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub window_id: Option<i64>,
    #[serde(default)]
    pub index: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pending_url: Option<String>,
    #[serde(default)]
    pub pinned: Option<bool>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub status: Option<TabStatus>,
}

impl RawTab {
    /// Convert to a typed tab. Tabs without an id or window cannot be tracked.
    pub fn normalize(&self) -> Option<Tab> {
        let id = self.id?;
        let window_id = self.window_id?;
        Some(Tab {
            id: TabId(id),
            window_id: WindowId(window_id),
            index: self.index.unwrap_or(0),
            url: self.url.clone().filter(|u| !u.is_empty()),
            pending_url: self.pending_url.clone().filter(|u| !u.is_empty()),
            pinned: self.pinned.unwrap_or(false),
            active: self.active.unwrap_or(false),
            status: self.status.unwrap_or_default(),
        })
    }
}

/// A lifecycle event as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RawTabEvent {
    #[serde(rename_all = "camelCase")]
    Created { tab: RawTab },
    #[serde(rename_all = "camelCase")]
    Updated {
        tab_id: i64,
        #[serde(default)]
        change_info: ChangeInfo,
        #[serde(default)]
        tab: Option<RawTab>,
    },
    #[serde(rename_all = "camelCase")]
    Removed {
        tab_id: i64,
        remove_info: RemoveInfo,
    },
    #[serde(rename_all = "camelCase")]
    Attached { tab_id: i64, new_window_id: i64 },
    #[serde(rename_all = "camelCase")]
    Detached { tab_id: i64, old_window_id: i64 },
}

impl RawTabEvent {
    /// Normalize into a typed event; `None` when the event can't concern a trackable tab.
    pub fn normalize(&self) -> Option<TabEvent> {
        let event = match self {
            RawTabEvent::Created { tab } => TabEvent::Created(tab.normalize()?),
            RawTabEvent::Updated {
                tab_id,
                change_info,
                tab,
            } => TabEvent::Updated {
                tab_id: TabId(*tab_id),
                change: change_info.clone(),
                tab: tab
                    .as_ref()
                    .and_then(RawTab::normalize)
                    .filter(|t| t.id == TabId(*tab_id)),
            },
            RawTabEvent::Removed {
                tab_id,
                remove_info,
            } => TabEvent::Removed {
                tab_id: TabId(*tab_id),
                info: *remove_info,
            },
            RawTabEvent::Attached {
                tab_id,
                new_window_id,
            } => TabEvent::Attached {
                tab_id: TabId(*tab_id),
                new_window_id: WindowId(*new_window_id),
            },
            RawTabEvent::Detached {
                tab_id,
                old_window_id,
            } => TabEvent::Detached {
                tab_id: TabId(*tab_id),
                old_window_id: WindowId(*old_window_id),
            },
        };
        Some(event)
    }
}

/// Mouse-gesture actions the engine can carry out with the tab API
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureAction {
    /// Open a new active tab right after the originating tab
    NewTab,
    /// Close the originating tab
    CloseTab,
}

impl GestureAction {
    /// Decode a gesture direction code (`U`, `D`, ...).
    ///
    /// Back/forward gestures (`L`, `R`) need history navigation, which the
    /// tab API here does not offer, so they decode to `None`.
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "U" => Some(GestureAction::NewTab),
            "D" => Some(GestureAction::CloseTab),
            _ => None,
        }
    }
}

/// User-initiated commands (keyboard shortcut, toolbar icon, gesture)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "kebab-case")]
pub enum Command {
    /// Sort the tabs of the focused window
    SortTabs,
    /// Merge every normal window into the focused one
    MergeWindows,
    #[serde(rename_all = "camelCase")]
    Gesture { gesture: String, tab_id: TabId },
}
