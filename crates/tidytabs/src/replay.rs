//
// replay.rs
//
// Session scripts: an initial set of windows plus a sequence of user actions,
// host events and commands, run against the in-memory browser
//

use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

use crate::browser::{Tab, TabId, TabStatus, Window, WindowId};
use crate::config::EngineConfig;
use crate::coordinator;
use crate::engine::TabEngine;
use crate::events::{Command, RawTabEvent};
use crate::memory_browser::InMemoryBrowser;

/// A tab in a script's starting layout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptTab {
    pub id: i64,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptWindow {
    pub id: i64,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub tabs: Vec<ScriptTab>,
}

impl ScriptWindow {
    fn to_window(&self) -> Window {
        let window_id = WindowId(self.id);
        Window {
            id: window_id,
            focused: self.focused,
            tabs: self
                .tabs
                .iter()
                .enumerate()
                .map(|(index, tab)| Tab {
                    id: TabId(tab.id),
                    window_id,
                    index,
                    url: tab.url.clone(),
                    pending_url: None,
                    pinned: tab.pinned,
                    active: tab.active,
                    status: TabStatus::Complete,
                })
                .collect(),
        }
    }
}

/// One scripted step.
///
/// User actions change the in-memory browser, which reports the resulting
/// lifecycle events itself; `event` steps inject a host event verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Step {
    #[serde(rename_all = "camelCase")]
    OpenTab {
        window_id: i64,
        url: String,
        #[serde(default)]
        pinned: bool,
    },
    #[serde(rename_all = "camelCase")]
    Navigate { tab_id: i64, url: String },
    #[serde(rename_all = "camelCase")]
    CloseTab { tab_id: i64 },
    #[serde(rename_all = "camelCase")]
    OpenWindow {
        #[serde(default)]
        focused: bool,
    },
    Event(RawTabEvent),
    Command(Command),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayScript {
    #[serde(default)]
    pub windows: Vec<ScriptWindow>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Final state after a replay
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub windows: Vec<Window>,
    pub tracked_tabs: usize,
    pub tracked_urls: usize,
}

pub fn load_script(path: &Path) -> anyhow::Result<ReplayScript> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read script {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid script {}", path.display()))
}

pub fn load_settings(path: &Path) -> anyhow::Result<EngineConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid settings {}", path.display()))?;
    Ok(crate::config::parse_engine_config(&value))
}

/// Run a script to completion and report the final browser state.
pub async fn run_script(script: &ReplayScript, config: EngineConfig) -> anyhow::Result<ReplayOutcome> {
    let (handle, inbox) = coordinator::channel();
    let sink = handle.clone();
    let windows = script.windows.iter().map(ScriptWindow::to_window).collect();
    let browser = Arc::new(
        InMemoryBrowser::from_windows(windows).with_event_listener(move |event| {
            sink.send_event(event);
        }),
    );

    let engine = TabEngine::new(browser.clone(), config);
    engine
        .initialize()
        .await
        .map_err(|e| anyhow!("Failed to index initial tabs: {e}"))?;
    let index = engine.index().clone();
    let join = inbox.spawn(engine);

    for (n, step) in script.steps.iter().enumerate() {
        log::debug!("Step {}: {:?}", n + 1, step);
        match step {
            Step::OpenTab {
                window_id,
                url,
                pinned,
            } => {
                if *pinned {
                    browser.open_pinned_tab(WindowId(*window_id), url);
                } else {
                    browser.open_tab(WindowId(*window_id), url);
                }
            }
            Step::Navigate { tab_id, url } => browser.navigate(TabId(*tab_id), url),
            Step::CloseTab { tab_id } => browser.close_tab_externally(TabId(*tab_id)),
            Step::OpenWindow { focused } => {
                browser.add_window(*focused);
            }
            Step::Event(event) => {
                handle.send_raw_event(event);
            }
            Step::Command(command) => {
                handle.send_command(command.clone());
            }
        }
        if !handle.settle().await {
            return Err(anyhow!("Coordinator stopped at step {}", n + 1));
        }
    }

    handle.shutdown();
    join.await.context("Coordinator task failed")?;

    let (tracked_tabs, tracked_urls) = index.with(|index| (index.len(), index.url_count()));
    Ok(ReplayOutcome {
        windows: browser.windows(),
        tracked_tabs,
        tracked_urls,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn script(value: serde_json::Value) -> ReplayScript {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_step_shapes() {
        let s = script(json!({
            "windows": [{ "id": 1, "focused": true, "tabs": [{ "id": 1, "url": "https://a.com/" }] }],
            "steps": [
                { "openTab": { "windowId": 1, "url": "https://b.com/" } },
                { "navigate": { "tabId": 1, "url": "https://c.com/" } },
                { "closeTab": { "tabId": 1 } },
                { "openWindow": {} },
                { "event": { "type": "detached", "tabId": 1, "oldWindowId": 1 } },
                { "command": { "command": "merge-windows" } }
            ]
        }));
        assert_eq!(s.steps.len(), 6);
        assert_eq!(s.steps[5], Step::Command(Command::MergeWindows));
    }

    #[tokio::test]
    async fn test_duplicate_opened_during_replay_is_closed() {
        let s = script(json!({
            "windows": [{ "id": 1, "focused": true, "tabs": [{ "id": 1, "url": "https://a.com/" }] }],
            "steps": [
                { "openTab": { "windowId": 1, "url": "https://b.com/" } },
                { "openTab": { "windowId": 1, "url": "https://a.com/" } }
            ]
        }));
        let outcome = run_script(&s, EngineConfig::default()).await.unwrap();
        let ids: Vec<TabId> = outcome.windows[0].tabs.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![TabId(1), TabId(2)]);
        assert_eq!(outcome.tracked_tabs, 2);
    }

    #[tokio::test]
    async fn test_duplicates_in_initial_layout_wait_for_an_event() {
        let s = script(json!({
            "windows": [{ "id": 1, "focused": true, "tabs": [
                { "id": 1, "url": "https://a.com/" },
                { "id": 2, "url": "https://a.com/" }
            ] }],
            "steps": []
        }));
        let outcome = run_script(&s, EngineConfig::default()).await.unwrap();
        assert_eq!(outcome.windows[0].tabs.len(), 2);
        assert_eq!(outcome.tracked_urls, 1);
    }
}
