//
// config.rs
//
// Engine configuration and settings parsing
//

/// Tab organizer configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Whether duplicate tabs are closed automatically
    pub dedupe_enabled: bool,
    /// Whether the surviving tab is activated when the closed duplicate was active
    pub focus_survivor: bool,
    /// Whether the target window is sorted after a merge
    pub sort_after_merge: bool,
    /// Whether a merge also closes windows left holding only pinned tabs
    pub close_pinned_only_windows: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedupe_enabled: true,
            focus_survivor: true,
            sort_after_merge: true,
            close_pinned_only_windows: false,
        }
    }
}

/// Build an `EngineConfig` from a JSON settings object.
///
/// Recognized shape (every key optional, missing keys keep their default):
///
/// ```json
/// {
///     "dedupe": { "enabled": true, "focusSurvivor": true },
///     "merge": { "sortAfterMerge": true, "closePinnedOnlyWindows": false }
/// }
/// ```
pub fn parse_engine_config(settings: &serde_json::Value) -> EngineConfig {
    let mut config = EngineConfig::default();

    if let Some(dedupe) = settings.get("dedupe") {
        if let Some(v) = dedupe.get("enabled").and_then(|v| v.as_bool()) {
            config.dedupe_enabled = v;
        }
        if let Some(v) = dedupe.get("focusSurvivor").and_then(|v| v.as_bool()) {
            config.focus_survivor = v;
        }
    }

    if let Some(merge) = settings.get("merge") {
        if let Some(v) = merge.get("sortAfterMerge").and_then(|v| v.as_bool()) {
            config.sort_after_merge = v;
        }
        if let Some(v) = merge
            .get("closePinnedOnlyWindows")
            .and_then(|v| v.as_bool())
        {
            config.close_pinned_only_windows = v;
        }
    }

    log::info!("Engine configuration loaded from settings:");
    log::info!("  dedupe_enabled: {}", config.dedupe_enabled);
    log::info!("  focus_survivor: {}", config.focus_survivor);
    log::info!("  sort_after_merge: {}", config.sort_after_merge);
    log::info!(
        "  close_pinned_only_windows: {}",
        config.close_pinned_only_windows
    );

    config
}
