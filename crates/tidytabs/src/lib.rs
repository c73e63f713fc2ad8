//
// lib.rs
//
// Tab URL index, duplicate-tab reconciliation, window merging and tab sorting
//
// The binary in main.rs is a thin CLI over `replay`; benches/ and tests/
// use the modules below directly.
//

pub mod browser;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod events;
pub mod memory_browser;
pub mod merge;
pub mod replay;
pub mod sort;
pub mod tab_index;
pub mod url_normalizer;
