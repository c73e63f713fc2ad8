//
// tab_index/mod.rs
//
// Tab URL index and duplicate reconciliation
//

pub mod cache;
pub mod reconcile;


#[cfg(test)]
mod integration_tests;

pub use cache::*;
pub use reconcile::*;
