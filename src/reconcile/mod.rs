pub mod engine;

pub use engine::{ReconcileSummary, ReconciliationEngine};
