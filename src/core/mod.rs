//! Normalization and reconciliation of extracted fund fact sheets

pub mod batch;
pub mod category;
pub mod compare;
pub mod config;
pub mod context;
pub mod dates;
pub mod entity;
pub mod error;
pub mod folder;
pub mod log;
pub mod normalize;
pub mod persistence;
pub mod reconcile;
pub mod record;
pub mod scale;
pub mod sheet;
pub mod validation;

// Re-export main types for cleaner imports
pub use error::RecordError;
pub use normalize::{Normalized, Normalizer};
pub use persistence::{FundStore, FundTransaction};
pub use reconcile::{ReconcileDecision, ReconcileOutcome};
