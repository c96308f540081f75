//! LeadShip delivery pipeline.
//!
//! Turns pending delivery jobs into CSV exports and hands them to buyers by
//! email or HTTP upload, retrying transient failures and recording every
//! attempt.
//!
//! ## Architecture
//!
//! ```text
//! JobStore ─→ Pipeline ─→ decode payload ─→ render CSV ─→ Dispatcher ─┬─ email (SuppressionGate, provider)
//!    ↑                                                                └─ api (buyer endpoint)
//!    └──────── JobStateManager ←── classify outcome ←─────────────────────┘
//! ```

pub mod classify;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod payload;
pub mod pipeline;
pub mod provider;
pub mod render;
pub mod state;
pub mod store;
pub mod suppression;

// Re-export commonly used types
pub use config::Config;
pub use error::{DeliveryError, StoreError};
pub use model::{DeliveryJob, DeliveryMethod, HistoryEntry, HistoryStatus, JobScope, JobStatus};
pub use payload::{decode_payload, DecodedPayload, ExportSchema};
pub use pipeline::{InvocationReport, Pipeline, PipelineSettings};
pub use suppression::{SuppressionGate, SuppressionReason};
