//! Typed clients for the backend's REST endpoints.
//!
//! Each client reads through the shared query cache and invalidates the views
//! its mutations make stale.

pub mod auth;
pub mod chat;
pub mod decay;
pub mod documents;

pub use auth::{AuthApi, AuthFailure, ProfileUpdate};
pub use chat::ChatApi;
pub use decay::{DecayApi, ReportQuery, ReviewStatus, RiskLevel};
pub use documents::{DocumentQuery, DocumentType, DocumentsApi, NewDocument};
