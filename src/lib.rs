//! Async client for the InsightOps knowledge platform: persistent session with
//! transparent token refresh, cached REST views, and the chat transcript engine.

// Interdiction stricte de pratiques dangereuses ou non idiomatiques
#![deny(unsafe_code)] // Le code unsafe est interdit
#![warn(missing_docs)] // Toute API publique doit être documentée
#![deny(unused_must_use)] // Oblige à gérer explicitement les Result et Option
#![deny(nonstandard_style)]
#![forbid(unsafe_op_in_unsafe_fn)]
// Clippy pour stricte discipline
#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![deny(clippy::nursery)]
#![deny(clippy::unwrap_used)] // Interdit unwrap()
#![deny(clippy::expect_used)] // Interdit expect()
#![deny(clippy::panic)] // Interdit panic!()
#![deny(clippy::print_stdout)] // La sortie console reste dans le binaire
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::redundant_clone)]
#![deny(clippy::cognitive_complexity)]
#![allow(clippy::module_name_repetitions)]
#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::too_many_lines,
        clippy::float_cmp
    )
)]

/// Typed REST endpoint clients.
pub mod api;
/// TTL cache of server views.
pub mod cache;
/// Chat data model, transcript and engine.
pub mod chat;
/// Client configuration.
pub mod config;
/// Error types.
pub mod error;
/// Transport and session-aware request pipeline.
pub mod http;
/// Session state, persistence and OAuth callback decoding.
pub mod session;
/// Entry helpers for front ends.
pub mod start;
/// Form validation.
pub mod validation;

pub use config::ClientConfig;
pub use error::{ApiError, ApiResult};
pub use start::App;
