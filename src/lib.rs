//! Library browser engine
//!
//! Incremental paging, a virtualized card grid, background prefetch,
//! view-state persistence and keyboard navigation for browsing a media
//! server's libraries. The desktop shell in `main.rs` is one driver of
//! `session::Session`; everything here runs without a window.

pub mod api;
pub mod blurhash;
pub mod clock;
pub mod config;
pub mod error;
pub mod grid;
pub mod models;
pub mod nav;
pub mod paging;
pub mod posters;
pub mod prefetch;
pub mod router;
pub mod scheduler;
pub mod sentinel;
pub mod session;
pub mod storage;

#[cfg(test)]
mod testing;
