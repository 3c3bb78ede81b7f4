//! # BlockVault
//!
//! A content-addressable block store:
//! - Fixed-size blocks addressed by the SHA-1 of their padded contents
//! - Blocks sharded into bucket files by address prefix
//! - Per-bucket free lists with high-water compaction
//! - Two-generation shadow-copy metadata commit for crash consistency
//! - TCP-based client protocol with pluggable authorization
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      TCP Server                              │
//! │              (Acceptor + Worker Pool)                        │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │              Service (Authorizer → Backend)                  │
//! │       (Engine, or Verify / Limit / Layered / Union)          │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Engine                                 │
//! │            (Single Writer / Multi Reader)                    │
//! └──────┬───────────────────┬───────────────────┬──────────────┘
//!        │                   │                   │
//!        ▼                   ▼                   ▼
//!  ┌───────────┐      ┌─────────────┐     ┌─────────────┐
//!  │   Index   │      │  Metadata   │     │ Block Files │
//!  │ (RwLock)  │      │ (2 copies)  │     │ (per bucket)│
//!  └───────────┘      └─────────────┘     └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod address;
pub mod auth;
pub mod backend;
pub mod blockfile;
pub mod bucket;
pub mod engine;
pub mod index;
pub mod meta;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use address::{Address, Block};
pub use config::Config;
pub use engine::Engine;
pub use error::{Result, VaultError};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of BlockVault
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
