//! # mirrordb Testkit
//!
//! Test utilities for mirrordb.
//!
//! This crate provides:
//! - Builders that write exports in the on-disk fetch layout
//! - Temporary mirror workspaces and canonical sync targets
//! - Scripted fetchers and artifact generators for failure paths
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use mirrordb_testkit::prelude::*;
//!
//! #[test]
//! fn first_sync() {
//!     with_workspace(|ws| {
//!         let pipeline = ws.pipeline(Arc::new(ExportFetcher::new()));
//!         let outcome = pipeline.run_sync(&efs_target(), &NullProgress);
//!         assert!(outcome.is_success());
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod export;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::export::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use export::*;
pub use fixtures::*;
pub use generators::*;
