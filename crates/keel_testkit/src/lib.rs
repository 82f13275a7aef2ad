//! # Keel Testkit
//!
//! Test utilities for Keel.
//!
//! This crate provides:
//! - An in-memory [`MemoryAdapter`] with a call log and scripted failures
//! - Shared schemas and a [`TestStore`] helper
//! - Property-based test generators using proptest
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keel_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn finds_a_person() {
//!     let t = TestStore::blog();
//!     t.adapter.insert(payloads::person("1", "Tom"));
//!     let tom = t.find("person", "1").await.unwrap();
//!     assert_eq!(t.attr(tom, "name").unwrap(), "Tom".into());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod fixtures;
pub mod generators;
pub mod logging;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adapter::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
}

pub use adapter::*;
pub use fixtures::*;
pub use generators::*;
pub use logging::*;
