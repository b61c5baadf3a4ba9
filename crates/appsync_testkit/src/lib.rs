//! # AppSync Testkit
//!
//! Test utilities for AppSync storage engines.
//!
//! This crate provides:
//! - Fixtures that build every engine with authentication and a logged-in user
//! - A conformance suite every [`StorageEngine`](appsync_storage::StorageEngine) must pass
//! - Property-based test generators using proptest
//! - Fault-injecting collaborators for the cache and the document store
//!
//! ## Usage
//!
//! ```rust,ignore
//! use appsync_testkit::prelude::*;
//!
//! #[test]
//! fn relational_conforms() {
//!     run_conformance(TestEngine::relational);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conformance;
pub mod faults;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::conformance::*;
    pub use crate::faults::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use conformance::*;
pub use faults::*;
pub use fixtures::*;
pub use generators::*;
