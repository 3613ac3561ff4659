// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-clients
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Seams to the external systems ingestion talks to: code-review systems,
//! continuous-integration systems, and the version-control adapter. The
//! concrete network clients live elsewhere; this crate defines the
//! capability traits, a name-to-client registry, the rate-limited wrappers,
//! and in-memory fakes.

pub mod lookup;
pub mod mock;
pub mod ratelimit;
pub mod registry;
pub mod traits;
pub mod vcs;

pub use lookup::{CisTryjobLookup, TryjobAttribution, TryjobLookup};
pub use mock::{MockCi, MockCodeReview, MockVcs};
pub use ratelimit::{RateLimitedCi, RateLimitedCodeReview, RateLimiter};
pub use registry::SystemRegistry;
pub use traits::{CodeReviewClient, ContinuousIntegrationClient, TryjobChange, TryjobInfo};
pub use vcs::{VcsAdapter, VcsCommit};
