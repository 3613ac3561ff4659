// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-ingestion
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! Facade over the Gold ingestion workspace: one dependency pulling in
//! every member crate.

pub use gold_clients;
pub use gold_config;
pub use gold_core;
pub use gold_error;
pub use gold_ingester;
pub use gold_ledger;
pub use gold_primary;
pub use gold_source;
pub use gold_store;
pub use gold_tryjob;
