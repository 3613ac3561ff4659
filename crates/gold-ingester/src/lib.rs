// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-ingester
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The ingestion driver. An [`Ingester`] owns any number of source/processor
//! pairs, fans storage events and periodic catch-up polls into one bounded
//! dispatch channel, deduplicates against the ledger, and runs
//! [`Processor::process`] over a bounded worker pool with a hard per-file
//! timeout.

pub mod clock;
pub mod ingester;
pub mod metrics;
pub mod processor;
pub mod telemetry;

pub use clock::{Clock, FixedClock, SystemClock};
pub use ingester::{FileEvent, Ingester};
pub use metrics::{IngestionMetrics, MetricsSnapshot};
pub use processor::{ProcessOutcome, Processor};
