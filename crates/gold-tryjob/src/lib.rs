// SPDX-License-Identifier: MIT OR Apache-2.0
//! gold-tryjob
#![deny(unsafe_code)]
#![warn(missing_docs)]
//!
//! The secondary-branch processor. Pre-submit result files are attributed
//! to a changelist/patchset/tryjob triple; this processor resolves each of
//! the three (store first, then the review/CI clients) and writes the
//! secondary-branch schema in foreign-key order. Tryjob results never get
//! default expectations.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_clients::SystemRegistry;
use gold_core::parse::{ParseError, SystemDefaults, parse_result_file};
use gold_core::validate::{TryjobRef, validate};
use gold_core::{Changelist, ChangelistStatus, Patchset, SourceFileId, Tryjob};
use gold_error::{IngestionError, Result};
use gold_ingester::clock::Clock;
use gold_ingester::processor::{ProcessOutcome, Processor};
use gold_source::IngestionSource;
use gold_store::{
    Caches, GroupingRow, IngestionStore, OptionsRow, SecondaryBranchParamRow,
    SecondaryBranchValueRow, TraceRow,
};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Ingests result files attributed to changelists.
pub struct TryjobProcessor {
    store: Arc<dyn IngestionStore>,
    source: Arc<dyn IngestionSource>,
    registry: Arc<SystemRegistry>,
    caches: Arc<Caches>,
    clock: Arc<dyn Clock>,
    defaults: SystemDefaults,
}

impl TryjobProcessor {
    /// Build a processor.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when the registry has no code-review system.
    pub fn new(
        store: Arc<dyn IngestionStore>,
        source: Arc<dyn IngestionSource>,
        registry: Arc<SystemRegistry>,
        caches: Arc<Caches>,
        clock: Arc<dyn Clock>,
        defaults: SystemDefaults,
    ) -> Result<Self> {
        if registry.crs_names().is_empty() {
            return Err(IngestionError::fatal(
                "tryjob ingestion needs at least one code-review system",
            ));
        }
        Ok(Self {
            store,
            source,
            registry,
            caches,
            clock,
            defaults,
        })
    }

    async fn read_file(&self, file_name: &str) -> Result<Vec<u8>> {
        let mut reader = self.source.get_reader(file_name).await?;
        let mut bytes = Vec::new();
        reader
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| IngestionError::retryable("reading result file").with_source(e))?;
        Ok(bytes)
    }

    /// Load the changelist from storage, or stage it from the review
    /// system. The returned flag says whether a write is needed before the
    /// dependent rows go in.
    async fn resolve_changelist(&self, tryjob: &TryjobRef) -> Result<(Changelist, bool)> {
        if let Some(mut stored) = self
            .store
            .get_changelist(&tryjob.crs, &tryjob.changelist_id)
            .await?
        {
            // New results on an abandoned changelist mean it is live again.
            if stored.status == ChangelistStatus::Abandoned {
                stored.status = ChangelistStatus::Open;
                return Ok((stored, true));
            }
            return Ok((stored, false));
        }

        let client = self.registry.crs(&tryjob.crs).ok_or_else(|| {
            IngestionError::permanent(format!("no configured code-review system {:?}", tryjob.crs))
        })?;
        let mut fetched = client
            .get_changelist(&tryjob.changelist_id)
            .await?
            .ok_or_else(|| {
                IngestionError::retryable(format!(
                    "changelist {} not yet visible on {}",
                    tryjob.changelist_id, tryjob.crs
                ))
            })?;
        fetched.system = tryjob.crs.clone();
        fetched.id = tryjob.changelist_id.clone();
        // Epoch marks "staged, not yet persisted"; the final refresh stamps
        // the real time.
        fetched.last_updated = DateTime::<Utc>::UNIX_EPOCH;
        Ok((fetched, true))
    }

    /// Load the patchset (id preferred over order) from storage, or stage
    /// it from the review system.
    async fn resolve_patchset(&self, tryjob: &TryjobRef) -> Result<Patchset> {
        let stored = match (&tryjob.patchset_id, tryjob.patchset_order) {
            (Some(ps_id), _) => self.store.get_patchset(&tryjob.crs, ps_id).await?,
            (None, Some(order)) => {
                self.store
                    .get_patchset_by_order(&tryjob.crs, &tryjob.changelist_id, order)
                    .await?
            }
            (None, None) => None,
        };
        if let Some(ps) = stored {
            return Ok(ps);
        }

        let client = self.registry.crs(&tryjob.crs).ok_or_else(|| {
            IngestionError::permanent(format!("no configured code-review system {:?}", tryjob.crs))
        })?;
        let fetched = match (&tryjob.patchset_id, tryjob.patchset_order) {
            (Some(ps_id), _) => {
                client
                    .get_patchset_by_id(&tryjob.changelist_id, ps_id)
                    .await?
            }
            (None, Some(order)) => {
                client
                    .get_patchset_by_order(&tryjob.changelist_id, order)
                    .await?
            }
            (None, None) => None,
        };
        let mut patchset = fetched.ok_or_else(|| {
            IngestionError::retryable(format!(
                "patchset for changelist {} not yet visible on {}",
                tryjob.changelist_id, tryjob.crs
            ))
        })?;
        patchset.system = tryjob.crs.clone();
        patchset.changelist_id = tryjob.changelist_id.clone();
        Ok(patchset)
    }

    /// Load the tryjob from storage, or stage it from the CI system.
    async fn resolve_tryjob(&self, tryjob: &TryjobRef, patchset_id: &str) -> Result<(Tryjob, bool)> {
        if let Some(stored) = self.store.get_tryjob(&tryjob.cis, &tryjob.try_job_id).await? {
            return Ok((stored, false));
        }
        let client = self.registry.cis(&tryjob.cis).ok_or_else(|| {
            IngestionError::permanent(format!(
                "no configured continuous-integration system {:?}",
                tryjob.cis
            ))
        })?;
        let info = client.get_tryjob(&tryjob.try_job_id).await?.ok_or_else(|| {
            IngestionError::retryable(format!(
                "tryjob {} not yet visible on {}",
                tryjob.try_job_id, tryjob.cis
            ))
        })?;
        Ok((
            Tryjob {
                system: tryjob.cis.clone(),
                id: tryjob.try_job_id.clone(),
                changelist_id: tryjob.changelist_id.clone(),
                patchset_id: patchset_id.to_string(),
                display_name: info.display_name,
                last_ingested: self.clock.now(),
            },
            true,
        ))
    }
}

#[async_trait]
impl Processor for TryjobProcessor {
    fn name(&self) -> &str {
        "tryjob"
    }

    async fn process(&self, file_name: &str) -> Result<ProcessOutcome> {
        let bytes = self.read_file(file_name).await?;
        let parsed = parse_result_file(&bytes, &self.defaults)
            .map_err(|e| IngestionError::permanent("parsing result file").with_source(e))?;
        let validated = match validate(&parsed, file_name) {
            Ok(v) => v,
            Err(ParseError::NoResults) => {
                debug!(file = file_name, "file has no ingestible results");
                return Ok(ProcessOutcome::default());
            }
            Err(e) => {
                return Err(IngestionError::permanent("validating result file").with_source(e));
            }
        };
        let tryjob_ref = validated.tryjob.as_ref().ok_or_else(|| {
            IngestionError::permanent("tryjob ingestion requires changelist fields")
        })?;

        let (mut changelist, changelist_dirty) = self.resolve_changelist(tryjob_ref).await?;
        let patchset = self.resolve_patchset(tryjob_ref).await?;
        let (tryjob, tryjob_new) = self.resolve_tryjob(tryjob_ref, &patchset.id).await?;

        // Expand the results into rows.
        let source_file_id = SourceFileId::from_name(file_name);
        let mut options_rows = Vec::new();
        let mut grouping_rows = Vec::new();
        let mut trace_rows = Vec::new();
        let mut param_rows = Vec::new();
        let mut value_rows = Vec::new();
        let mut seen_options = HashSet::new();
        let mut seen_groupings = HashSet::new();
        let mut seen_traces = HashSet::new();
        let mut seen_params: HashSet<(String, String)> = HashSet::new();

        for result in &validated.results {
            let trace_id = result.trace_id();
            let grouping_id = result.grouping_id();
            let options_id = result.options_id();

            if !self.caches.has_options(&options_id) && seen_options.insert(options_id) {
                options_rows.push(OptionsRow {
                    options_id,
                    keys: result.options.clone(),
                });
            }
            if !self.caches.has_grouping(&grouping_id) && seen_groupings.insert(grouping_id) {
                grouping_rows.push(GroupingRow {
                    grouping_id,
                    keys: result.grouping(),
                });
            }
            if !self.caches.has_trace(&trace_id) && seen_traces.insert(trace_id) {
                trace_rows.push(TraceRow {
                    trace_id,
                    corpus: result.corpus().to_string(),
                    grouping_id,
                    keys: result.keys.clone(),
                });
            }
            for (key, value) in result.params() {
                if seen_params.insert((key.clone(), value.clone())) {
                    param_rows.push(SecondaryBranchParamRow {
                        changelist_id: changelist.id.clone(),
                        patchset_id: patchset.id.clone(),
                        key,
                        value,
                    });
                }
            }
            value_rows.push(SecondaryBranchValueRow {
                changelist_id: changelist.id.clone(),
                patchset_id: patchset.id.clone(),
                trace_id,
                digest: result.digest,
                grouping_id,
                options_id,
                source_file_id,
                tryjob_id: tryjob.id.clone(),
            });
        }

        let mark_options: Vec<_> = options_rows.iter().map(|r| r.options_id).collect();
        let mark_groupings: Vec<_> = grouping_rows.iter().map(|r| r.grouping_id).collect();
        let mark_traces: Vec<_> = trace_rows.iter().map(|r| r.trace_id).collect();

        // Foreign-key order: the changelist before anything that references
        // it, the patchset before the tryjob and the values.
        if changelist_dirty {
            self.store.put_changelist(&changelist).await?;
        }
        self.store.put_patchset(&patchset).await?;
        if tryjob_new {
            self.store.put_tryjob(&tryjob).await?;
        }
        self.store.put_options(options_rows).await?;
        self.store.put_groupings(grouping_rows).await?;
        self.store.put_traces(trace_rows).await?;
        self.store.put_secondary_branch_params(param_rows).await?;
        self.store.put_secondary_branch_values(value_rows).await?;
        self.store
            .upsert_source_file(&source_file_id, file_name, self.clock.now())
            .await?;

        for id in &mark_options {
            self.caches.mark_options(id);
        }
        for id in &mark_groupings {
            self.caches.mark_grouping(id);
        }
        for id in &mark_traces {
            self.caches.mark_trace(id);
        }

        // Final refresh: the changelist row now reflects real ingestion
        // time instead of the staging sentinel.
        changelist.last_updated = self.clock.now();
        self.store.put_changelist(&changelist).await?;

        Ok(ProcessOutcome {
            results_ingested: validated.results.len(),
        })
    }
}
