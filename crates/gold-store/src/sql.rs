// SPDX-License-Identifier: MIT OR Apache-2.0
//! Postgres-backed [`IngestionStore`].
//!
//! Batch writes are assembled as multi-row `INSERT ... VALUES ... ON
//! CONFLICT` statements, chunked so one statement never carries more than a
//! few hundred rows. Every statement is conflict-tolerant, so a retry after
//! a partial failure re-issues writes without corrupting anything.

use crate::rows::{
    ExpectationRow, GroupingRow, OptionsRow, PrimaryBranchParamRow, SecondaryBranchParamRow,
    SecondaryBranchValueRow, TiledTraceDigestRow, TraceRow, TraceValueRow, ValueAtHeadRow,
};
use crate::store::IngestionStore;
use crate::tile::decide_tile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gold_core::{Changelist, ChangelistStatus, CommitId, Patchset, SourceFileId, TileId, Tryjob};
use gold_error::{IngestionError, Result};
use sqlx::postgres::{PgArguments, PgPool};
use sqlx::query::Query;
use sqlx::types::Json;
use sqlx::{Postgres, Row};

/// Default chunk size for the hot per-result tables.
pub const HOT_CHUNK: usize = 50;

/// Default chunk size for the cold content-addressed tables.
pub const COLD_CHUNK: usize = 200;

fn sql_err(e: sqlx::Error) -> IngestionError {
    IngestionError::retryable("database operation failed").with_source(e)
}

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// One row shape that knows its table, columns, and conflict policy.
trait SqlRow {
    const TABLE: &'static str;
    const COLUMNS: &'static [&'static str];
    const CONFLICT: &'static str;

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_>;
}

/// Build `INSERT INTO t (c1, c2) VALUES ($1, $2), ($3, $4) <conflict>` for
/// `n` rows.
fn build_insert<R: SqlRow>(n: usize) -> String {
    let cols = R::COLUMNS.join(", ");
    let mut sql = format!("INSERT INTO {} ({cols}) VALUES ", R::TABLE);
    let width = R::COLUMNS.len();
    for row in 0..n {
        if row > 0 {
            sql.push_str(", ");
        }
        sql.push('(');
        for col in 0..width {
            if col > 0 {
                sql.push_str(", ");
            }
            sql.push('$');
            sql.push_str(&(row * width + col + 1).to_string());
        }
        sql.push(')');
    }
    sql.push(' ');
    sql.push_str(R::CONFLICT);
    sql
}

async fn insert_chunked<R: SqlRow>(pool: &PgPool, rows: Vec<R>, chunk: usize) -> Result<()> {
    let mut rows = rows;
    while !rows.is_empty() {
        let rest = rows.split_off(rows.len().min(chunk));
        let batch = std::mem::replace(&mut rows, rest);
        tracing::debug!(table = R::TABLE, rows = batch.len(), "writing batch");
        let sql = build_insert::<R>(batch.len());
        let mut query = sqlx::query(&sql);
        for row in batch {
            query = row.bind(query);
        }
        query.execute(pool).await.map_err(sql_err)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Row bindings
// ---------------------------------------------------------------------------

impl SqlRow for OptionsRow {
    const TABLE: &'static str = "Options";
    const COLUMNS: &'static [&'static str] = &["options_id", "keys"];
    const CONFLICT: &'static str = "ON CONFLICT (options_id) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.options_id.as_bytes().to_vec())
            .bind(Json(self.keys))
    }
}

impl SqlRow for GroupingRow {
    const TABLE: &'static str = "Groupings";
    const COLUMNS: &'static [&'static str] = &["grouping_id", "keys"];
    const CONFLICT: &'static str = "ON CONFLICT (grouping_id) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(Json(self.keys))
    }
}

impl SqlRow for TraceRow {
    const TABLE: &'static str = "Traces";
    const COLUMNS: &'static [&'static str] = &["trace_id", "corpus", "grouping_id", "keys"];
    const CONFLICT: &'static str = "ON CONFLICT (trace_id) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.trace_id.as_bytes().to_vec())
            .bind(self.corpus)
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(Json(self.keys))
    }
}

impl SqlRow for ExpectationRow {
    const TABLE: &'static str = "Expectations";
    const COLUMNS: &'static [&'static str] = &["grouping_id", "digest", "label"];
    const CONFLICT: &'static str = "ON CONFLICT (grouping_id, digest) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(self.digest.as_bytes().to_vec())
            .bind(self.label.as_str())
    }
}

impl SqlRow for TraceValueRow {
    const TABLE: &'static str = "TraceValues";
    const COLUMNS: &'static [&'static str] = &[
        "shard",
        "trace_id",
        "commit_id",
        "digest",
        "grouping_id",
        "options_id",
        "source_file_id",
    ];
    const CONFLICT: &'static str = "ON CONFLICT (shard, commit_id, trace_id) DO UPDATE SET \
        digest = excluded.digest, grouping_id = excluded.grouping_id, \
        options_id = excluded.options_id, source_file_id = excluded.source_file_id";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(i16::from(self.shard))
            .bind(self.trace_id.as_bytes().to_vec())
            .bind(self.commit_id.as_str().to_string())
            .bind(self.digest.as_bytes().to_vec())
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(self.options_id.as_bytes().to_vec())
            .bind(self.source_file_id.as_bytes().to_vec())
    }
}

impl SqlRow for ValueAtHeadRow {
    const TABLE: &'static str = "ValuesAtHead";
    const COLUMNS: &'static [&'static str] = &[
        "trace_id",
        "most_recent_commit_id",
        "digest",
        "options_id",
        "grouping_id",
        "corpus",
        "keys",
    ];
    const CONFLICT: &'static str = "ON CONFLICT (trace_id) DO UPDATE SET \
        most_recent_commit_id = excluded.most_recent_commit_id, \
        digest = excluded.digest, options_id = excluded.options_id, \
        grouping_id = excluded.grouping_id, corpus = excluded.corpus, \
        keys = excluded.keys \
        WHERE excluded.most_recent_commit_id > ValuesAtHead.most_recent_commit_id";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.trace_id.as_bytes().to_vec())
            .bind(self.most_recent_commit_id.as_str().to_string())
            .bind(self.digest.as_bytes().to_vec())
            .bind(self.options_id.as_bytes().to_vec())
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(self.corpus)
            .bind(Json(self.keys))
    }
}

impl SqlRow for PrimaryBranchParamRow {
    const TABLE: &'static str = "PrimaryBranchParams";
    const COLUMNS: &'static [&'static str] = &["tile_id", "key", "value"];
    const CONFLICT: &'static str = "ON CONFLICT (tile_id, key, value) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query.bind(self.tile_id.0).bind(self.key).bind(self.value)
    }
}

impl SqlRow for TiledTraceDigestRow {
    const TABLE: &'static str = "TiledTraceDigests";
    const COLUMNS: &'static [&'static str] = &["trace_id", "tile_id", "digest", "grouping_id"];
    const CONFLICT: &'static str = "ON CONFLICT (trace_id, tile_id, digest) DO UPDATE SET \
        grouping_id = excluded.grouping_id \
        WHERE TiledTraceDigests.grouping_id <> excluded.grouping_id";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.trace_id.as_bytes().to_vec())
            .bind(self.tile_id.0)
            .bind(self.digest.as_bytes().to_vec())
            .bind(self.grouping_id.as_bytes().to_vec())
    }
}

impl SqlRow for SecondaryBranchParamRow {
    const TABLE: &'static str = "SecondaryBranchParams";
    const COLUMNS: &'static [&'static str] =
        &["changelist_id", "patchset_id", "key", "value"];
    const CONFLICT: &'static str =
        "ON CONFLICT (changelist_id, patchset_id, key, value) DO NOTHING";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.changelist_id)
            .bind(self.patchset_id)
            .bind(self.key)
            .bind(self.value)
    }
}

impl SqlRow for SecondaryBranchValueRow {
    const TABLE: &'static str = "SecondaryBranchValues";
    const COLUMNS: &'static [&'static str] = &[
        "changelist_id",
        "patchset_id",
        "trace_id",
        "digest",
        "grouping_id",
        "options_id",
        "source_file_id",
        "tryjob_id",
    ];
    const CONFLICT: &'static str =
        "ON CONFLICT (changelist_id, patchset_id, trace_id) DO UPDATE SET \
        digest = excluded.digest, grouping_id = excluded.grouping_id, \
        options_id = excluded.options_id, source_file_id = excluded.source_file_id, \
        tryjob_id = excluded.tryjob_id";

    fn bind(self, query: PgQuery<'_>) -> PgQuery<'_> {
        query
            .bind(self.changelist_id)
            .bind(self.patchset_id)
            .bind(self.trace_id.as_bytes().to_vec())
            .bind(self.digest.as_bytes().to_vec())
            .bind(self.grouping_id.as_bytes().to_vec())
            .bind(self.options_id.as_bytes().to_vec())
            .bind(self.source_file_id.as_bytes().to_vec())
            .bind(self.tryjob_id)
    }
}

// ---------------------------------------------------------------------------
// SqlStore
// ---------------------------------------------------------------------------

/// [`IngestionStore`] over a Postgres-compatible connection pool.
pub struct SqlStore {
    pool: PgPool,
    hot_chunk: usize,
    cold_chunk: usize,
}

impl SqlStore {
    /// Wrap an existing pool with the default chunk sizes.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            hot_chunk: HOT_CHUNK,
            cold_chunk: COLD_CHUNK,
        }
    }

    /// Override the chunk sizes.
    #[must_use]
    pub fn with_chunk_sizes(mut self, hot: usize, cold: usize) -> Self {
        self.hot_chunk = hot.max(1);
        self.cold_chunk = cold.max(1);
        self
    }
}

#[async_trait]
impl IngestionStore for SqlStore {
    async fn get_commit_by_git_hash(&self, git_hash: &str) -> Result<Option<CommitId>> {
        let row = sqlx::query("SELECT commit_id FROM GitCommits WHERE git_hash = $1")
            .bind(git_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(sql_err)?;
        Ok(row.map(|r| CommitId::new(r.get::<String, _>("commit_id"))))
    }

    async fn upsert_metadata_commit(&self, commit_id: &CommitId, metadata: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO MetadataCommits (commit_id, commit_metadata) VALUES ($1, $2) \
             ON CONFLICT (commit_id) DO UPDATE SET commit_metadata = excluded.commit_metadata",
        )
        .bind(commit_id.as_str())
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn resolve_tile(&self, commit_id: &CommitId, tile_width: i64) -> Result<TileId> {
        let mut tx = self.pool.begin().await.map_err(sql_err)?;

        let before = sqlx::query(
            "SELECT commit_id, tile_id FROM CommitsWithData \
             WHERE commit_id <= $1 ORDER BY commit_id DESC LIMIT 1",
        )
        .bind(commit_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(sql_err)?
        .map(|r| {
            (
                CommitId::new(r.get::<String, _>("commit_id")),
                TileId(r.get::<i64, _>("tile_id")),
            )
        });

        let after = sqlx::query(
            "SELECT tile_id FROM CommitsWithData \
             WHERE commit_id >= $1 ORDER BY commit_id ASC LIMIT 1",
        )
        .bind(commit_id.as_str())
        .fetch_optional(&mut *tx)
        .await
        .map_err(sql_err)?
        .map(|r| TileId(r.get::<i64, _>("tile_id")));

        let commits_in_before_tile = match &before {
            Some((_, tile)) => {
                let row = sqlx::query("SELECT count(*) AS n FROM CommitsWithData WHERE tile_id = $1")
                    .bind(tile.0)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(sql_err)?;
                row.get::<i64, _>("n").unsigned_abs()
            }
            None => 0,
        };

        let tile = decide_tile(
            before.as_ref().map(|(c, t)| (c, *t)),
            after,
            commits_in_before_tile,
            tile_width,
        );

        sqlx::query(
            "INSERT INTO CommitsWithData (commit_id, tile_id) VALUES ($1, $2) \
             ON CONFLICT (commit_id) DO NOTHING",
        )
        .bind(commit_id.as_str())
        .bind(tile.0)
        .execute(&mut *tx)
        .await
        .map_err(sql_err)?;

        tx.commit().await.map_err(sql_err)?;
        Ok(tile)
    }

    async fn put_options(&self, rows: Vec<OptionsRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.cold_chunk).await
    }

    async fn put_groupings(&self, rows: Vec<GroupingRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.cold_chunk).await
    }

    async fn put_traces(&self, rows: Vec<TraceRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.cold_chunk).await
    }

    async fn put_expectations(&self, rows: Vec<ExpectationRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn put_trace_values(&self, rows: Vec<TraceValueRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn put_values_at_head(&self, rows: Vec<ValueAtHeadRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn put_primary_branch_params(&self, rows: Vec<PrimaryBranchParamRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn put_tiled_trace_digests(&self, rows: Vec<TiledTraceDigestRow>) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn upsert_source_file(
        &self,
        id: &SourceFileId,
        name: &str,
        last_ingested: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO SourceFiles (source_file_id, source_file, last_ingested) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (source_file_id) DO UPDATE SET last_ingested = excluded.last_ingested",
        )
        .bind(id.as_bytes().to_vec())
        .bind(name)
        .bind(last_ingested)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn get_changelist(&self, system: &str, id: &str) -> Result<Option<Changelist>> {
        let row = sqlx::query(
            "SELECT status, owner_email, subject, last_ingested_data FROM Changelists \
             WHERE system = $1 AND changelist_id = $2",
        )
        .bind(system)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        row.map(|r| {
            let status: String = r.get("status");
            let status = status
                .parse::<ChangelistStatus>()
                .map_err(IngestionError::permanent)?;
            Ok(Changelist {
                system: system.to_string(),
                id: id.to_string(),
                status,
                owner: r.get("owner_email"),
                subject: r.get("subject"),
                last_updated: r.get("last_ingested_data"),
            })
        })
        .transpose()
    }

    async fn put_changelist(&self, changelist: &Changelist) -> Result<()> {
        sqlx::query(
            "INSERT INTO Changelists \
             (system, changelist_id, status, owner_email, subject, last_ingested_data) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (system, changelist_id) DO UPDATE SET \
             status = excluded.status, owner_email = excluded.owner_email, \
             subject = excluded.subject, last_ingested_data = excluded.last_ingested_data",
        )
        .bind(&changelist.system)
        .bind(&changelist.id)
        .bind(changelist.status.as_str())
        .bind(&changelist.owner)
        .bind(&changelist.subject)
        .bind(changelist.last_updated)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn get_patchset(&self, system: &str, patchset_id: &str) -> Result<Option<Patchset>> {
        let row = sqlx::query(
            "SELECT changelist_id, ps_order, git_hash FROM Patchsets \
             WHERE system = $1 AND patchset_id = $2",
        )
        .bind(system)
        .bind(patchset_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.map(|r| Patchset {
            system: system.to_string(),
            id: patchset_id.to_string(),
            changelist_id: r.get("changelist_id"),
            order: r.get::<i32, _>("ps_order").unsigned_abs(),
            git_hash: r.get("git_hash"),
        }))
    }

    async fn get_patchset_by_order(
        &self,
        system: &str,
        changelist_id: &str,
        order: u32,
    ) -> Result<Option<Patchset>> {
        let row = sqlx::query(
            "SELECT patchset_id, git_hash FROM Patchsets \
             WHERE system = $1 AND changelist_id = $2 AND ps_order = $3",
        )
        .bind(system)
        .bind(changelist_id)
        .bind(i32::try_from(order).unwrap_or(i32::MAX))
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.map(|r| Patchset {
            system: system.to_string(),
            id: r.get("patchset_id"),
            changelist_id: changelist_id.to_string(),
            order,
            git_hash: r.get("git_hash"),
        }))
    }

    async fn put_patchset(&self, patchset: &Patchset) -> Result<()> {
        sqlx::query(
            "INSERT INTO Patchsets (system, patchset_id, changelist_id, ps_order, git_hash) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (system, patchset_id) DO UPDATE SET \
             changelist_id = excluded.changelist_id, ps_order = excluded.ps_order, \
             git_hash = excluded.git_hash",
        )
        .bind(&patchset.system)
        .bind(&patchset.id)
        .bind(&patchset.changelist_id)
        .bind(i32::try_from(patchset.order).unwrap_or(i32::MAX))
        .bind(&patchset.git_hash)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn get_tryjob(&self, system: &str, id: &str) -> Result<Option<Tryjob>> {
        let row = sqlx::query(
            "SELECT changelist_id, patchset_id, display_name, last_ingested FROM Tryjobs \
             WHERE system = $1 AND tryjob_id = $2",
        )
        .bind(system)
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(row.map(|r| Tryjob {
            system: system.to_string(),
            id: id.to_string(),
            changelist_id: r.get("changelist_id"),
            patchset_id: r.get("patchset_id"),
            display_name: r.get("display_name"),
            last_ingested: r.get("last_ingested"),
        }))
    }

    async fn put_tryjob(&self, tryjob: &Tryjob) -> Result<()> {
        sqlx::query(
            "INSERT INTO Tryjobs \
             (system, tryjob_id, changelist_id, patchset_id, display_name, last_ingested) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (system, tryjob_id) DO UPDATE SET \
             changelist_id = excluded.changelist_id, patchset_id = excluded.patchset_id, \
             display_name = excluded.display_name, last_ingested = excluded.last_ingested",
        )
        .bind(&tryjob.system)
        .bind(&tryjob.id)
        .bind(&tryjob.changelist_id)
        .bind(&tryjob.patchset_id)
        .bind(&tryjob.display_name)
        .bind(tryjob.last_ingested)
        .execute(&self.pool)
        .await
        .map_err(sql_err)?;
        Ok(())
    }

    async fn put_secondary_branch_params(
        &self,
        rows: Vec<SecondaryBranchParamRow>,
    ) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }

    async fn put_secondary_branch_values(
        &self,
        rows: Vec<SecondaryBranchValueRow>,
    ) -> Result<()> {
        insert_chunked(&self.pool, rows, self.hot_chunk).await
    }
}
