// /////////////////////////////////////////////////////////////////////////////
// Activity Ingestion Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # SQLite Job Store
//!
//! Durable pipeline schedules, live status rows, and the append-only run
//! history. The at-most-one-run-per-type invariant lives in `begin_run`: a
//! conditional `UPDATE … WHERE is_running = 0` whose affected-row count
//! decides the race, never a select-then-update.
//!
//! All cron evaluation happens here: creating or updating a schedule
//! validates the expression and timezone and computes `next_run_at`;
//! `mark_schedule_fired` recomputes it after each tick.

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info, warn};

use ingestion_pipeline_domain::entities::{
    NewSchedule, PipelineHistory, PipelineSchedule, PipelineStatus, SchedulePatch,
};
use ingestion_pipeline_domain::error::PipelineError;
use ingestion_pipeline_domain::repositories::{JobRepository, RunOutcome};
use ingestion_pipeline_domain::value_objects::pipeline_type::{PipelineType, TriggerKind};

use super::sqlite_store::{map_db_err, with_busy_retry};

/// Default (inactive) schedule seeded per pipeline type on first startup.
const DEFAULT_SCHEDULES: [(PipelineType, &str); 5] = [
    (PipelineType::GithubSync, "0 */15 * * * *"),
    (PipelineType::DataProcessing, "0 */5 * * * *"),
    (PipelineType::DataEnrichment, "0 0 * * * *"),
    (PipelineType::AiAnalysis, "0 0 3 * * *"),
    (PipelineType::SitemapGeneration, "0 30 4 * * *"),
];

/// Computes the next fire time of `expr` in `tz_name`, strictly after
/// `after`.
pub fn next_fire_time(
    expr: &str,
    tz_name: &str,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, PipelineError> {
    let schedule = cron::Schedule::from_str(expr).map_err(|e| {
        PipelineError::validation_error(format!("invalid cron expression '{}': {}", expr, e))
    })?;
    let tz = chrono_tz::Tz::from_str(tz_name).map_err(|_| {
        PipelineError::validation_error(format!("unknown timezone '{}'", tz_name))
    })?;
    let next = schedule.after(&after.with_timezone(&tz)).next();
    Ok(next.map(|at| at.with_timezone(&Utc)))
}

/// SQLite-backed implementation of the job store port.
#[derive(Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Makes sure the status row for `pipeline` exists; a no-op afterwards.
    async fn ensure_status_row(&self, pipeline: PipelineType) -> Result<(), PipelineError> {
        sqlx::query(
            "INSERT OR IGNORE INTO pipeline_status (pipeline_type, is_running, status, updated_at) \
             VALUES (?1, 0, 'idle', ?2)",
        )
        .bind(pipeline.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("ensure status row", e))?;
        Ok(())
    }

    async fn try_begin_run(
        &self,
        pipeline: PipelineType,
        trigger: TriggerKind,
    ) -> Result<i64, PipelineError> {
        self.ensure_status_row(pipeline).await?;

        let now = Utc::now();
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_db_err("begin run tx", e))?;

        // The singleton gate: whoever flips is_running wins the race.
        let claimed = sqlx::query(
            "UPDATE pipeline_status SET is_running = 1, status = 'running', updated_at = ?1 \
             WHERE pipeline_type = ?2 AND is_running = 0",
        )
        .bind(now)
        .bind(pipeline.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("claim run slot", e))?;

        if claimed.rows_affected() == 0 {
            // Not an error path worth a rollback side effect beyond the tx drop
            return Err(PipelineError::already_running(pipeline.as_str()));
        }

        let inserted = sqlx::query(
            "INSERT INTO pipeline_history (pipeline_type, trigger_kind, status, started_at, items_processed) \
             VALUES (?1, ?2, 'running', ?3, 0)",
        )
        .bind(pipeline.as_str())
        .bind(trigger.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_err("insert history row", e))?;

        tx.commit()
            .await
            .map_err(|e| map_db_err("commit begin run", e))?;

        let history_id = inserted.last_insert_rowid();
        debug!(pipeline = %pipeline, history_id, trigger = %trigger, "run started");
        Ok(history_id)
    }
}

fn row_to_schedule(row: &SqliteRow) -> Result<PipelineSchedule, PipelineError> {
    let ctx = |e| map_db_err("pipeline_schedules row", e);
    let pipeline_type: String = row.try_get("pipeline_type").map_err(ctx)?;
    let parameters: String = row.try_get("parameters").map_err(ctx)?;
    let parameters: HashMap<String, serde_json::Value> = serde_json::from_str(&parameters)
        .map_err(|e| {
            PipelineError::SerializationError(format!("malformed schedule parameters: {}", e))
        })?;
    Ok(PipelineSchedule {
        id: row.try_get("id").map_err(ctx)?,
        pipeline_type: pipeline_type.parse()?,
        cron_expression: row.try_get("cron_expression").map_err(ctx)?,
        timezone: row.try_get("timezone").map_err(ctx)?,
        is_active: row.try_get("is_active").map_err(ctx)?,
        parameters,
        next_run_at: row.try_get("next_run_at").map_err(ctx)?,
        last_run_at: row.try_get("last_run_at").map_err(ctx)?,
        created_at: row.try_get("created_at").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_status(row: &SqliteRow) -> Result<PipelineStatus, PipelineError> {
    let ctx = |e| map_db_err("pipeline_status row", e);
    let pipeline_type: String = row.try_get("pipeline_type").map_err(ctx)?;
    Ok(PipelineStatus {
        pipeline_type: pipeline_type.parse()?,
        is_running: row.try_get("is_running").map_err(ctx)?,
        status: row.try_get("status").map_err(ctx)?,
        last_run: row.try_get("last_run").map_err(ctx)?,
        updated_at: row.try_get("updated_at").map_err(ctx)?,
    })
}

fn row_to_history(row: &SqliteRow) -> Result<PipelineHistory, PipelineError> {
    let ctx = |e| map_db_err("pipeline_history row", e);
    let pipeline_type: String = row.try_get("pipeline_type").map_err(ctx)?;
    let trigger_kind: String = row.try_get("trigger_kind").map_err(ctx)?;
    let status: String = row.try_get("status").map_err(ctx)?;
    Ok(PipelineHistory {
        id: row.try_get("id").map_err(ctx)?,
        pipeline_type: pipeline_type.parse()?,
        trigger: trigger_kind.parse()?,
        status: status.parse()?,
        started_at: row.try_get("started_at").map_err(ctx)?,
        completed_at: row.try_get("completed_at").map_err(ctx)?,
        items_processed: row.try_get("items_processed").map_err(ctx)?,
        error_message: row.try_get("error_message").map_err(ctx)?,
    })
}

#[async_trait]
impl JobRepository for SqliteJobStore {
    async fn begin_run(
        &self,
        pipeline: PipelineType,
        trigger: TriggerKind,
    ) -> Result<i64, PipelineError> {
        with_busy_retry("begin_run", || self.try_begin_run(pipeline, trigger)).await
    }

    async fn end_run(
        &self,
        history_id: i64,
        outcome: RunOutcome,
        items_processed: i64,
        error_message: Option<&str>,
    ) -> Result<(), PipelineError> {
        with_busy_retry("end_run", || async {
            let now = Utc::now();
            let status = outcome.as_run_status();
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| map_db_err("begin end_run tx", e))?;

            // Guarded on 'running' so closing twice is a no-op
            let closed = sqlx::query(
                "UPDATE pipeline_history SET status = ?1, completed_at = ?2, \
                 items_processed = ?3, error_message = ?4 \
                 WHERE id = ?5 AND status = 'running'",
            )
            .bind(status.as_str())
            .bind(now)
            .bind(items_processed)
            .bind(error_message)
            .bind(history_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| map_db_err("close history row", e))?;

            if closed.rows_affected() > 0 {
                sqlx::query(
                    "UPDATE pipeline_status SET is_running = 0, status = ?1, last_run = ?2, updated_at = ?2 \
                     WHERE pipeline_type = (SELECT pipeline_type FROM pipeline_history WHERE id = ?3)",
                )
                .bind(status.as_str())
                .bind(now)
                .bind(history_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| map_db_err("clear status row", e))?;
            }

            tx.commit()
                .await
                .map_err(|e| map_db_err("commit end_run", e))?;

            if closed.rows_affected() > 0 {
                info!(history_id, status = %status, items_processed, "run finished");
            }
            Ok(())
        })
        .await
    }

    async fn record_progress(&self, history_id: i64, items_processed: i64) {
        let result = sqlx::query(
            "UPDATE pipeline_history SET items_processed = ?1 WHERE id = ?2 AND status = 'running'",
        )
        .bind(items_processed)
        .bind(history_id)
        .execute(&self.pool)
        .await;
        if let Err(e) = result {
            // Best-effort by contract: progress loss never fails the job
            warn!(history_id, error = %e, "failed to record progress");
        }
    }

    async fn status(&self, pipeline: PipelineType) -> Result<PipelineStatus, PipelineError> {
        self.ensure_status_row(pipeline).await?;
        sqlx::query("SELECT * FROM pipeline_status WHERE pipeline_type = ?1")
            .bind(pipeline.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_db_err("select status", e))
            .and_then(|row| row_to_status(&row))
    }

    async fn all_statuses(&self) -> Result<Vec<PipelineStatus>, PipelineError> {
        for pipeline in PipelineType::ALL {
            self.ensure_status_row(pipeline).await?;
        }
        sqlx::query("SELECT * FROM pipeline_status ORDER BY pipeline_type")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("select statuses", e))?
            .iter()
            .map(row_to_status)
            .collect()
    }

    async fn history(
        &self,
        pipeline: Option<PipelineType>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<PipelineHistory>, PipelineError> {
        let rows = match pipeline {
            Some(pipeline) => {
                sqlx::query(
                    "SELECT * FROM pipeline_history WHERE pipeline_type = ?1 \
                     ORDER BY started_at DESC, id DESC LIMIT ?2 OFFSET ?3",
                )
                .bind(pipeline.as_str())
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT * FROM pipeline_history ORDER BY started_at DESC, id DESC \
                     LIMIT ?1 OFFSET ?2",
                )
                .bind(limit as i64)
                .bind(offset as i64)
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(|e| map_db_err("select history", e))?;
        rows.iter().map(row_to_history).collect()
    }

    async fn find_history(&self, history_id: i64) -> Result<Option<PipelineHistory>, PipelineError> {
        sqlx::query("SELECT * FROM pipeline_history WHERE id = ?1")
            .bind(history_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find history", e))?
            .as_ref()
            .map(row_to_history)
            .transpose()
    }

    async fn repair_dangling_runs(&self) -> Result<u64, PipelineError> {
        let now = Utc::now();
        let repaired = sqlx::query(
            "UPDATE pipeline_history SET status = 'failed', completed_at = ?1, \
             error_message = 'process terminated' WHERE status = 'running'",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("repair history rows", e))?;

        sqlx::query(
            "UPDATE pipeline_status SET is_running = 0, status = 'failed', updated_at = ?1 \
             WHERE is_running = 1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("repair status rows", e))?;

        let count = repaired.rows_affected();
        if count > 0 {
            warn!(count, "repaired dangling running rows from a previous process");
        }
        Ok(count)
    }

    // ----- schedules ----------------------------------------------------------

    async fn list_schedules(&self) -> Result<Vec<PipelineSchedule>, PipelineError> {
        sqlx::query("SELECT * FROM pipeline_schedules ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_db_err("list schedules", e))?
            .iter()
            .map(row_to_schedule)
            .collect()
    }

    async fn find_schedule(&self, id: i64) -> Result<Option<PipelineSchedule>, PipelineError> {
        sqlx::query("SELECT * FROM pipeline_schedules WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| map_db_err("find schedule", e))?
            .as_ref()
            .map(row_to_schedule)
            .transpose()
    }

    async fn create_schedule(
        &self,
        schedule: &NewSchedule,
    ) -> Result<PipelineSchedule, PipelineError> {
        let now = Utc::now();
        // Validates expression and timezone as a side effect
        let next_run_at = next_fire_time(&schedule.cron_expression, &schedule.timezone, now)?;
        let parameters = serde_json::to_string(&schedule.parameters).map_err(|e| {
            PipelineError::SerializationError(format!("unencodable schedule parameters: {}", e))
        })?;

        let result = sqlx::query(
            "INSERT INTO pipeline_schedules \
             (pipeline_type, cron_expression, timezone, is_active, parameters, next_run_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(schedule.pipeline_type.as_str())
        .bind(&schedule.cron_expression)
        .bind(&schedule.timezone)
        .bind(schedule.is_active)
        .bind(parameters)
        .bind(next_run_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("insert schedule", e))?;

        self.find_schedule(result.last_insert_rowid())
            .await?
            .ok_or_else(|| PipelineError::internal_error("schedule vanished after insert"))
    }

    async fn update_schedule(
        &self,
        id: i64,
        patch: &SchedulePatch,
    ) -> Result<PipelineSchedule, PipelineError> {
        let existing = self
            .find_schedule(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("schedule {}", id)))?;

        let cron_expression = patch
            .cron_expression
            .clone()
            .unwrap_or(existing.cron_expression);
        let timezone = patch.timezone.clone().unwrap_or(existing.timezone);
        let is_active = patch.is_active.unwrap_or(existing.is_active);
        let parameters = patch
            .parameters
            .clone()
            .unwrap_or(existing.parameters);

        let now = Utc::now();
        let next_run_at = next_fire_time(&cron_expression, &timezone, now)?;
        let parameters_json = serde_json::to_string(&parameters).map_err(|e| {
            PipelineError::SerializationError(format!("unencodable schedule parameters: {}", e))
        })?;

        sqlx::query(
            "UPDATE pipeline_schedules SET cron_expression = ?1, timezone = ?2, is_active = ?3, \
             parameters = ?4, next_run_at = ?5, updated_at = ?6 WHERE id = ?7",
        )
        .bind(&cron_expression)
        .bind(&timezone)
        .bind(is_active)
        .bind(parameters_json)
        .bind(next_run_at)
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("update schedule", e))?;

        self.find_schedule(id)
            .await?
            .ok_or_else(|| PipelineError::internal_error("schedule vanished after update"))
    }

    async fn delete_schedule(&self, id: i64) -> Result<bool, PipelineError> {
        let result = sqlx::query("DELETE FROM pipeline_schedules WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("delete schedule", e))?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_schedules(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<PipelineSchedule>, PipelineError> {
        sqlx::query(
            "SELECT * FROM pipeline_schedules \
             WHERE is_active = 1 AND next_run_at IS NOT NULL AND next_run_at <= ?1 \
             ORDER BY next_run_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_db_err("select due schedules", e))?
        .iter()
        .map(row_to_schedule)
        .collect()
    }

    async fn mark_schedule_fired(
        &self,
        id: i64,
        fired_at: DateTime<Utc>,
    ) -> Result<(), PipelineError> {
        let schedule = self
            .find_schedule(id)
            .await?
            .ok_or_else(|| PipelineError::not_found(format!("schedule {}", id)))?;

        let next_run_at =
            next_fire_time(&schedule.cron_expression, &schedule.timezone, fired_at)?;
        sqlx::query(
            "UPDATE pipeline_schedules SET last_run_at = ?1, next_run_at = ?2, updated_at = ?3 \
             WHERE id = ?4",
        )
        .bind(fired_at)
        .bind(next_run_at)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| map_db_err("mark schedule fired", e))?;
        Ok(())
    }

    async fn seed_default_schedules(&self) -> Result<u64, PipelineError> {
        let now = Utc::now();
        let mut seeded = 0u64;
        for (pipeline, expr) in DEFAULT_SCHEDULES {
            let next_run_at = next_fire_time(expr, "UTC", now)?;
            let result = sqlx::query(
                "INSERT OR IGNORE INTO pipeline_schedules \
                 (pipeline_type, cron_expression, timezone, is_active, parameters, next_run_at, created_at, updated_at) \
                 VALUES (?1, ?2, 'UTC', 0, '{}', ?3, ?4, ?4)",
            )
            .bind(pipeline.as_str())
            .bind(expr)
            .bind(next_run_at)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(|e| map_db_err("seed default schedule", e))?;
            seeded += result.rows_affected();
        }
        if seeded > 0 {
            info!(seeded, "seeded default pipeline schedules");
        }
        Ok(seeded)
    }
}
