use std::sync::Arc;

use futures::future::BoxFuture;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use time::OffsetDateTime;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::utils::local_now;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
#[repr(i64)]
pub enum ProgressStatus {
    Started = 1,
    Completed = 2,
}

impl From<i64> for ProgressStatus {
    fn from(value: i64) -> Self {
        match value {
            2 => ProgressStatus::Completed,
            _ => ProgressStatus::Started,
        }
    }
}

/// A progress milestone of one learner in one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub module_id: String,
    pub status: ProgressStatus,
    /// Percentage of the module completed, 0 to 100
    pub completion_pct: u8,
    /// The time when the milestone was reached
    #[serde(default = "local_now", with = "time::serde::rfc3339")]
    #[schemars(skip)]
    pub update_time: OffsetDateTime,
}

impl ProgressReport {
    pub fn new(module_id: impl Into<String>, status: ProgressStatus, completion_pct: u8) -> Self {
        Self {
            module_id: module_id.into(),
            status,
            completion_pct: completion_pct.min(100),
            update_time: local_now(),
        }
    }
}

/// External progress tracking service. Reports are best effort.
pub trait ProgressTracker: Send + Sync {
    fn report(&self, report: ProgressReport) -> BoxFuture<'static, anyhow::Result<()>>;
}

/// Progress tracker backed by the `module_progress` table.
///
/// A module reported as completed stays completed when a later `started`
/// report arrives, and the completion percentage never decreases.
#[derive(Debug, Clone)]
pub struct SqliteProgressTracker {
    learner_id: i64,
    database: SqlitePool,
}

impl SqliteProgressTracker {
    pub async fn new(learner_id: i64, database: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            "create table if not exists module_progress (
                learner_id integer not null,
                module_id text not null,
                status integer not null,
                completion_pct integer not null,
                update_time text not null,
                primary key (learner_id, module_id)
            )",
        )
        .execute(&database)
        .await?;
        Ok(Self {
            learner_id,
            database,
        })
    }

    pub async fn get_progress(&self, module_id: &str) -> anyhow::Result<Option<ProgressReport>> {
        let record = sqlx::query_as::<_, (String, i64, i64, OffsetDateTime)>(
            "select module_id, status, completion_pct, update_time from module_progress where learner_id = ? and module_id = ?",
        )
        .bind(self.learner_id)
        .bind(module_id)
        .fetch_optional(&self.database)
        .await?;
        Ok(record.map(|(module_id, status, completion_pct, update_time)| ProgressReport {
            module_id,
            status: ProgressStatus::from(status),
            completion_pct: completion_pct.clamp(0, 100) as u8,
            update_time,
        }))
    }
}

impl ProgressTracker for SqliteProgressTracker {
    fn report(&self, report: ProgressReport) -> BoxFuture<'static, anyhow::Result<()>> {
        let learner_id = self.learner_id;
        let database = self.database.clone();
        Box::pin(async move {
            sqlx::query(
                "insert into module_progress (learner_id, module_id, status, completion_pct, update_time)
                values (?, ?, ?, ?, ?)
                on conflict (learner_id, module_id) do update set
                    status = max(module_progress.status, excluded.status),
                    completion_pct = max(module_progress.completion_pct, excluded.completion_pct),
                    update_time = excluded.update_time",
            )
            .bind(learner_id)
            .bind(&report.module_id)
            .bind(report.status as i64)
            .bind(report.completion_pct as i64)
            .bind(report.update_time)
            .execute(&database)
            .await?;
            Ok(())
        })
    }
}

/// Fire-and-forget progress reporting for one module session.
#[derive(Clone)]
pub struct ProgressGateway {
    tracker: Arc<dyn ProgressTracker>,
    module_id: String,
    started_reported: bool,
}

impl ProgressGateway {
    pub fn new(tracker: Arc<dyn ProgressTracker>, module_id: impl Into<String>) -> Self {
        Self {
            tracker,
            module_id: module_id.into(),
            started_reported: false,
        }
    }

    /// Report `started` the first time the learner opens the module.
    pub fn report_started(&mut self) -> Option<JoinHandle<()>> {
        if self.started_reported {
            return None;
        }
        self.started_reported = true;
        self.spawn(ProgressStatus::Started, 0)
    }

    pub fn report_completed(&self, completion_pct: u8) -> Option<JoinHandle<()>> {
        self.spawn(ProgressStatus::Completed, completion_pct)
    }

    /// Reports are dropped when there is no tokio runtime to send them on.
    fn spawn(&self, status: ProgressStatus, completion_pct: u8) -> Option<JoinHandle<()>> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "no tokio runtime, progress of {} not reported: {:?}",
                self.module_id, status
            );
            return None;
        };
        let report = ProgressReport::new(self.module_id.clone(), status, completion_pct);
        let future = self.tracker.report(report);
        let module_id = self.module_id.clone();
        Some(runtime.spawn(async move {
            match future.await {
                Ok(()) => info!("progress of {} reported: {:?}", module_id, status),
                Err(e) => error!("report progress of {} failed: {}", module_id, e),
            }
        }))
    }
}
