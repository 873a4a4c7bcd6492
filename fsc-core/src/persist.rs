//! On-disk persistence for job state and per-job result reports.
//!
//! Layout under the storage root (default `~/.full-self-coding-server/`):
//!
//! ```text
//! tasks/<jobId>.json      JobState, ISO-8601 dates, string enum tags
//! reports/<jobId>.json    TaskResult[]
//! ```
//!
//! All writes are atomic (temp file + rename in the same directory), so
//! concurrent readers always see a complete document. Orchestrators own
//! disjoint `<jobId>` namespaces, which makes concurrent jobs safe without
//! any cross-process coordination.

use std::io::Write as IoWriteExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::{fs, io};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::job::{JobInput, JobState, JobStatus};
use crate::task::TaskResult;

static JOB_SEQ: AtomicU64 = AtomicU64::new(0);

/// Default storage root: `$FSC_DIR`, else `~/.full-self-coding-server`.
pub fn default_storage_root() -> PathBuf {
    if let Ok(dir) = std::env::var("FSC_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".full-self-coding-server");
    }
    PathBuf::from(".full-self-coding-server")
}

/// Write `content` to `path` atomically using a temp file + rename.
///
/// `rename(2)` within one directory is atomic on POSIX; readers see either
/// the old complete file or the new complete file, never a partial write.
fn atomic_write(path: &Path, content: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)
        .map_err(|e| Error::state(format!("{}: {e}", tmp.display())))?;
    f.write_all(content.as_bytes())
        .map_err(|e| Error::state(format!("{}: {e}", tmp.display())))?;
    f.sync_all()
        .map_err(|e| Error::state(format!("{}: {e}", tmp.display())))?;
    fs::rename(&tmp, path).map_err(|e| Error::state(format!("{}: {e}", path.display())))?;
    Ok(())
}

/// Projection of a job for the history listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

/// One page of history.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPage {
    pub tasks: Vec<JobSummary>,
    pub total_count: usize,
}

/// Per-status counts across all persisted jobs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Filesystem-backed job storage.
pub struct TaskPersistence {
    root: PathBuf,
}

impl TaskPersistence {
    /// Open (creating directories as needed) a persistence root.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        for sub in ["tasks", "reports"] {
            fs::create_dir_all(root.join(sub))
                .map_err(|e| Error::state(format!("{}: {e}", root.display())))?;
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{id}.json"))
    }

    fn reports_path(&self, id: &str) -> PathBuf {
        self.root.join("reports").join(format!("{id}.json"))
    }

    /// Mint a job id and persist its initial state. The id embeds the
    /// process id so concurrent orchestrator processes sharing one storage
    /// root keep disjoint namespaces.
    pub fn create_job(&self, input: JobInput) -> Result<JobState> {
        let id = format!(
            "job-{}-{}-{}",
            Utc::now().timestamp_millis(),
            std::process::id(),
            JOB_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let job = JobState::new(id, input);
        self.save_job(&job)?;
        Ok(job)
    }

    pub fn save_job(&self, job: &JobState) -> Result<()> {
        let content = serde_json::to_string_pretty(job)
            .map_err(|e| Error::state(format!("serialize job {}: {e}", job.id)))?;
        atomic_write(&self.job_path(&job.id), &content)
    }

    pub fn load_job(&self, id: &str) -> Result<Option<JobState>> {
        match fs::read_to_string(self.job_path(id)) {
            Ok(content) => {
                let job = serde_json::from_str(&content)
                    .map_err(|e| Error::state(format!("parse job {id}: {e}")))?;
                Ok(Some(job))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::state(format!("read job {id}: {e}"))),
        }
    }

    /// Load, patch, bump `updated_at`, save. Returns the patched state, or
    /// `None` for an unknown id.
    pub fn update_job(
        &self,
        id: &str,
        patch: impl FnOnce(&mut JobState),
    ) -> Result<Option<JobState>> {
        let Some(mut job) = self.load_job(id)? else {
            return Ok(None);
        };
        patch(&mut job);
        job.updated_at = Utc::now();
        self.save_job(&job)?;
        Ok(Some(job))
    }

    /// Remove a job's state and reports. Returns whether the job existed.
    pub fn delete_job(&self, id: &str) -> Result<bool> {
        let existed = self.job_path(id).exists();
        for path in [self.job_path(id), self.reports_path(id)] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::state(format!("{}: {e}", path.display()))),
            }
        }
        Ok(existed)
    }

    pub fn save_results(&self, id: &str, results: &[TaskResult]) -> Result<()> {
        let content = serde_json::to_string_pretty(results)
            .map_err(|e| Error::state(format!("serialize results {id}: {e}")))?;
        atomic_write(&self.reports_path(id), &content)
    }

    pub fn load_results(&self, id: &str) -> Result<Option<Vec<TaskResult>>> {
        match fs::read_to_string(self.reports_path(id)) {
            Ok(content) => {
                let results = serde_json::from_str(&content)
                    .map_err(|e| Error::state(format!("parse results {id}: {e}")))?;
                Ok(Some(results))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::state(format!("read results {id}: {e}"))),
        }
    }

    /// Paginated history, newest jobs first. `limit` is clamped to [1, 100].
    pub fn history(&self, limit: usize, offset: usize) -> Result<HistoryPage> {
        let limit = limit.clamp(1, 100);
        let mut jobs = self.load_all_jobs()?;
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        let total_count = jobs.len();
        let tasks = jobs
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(summarize)
            .collect();
        Ok(HistoryPage { tasks, total_count })
    }

    pub fn stats(&self) -> Result<PersistStats> {
        let mut stats = PersistStats::default();
        for job in self.load_all_jobs()? {
            stats.total += 1;
            match job.status {
                JobStatus::Pending => stats.pending += 1,
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed => stats.failed += 1,
                _ => stats.in_progress += 1,
            }
        }
        Ok(stats)
    }

    /// Remove terminal jobs whose last update is older than `days`,
    /// together with their reports and event files. Returns the count.
    pub fn prune_terminal_older_than(&self, days: u64) -> Result<usize> {
        let cutoff = Utc::now() - chrono::Duration::days(days as i64);
        let mut removed = 0;
        for job in self.load_all_jobs()? {
            if job.is_terminal() && job.updated_at < cutoff {
                self.delete_job(&job.id)?;
                let events = self.root.join("events").join(format!("{}.ndjson", job.id));
                match fs::remove_file(&events) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(Error::state(format!("{}: {e}", events.display()))),
                }
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn load_all_jobs(&self) -> Result<Vec<JobState>> {
        let tasks_dir = self.root.join("tasks");
        let mut jobs = Vec::new();
        let entries = fs::read_dir(&tasks_dir)
            .map_err(|e| Error::state(format!("{}: {e}", tasks_dir.display())))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                // Unreadable or half-migrated files are skipped, not fatal.
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(job) = serde_json::from_str::<JobState>(&content) {
                        jobs.push(job);
                    }
                }
            }
        }
        Ok(jobs)
    }
}

fn summarize(job: JobState) -> JobSummary {
    let completed_at = job.is_terminal().then_some(job.updated_at);
    JobSummary {
        id: job.id,
        kind: job.input.kind.as_str().to_string(),
        url: job.input.url,
        status: job.status,
        created_at: job.created_at,
        completed_at,
        summary: job.final_report.map(|r| r.summary),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{Task, TaskStatus};
    use tempfile::TempDir;

    fn persistence() -> (TempDir, TaskPersistence) {
        let tmp = TempDir::new().unwrap();
        let persistence = TaskPersistence::new(tmp.path()).unwrap();
        (tmp, persistence)
    }

    fn sample_results() -> Vec<TaskResult> {
        let task = Task {
            id: "T1".to_string(),
            title: "t".to_string(),
            description: "d".to_string(),
            priority: 1,
        };
        vec![TaskResult::new(&task, TaskStatus::Success, "ok")]
    }

    // ── Round trips ───────────────────────────────────────────────────────

    #[test]
    fn create_save_load_round_trip() {
        let (_tmp, persistence) = persistence();
        let job = persistence
            .create_job(JobInput::github("https://github.com/o/r"))
            .unwrap();
        assert!(job.id.starts_with("job-"));

        let loaded = persistence.load_job(&job.id).unwrap().unwrap();
        assert_eq!(loaded, job);
        assert_eq!(persistence.load_job("job-unknown").unwrap(), None);
    }

    #[test]
    fn job_ids_are_unique() {
        let (_tmp, persistence) = persistence();
        let a = persistence.create_job(JobInput::local("/tmp")).unwrap();
        let b = persistence.create_job(JobInput::local("/tmp")).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn update_patches_and_bumps_updated_at() {
        let (_tmp, persistence) = persistence();
        let job = persistence.create_job(JobInput::local("/tmp")).unwrap();

        let updated = persistence
            .update_job(&job.id, |j| {
                j.solver_progress.total_tasks = 7;
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.solver_progress.total_tasks, 7);
        assert!(updated.updated_at >= job.updated_at);

        let reloaded = persistence.load_job(&job.id).unwrap().unwrap();
        assert_eq!(reloaded.solver_progress.total_tasks, 7);
        assert!(persistence
            .update_job("job-unknown", |_| {})
            .unwrap()
            .is_none());
    }

    #[test]
    fn results_round_trip() {
        let (_tmp, persistence) = persistence();
        let results = sample_results();
        persistence.save_results("job-1", &results).unwrap();
        assert_eq!(persistence.load_results("job-1").unwrap().unwrap(), results);
        assert_eq!(persistence.load_results("job-2").unwrap(), None);
    }

    #[test]
    fn delete_removes_both_files() {
        let (tmp, persistence) = persistence();
        let job = persistence.create_job(JobInput::local("/tmp")).unwrap();
        persistence.save_results(&job.id, &sample_results()).unwrap();

        assert!(persistence.delete_job(&job.id).unwrap());
        assert_eq!(persistence.load_job(&job.id).unwrap(), None);
        assert_eq!(persistence.load_results(&job.id).unwrap(), None);
        assert!(!persistence.delete_job(&job.id).unwrap());
        assert!(tmp.path().join("tasks").exists());
    }

    // ── History ───────────────────────────────────────────────────────────

    #[test]
    fn history_pages_newest_first() {
        let (_tmp, persistence) = persistence();
        let mut ids = Vec::new();
        for i in 0..5 {
            let mut job = JobState::new(
                format!("job-{i:03}"),
                JobInput::github("https://github.com/o/r"),
            );
            job.created_at = Utc::now() + chrono::Duration::seconds(i);
            persistence.save_job(&job).unwrap();
            ids.push(job.id);
        }

        let page = persistence.history(2, 0).unwrap();
        assert_eq!(page.total_count, 5);
        assert_eq!(page.tasks.len(), 2);
        assert_eq!(page.tasks[0].id, "job-004");
        assert_eq!(page.tasks[1].id, "job-003");

        let next = persistence.history(2, 2).unwrap();
        assert_eq!(next.tasks[0].id, "job-002");

        let tail = persistence.history(10, 4).unwrap();
        assert_eq!(tail.tasks.len(), 1);
        assert_eq!(tail.tasks[0].id, "job-000");
    }

    #[test]
    fn history_limit_is_clamped() {
        let (_tmp, persistence) = persistence();
        for i in 0..3 {
            persistence
                .save_job(&JobState::new(format!("job-{i}"), JobInput::local("/tmp")))
                .unwrap();
        }
        // limit 0 behaves as 1.
        let page = persistence.history(0, 0).unwrap();
        assert_eq!(page.tasks.len(), 1);
        assert_eq!(page.total_count, 3);
    }

    #[test]
    fn summary_projection_carries_terminal_fields() {
        let (_tmp, persistence) = persistence();
        let mut job = JobState::new("job-1", JobInput::github("https://github.com/o/r"));
        job.advance(JobStatus::Analyzing).unwrap();
        job.advance(JobStatus::Analyzed).unwrap();
        job.advance(JobStatus::Executing).unwrap();
        job.advance(JobStatus::Completed).unwrap();
        job.final_report = Some(crate::job::FinalReport {
            summary: "3 task(s), 3 committed".to_string(),
            total_tasks: 3,
            completed_tasks: 3,
            failed_tasks: 0,
            duration_ms: 1234,
        });
        persistence.save_job(&job).unwrap();

        let page = persistence.history(10, 0).unwrap();
        let summary = &page.tasks[0];
        assert_eq!(summary.kind, "github_url");
        assert_eq!(summary.status, JobStatus::Completed);
        assert!(summary.completed_at.is_some());
        assert_eq!(summary.summary.as_deref(), Some("3 task(s), 3 committed"));
    }

    #[test]
    fn stats_count_by_status() {
        let (_tmp, persistence) = persistence();
        let pending = JobState::new("job-a", JobInput::local("/tmp"));
        persistence.save_job(&pending).unwrap();

        let mut failed = JobState::new("job-b", JobInput::local("/tmp"));
        failed.mark_failed("boom");
        persistence.save_job(&failed).unwrap();

        let mut running = JobState::new("job-c", JobInput::local("/tmp"));
        running.advance(JobStatus::Analyzing).unwrap();
        persistence.save_job(&running).unwrap();

        let stats = persistence.stats().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 0);
    }

    #[test]
    fn prune_removes_only_old_terminal_jobs() {
        let (tmp, persistence) = persistence();

        let mut old_done = JobState::new("job-old-done", JobInput::local("/tmp"));
        old_done.mark_failed("boom");
        old_done.updated_at = Utc::now() - chrono::Duration::days(30);
        persistence.save_job(&old_done).unwrap();
        persistence
            .save_results("job-old-done", &sample_results())
            .unwrap();
        let events_dir = tmp.path().join("events");
        fs::create_dir_all(&events_dir).unwrap();
        fs::write(events_dir.join("job-old-done.ndjson"), "{}\n").unwrap();

        let mut old_live = JobState::new("job-old-live", JobInput::local("/tmp"));
        old_live.advance(JobStatus::Analyzing).unwrap();
        old_live.updated_at = Utc::now() - chrono::Duration::days(30);
        persistence.save_job(&old_live).unwrap();

        let mut fresh = JobState::new("job-fresh", JobInput::local("/tmp"));
        fresh.mark_failed("boom");
        persistence.save_job(&fresh).unwrap();

        let removed = persistence.prune_terminal_older_than(7).unwrap();
        assert_eq!(removed, 1);
        assert!(persistence.load_job("job-old-done").unwrap().is_none());
        assert!(!events_dir.join("job-old-done.ndjson").exists());
        assert!(persistence.load_job("job-old-live").unwrap().is_some());
        assert!(persistence.load_job("job-fresh").unwrap().is_some());
    }

    #[test]
    fn corrupt_files_are_skipped_in_listings() {
        let (tmp, persistence) = persistence();
        persistence
            .save_job(&JobState::new("job-good", JobInput::local("/tmp")))
            .unwrap();
        fs::write(tmp.path().join("tasks").join("job-bad.json"), "{oops").unwrap();

        let page = persistence.history(10, 0).unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.tasks[0].id, "job-good");
    }

    #[test]
    fn dates_serialize_as_iso_8601() {
        let (tmp, persistence) = persistence();
        let job = persistence.create_job(JobInput::local("/tmp")).unwrap();
        let raw = fs::read_to_string(tmp.path().join("tasks").join(format!("{}.json", job.id)))
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let created = value["createdAt"].as_str().unwrap();
        assert!(created.contains('T'));
        assert!(DateTime::parse_from_rfc3339(created).is_ok());
    }
}
