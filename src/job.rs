//! Job/Part/DestinationProgress data model and its JSON-document
//! persistence. The Orchestrator is the only writer of a running Job; every
//! other reader gets a cloned snapshot (enforced by convention — this
//! module hands out owned values, never `&mut Job` across a thread
//! boundary).

use serde::{Deserialize, Serialize};

use crate::storage::StorageObject;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    Idle,
    Running,
    Paused,
    Cancelling,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PartStatus {
    Pending,
    Packaging,
    Uploading,
    Uploaded,
    Distributing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestStatus {
    Pending,
    Downloading,
    Staging,
    Extracting,
    Completed,
    Failed,
}

/// One destination as named in the Job's immutable input list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationSpec {
    pub host_alias: String,
    pub folder: String,
    pub store_config_name: String,
}

/// Per-part, per-destination progress record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationProgress {
    pub host_alias: String,
    pub status: DestStatus,
    pub percent: u8,
    pub error: Option<String>,
}

impl DestinationProgress {
    pub fn pending(host_alias: &str) -> Self {
        Self { host_alias: host_alias.to_string(), status: DestStatus::Pending, percent: 0, error: None }
    }

    /// Enforces invariant 6 of the testable properties: percent is
    /// non-decreasing except on transition to `Failed` or back to `Pending`.
    pub fn advance(&mut self, status: DestStatus, percent: u8) {
        match status {
            DestStatus::Pending => {
                self.status = status;
                self.percent = 0;
            }
            DestStatus::Failed => {
                // Percent is left at its last known value; only `retry` zeroes it.
                self.status = status;
            }
            _ => {
                self.status = status;
                self.percent = percent.max(self.percent);
            }
        }
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = DestStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn reset_for_retry(&mut self) {
        self.status = DestStatus::Pending;
        self.percent = 0;
        self.error = None;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Part {
    pub id: String,
    /// 1-based index within the job.
    pub index: u32,
    pub filename: String,
    pub size: Option<u64>,
    pub store_path: Option<String>,
    pub status: PartStatus,
    pub destinations: Vec<DestinationProgress>,
    pub retry_count: u32,
}

impl Part {
    pub fn new(index: u32, filename: String) -> Self {
        Self {
            id: format!("part-{index:03}"),
            index,
            filename,
            size: None,
            store_path: None,
            status: PartStatus::Pending,
            destinations: Vec::new(),
            retry_count: 0,
        }
    }

    pub fn destination_mut(&mut self, host_alias: &str) -> Option<&mut DestinationProgress> {
        self.destinations.iter_mut().find(|d| d.host_alias == host_alias)
    }

    pub fn all_destinations_terminal(&self) -> bool {
        self.destinations.iter().all(|d| matches!(d.status, DestStatus::Completed | DestStatus::Failed))
    }

    pub fn all_destinations_staged_or_further(&self) -> bool {
        self.destinations.iter().all(|d| {
            matches!(d.status, DestStatus::Staging | DestStatus::Extracting | DestStatus::Completed | DestStatus::Failed)
        })
    }

    /// Resets this part to `pending` with a fresh, zeroed destination list
    /// for an operator-requested retry (§7: per-item retry).
    pub fn reset_for_retry(&mut self, destinations: &[DestinationSpec]) {
        self.status = PartStatus::Pending;
        self.retry_count += 1;
        self.destinations = destinations.iter().map(|d| DestinationProgress::pending(&d.host_alias)).collect();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub source_host_alias: String,
    pub source_folder: String,
    pub destinations: Vec<DestinationSpec>,
    pub part_size_mib: u64,
    pub delete_local_after_upload: bool,
    pub delete_from_store_after_all_dest_done: bool,
    pub auto_extract: bool,
    pub status: JobStatus,
    pub parts: Vec<Part>,
    pub needs_split: bool,
    pub base_name: String,
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

impl Job {
    /// Builds a new idle Job, validating the invariants from the data model:
    /// at least one destination, and destination ids pairwise distinct and
    /// distinct from the source.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        name: String,
        source_host_alias: String,
        source_folder: String,
        destinations: Vec<DestinationSpec>,
        part_size_mib: u64,
        delete_local_after_upload: bool,
        delete_from_store_after_all_dest_done: bool,
        auto_extract: bool,
    ) -> anyhow::Result<Self> {
        if destinations.is_empty() {
            anyhow::bail!("a job requires at least one destination");
        }
        if source_folder.trim().is_empty() {
            anyhow::bail!("a job requires a non-empty source folder");
        }
        let mut seen = std::collections::HashSet::new();
        for dest in &destinations {
            if dest.host_alias == source_host_alias {
                anyhow::bail!("destination host '{}' must differ from the source host", dest.host_alias);
            }
            if !seen.insert(dest.host_alias.clone()) {
                anyhow::bail!("duplicate destination host '{}'", dest.host_alias);
            }
        }
        let now = chrono::Local::now().to_rfc3339();
        let epoch_ms = chrono::Local::now().timestamp_millis();
        Ok(Self {
            id,
            name,
            source_host_alias,
            source_folder,
            destinations,
            part_size_mib,
            delete_local_after_upload,
            delete_from_store_after_all_dest_done,
            auto_extract,
            status: JobStatus::Idle,
            parts: Vec::new(),
            needs_split: false,
            base_name: format!("transfer_{epoch_ms}"),
            created_at: now.clone(),
            updated_at: now,
        })
    }

    pub fn part_size_bytes(&self) -> u64 {
        self.part_size_mib * 1024 * 1024
    }

    pub fn part_filename(&self, index: u32) -> String {
        if self.needs_split {
            format!("{}.part{:03}.zip", self.base_name, index)
        } else {
            format!("{}.zip", self.base_name)
        }
    }

    pub fn part_mut(&mut self, part_id: &str) -> Option<&mut Part> {
        self.parts.iter_mut().find(|p| p.id == part_id)
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Local::now().to_rfc3339();
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let path = crate::storage::jobs_dir()?.join(format!("{}.json", self.id));
        self.save_to(path);
        Ok(())
    }

    pub fn load(id: &str) -> anyhow::Result<Self> {
        let path = crate::storage::jobs_dir()?.join(format!("{id}.json"));
        if !path.exists() {
            anyhow::bail!("no job with id '{id}'");
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn list_ids() -> anyhow::Result<Vec<String>> {
        let dir = crate::storage::jobs_dir()?;
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(dir)?.flatten() {
            if let Some(stem) = entry.path().file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dest(alias: &str) -> DestinationSpec {
        DestinationSpec { host_alias: alias.into(), folder: "/data".into(), store_config_name: "gdrive".into() }
    }

    #[test]
    fn rejects_empty_destinations() {
        let err =
            Job::new("j1".into(), "demo".into(), "src".into(), "/home/x".into(), vec![], 1024, false, false, false)
                .unwrap_err();
        assert!(err.to_string().contains("destination"));
    }

    #[test]
    fn rejects_destination_equal_to_source() {
        let err = Job::new(
            "j1".into(),
            "demo".into(),
            "src".into(),
            "/home/x".into(),
            vec![dest("src")],
            1024,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("differ from the source"));
    }

    #[test]
    fn rejects_duplicate_destinations() {
        let err = Job::new(
            "j1".into(),
            "demo".into(),
            "src".into(),
            "/home/x".into(),
            vec![dest("d1"), dest("d1")],
            1024,
            false,
            false,
            false,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn part_filename_switches_on_needs_split() {
        let mut job =
            Job::new("j1".into(), "demo".into(), "src".into(), "/home/x".into(), vec![dest("d1")], 1024, false, false, false)
                .unwrap();
        assert_eq!(job.part_filename(1), format!("{}.zip", job.base_name));
        job.needs_split = true;
        assert_eq!(job.part_filename(1), format!("{}.part001.zip", job.base_name));
        assert_eq!(job.part_filename(12), format!("{}.part012.zip", job.base_name));
    }

    #[test]
    fn destination_progress_percent_is_monotonic_until_retry() {
        let mut dp = DestinationProgress::pending("d1");
        dp.advance(DestStatus::Downloading, 10);
        dp.advance(DestStatus::Downloading, 40);
        dp.advance(DestStatus::Downloading, 20); // stale/out-of-order chunk must not regress
        assert_eq!(dp.percent, 40);
        dp.reset_for_retry();
        assert_eq!(dp.percent, 0);
        assert_eq!(dp.status, DestStatus::Pending);
    }

    #[test]
    fn destination_progress_keeps_last_percent_on_failure() {
        let mut dp = DestinationProgress::pending("d1");
        dp.advance(DestStatus::Downloading, 55);
        dp.advance(DestStatus::Failed, 0);
        assert_eq!(dp.status, DestStatus::Failed);
        assert_eq!(dp.percent, 55);
    }
}
