//! Shared harness for orchestrator integration tests.

#![allow(dead_code)]

pub mod fake_downloader;

use std::path::PathBuf;
use std::time::Duration;

use mdq_core::config::MdqConfig;
use mdq_core::scheduler::{Orchestrator, Subscription, TaskUpdate};
use mdq_core::task_db::{NewTask, TaskDb, TaskId, TaskOptions, TaskRecord, TaskState};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(10);

pub struct Harness {
    pub dir: TempDir,
    pub downloads: PathBuf,
    pub db: TaskDb,
    pub orch: Orchestrator,
}

/// Config pointing at the fake downloader in `dir`.
pub fn config(dir: &TempDir, limit: usize) -> MdqConfig {
    let mut cfg = MdqConfig::default();
    cfg.max_concurrent = limit;
    cfg.cancel_grace_secs = 2;
    cfg.downloader.program = fake_downloader::install(dir.path())
        .to_string_lossy()
        .into_owned();
    cfg
}

pub async fn open_db(dir: &TempDir) -> TaskDb {
    TaskDb::open_at(dir.path().join("state").join("tasks.db"))
        .await
        .unwrap()
}

pub async fn start(limit: usize) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let cfg = config(&dir, limit);
    start_with(dir, cfg).await
}

pub async fn start_with(dir: TempDir, cfg: MdqConfig) -> Harness {
    let downloads = dir.path().join("downloads");
    std::fs::create_dir_all(&downloads).unwrap();
    let db = open_db(&dir).await;
    let orch = Orchestrator::start(db.clone(), &cfg).await.unwrap();
    Harness {
        dir,
        downloads,
        db,
        orch,
    }
}

impl Harness {
    pub fn request(&self, mode: &str, name: &str) -> NewTask {
        NewTask {
            locator: fake_downloader::locator(mode, name),
            content_id: name.to_string(),
            title: name.to_string(),
            format_selector: "best".to_string(),
            dest_dir: self.downloads.clone(),
            auth_hint: None,
            options: TaskOptions::default(),
        }
    }

    pub async fn submit(&self, mode: &str, name: &str) -> TaskId {
        self.orch.submit(self.request(mode, name)).await.unwrap().id
    }

    /// Let a `hold` download finish.
    pub fn release(&self, name: &str) {
        std::fs::write(self.downloads.join(format!("release-{name}")), b"").unwrap();
    }

    pub fn output(&self, name: &str) -> PathBuf {
        self.downloads.join(format!("{name}.mp4"))
    }

    pub fn partial(&self, name: &str) -> PathBuf {
        self.downloads.join(format!("{name}.mp4.part"))
    }

    /// Poll until the task reaches `state`.
    pub async fn wait_for(&self, id: TaskId, state: TaskState) -> TaskRecord {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let task = self.orch.get(id).await.unwrap();
            if task.state == state {
                return task;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {id} stuck in {} waiting for {state}",
                task.state
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Poll until the downloader has reported progress (the process is up and running).
    pub async fn wait_for_progress(&self, id: TaskId) -> TaskRecord {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let task = self.orch.get(id).await.unwrap();
            if task.state == TaskState::Downloading && task.progress > 0.0 {
                return task;
            }
            assert!(tokio::time::Instant::now() < deadline, "task {id} never reported progress");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    pub async fn count_in(&self, state: TaskState) -> usize {
        self.orch
            .list_active()
            .await
            .iter()
            .filter(|t| t.state == state)
            .count()
    }
}

/// Next event, failing the test if none arrives in time.
pub async fn next_event(sub: &mut Subscription) -> TaskUpdate {
    tokio::time::timeout(WAIT, sub.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("subscription closed")
}

/// Collect events until the first terminal one (inclusive).
pub async fn events_until_terminal(sub: &mut Subscription) -> Vec<TaskUpdate> {
    let mut out = Vec::new();
    loop {
        let update = next_event(sub).await;
        let done = update.event.is_terminal();
        out.push(update);
        if done {
            return out;
        }
    }
}
