//! SQLite persistence for state that must survive process restarts.
//!
//! All access goes through one worker thread that owns the connection;
//! async callers send closures over a channel and await the reply.

use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

mod helpers;
mod migrations;
pub mod repositories;

use migrations::run_migrations;

pub use repositories::local_state::{keys, SavedLocation};

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

enum Target {
    File(PathBuf),
    Memory,
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Option<Arc<PathBuf>>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let inner = Self::spawn_worker(Target::File(db_path.clone()))?;
        info!("Database initialized at {}", db_path.display());

        Ok(Self {
            inner: Arc::new(inner),
            db_path: Some(Arc::new(db_path)),
        })
    }

    /// Non-persistent database, used when no data directory is available.
    pub fn in_memory() -> Result<Self> {
        let inner = Self::spawn_worker(Target::Memory)?;
        Ok(Self {
            inner: Arc::new(inner),
            db_path: None,
        })
    }

    fn spawn_worker(target: Target) -> Result<DatabaseInner> {
        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name("fieldtrack-db".into())
            .spawn(move || {
                let opened = match &target {
                    Target::File(path) => Connection::open(path),
                    Target::Memory => Connection::open_in_memory(),
                };
                let mut conn = match opened {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if matches!(target, Target::File(_)) {
                    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                        error!("Failed to enable WAL mode: {err}");
                    }
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        Ok(DatabaseInner {
            sender: command_tx,
            worker: Mutex::new(Some(worker)),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref().map(PathBuf::as_path)
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }
}
