//! Opening a board from the command line.
//!
//! A session is one context: it resolves the workspace, opens the record in
//! the data directory and loads the initial view, exactly as a browser tab
//! would on page load.

use crate::file_storage::FileStorage;
use std::path::PathBuf;
use taskboard_core::bus::{ChangeBus, StorageEventBus};
use taskboard_core::location::{self, LocationError, MemoryLocation};
use taskboard_core::storage::StorageError;
use taskboard_core::workspace::{WorkspaceId, WorkspaceIdError};
use taskboard_core::{
    BoardConfig, Dashboard, StartupReport, Store, Task, Workspace, WorkspaceResolver,
};
use thiserror::Error;
use tracing::info;

/// Page URL used when none is given.
pub const DEFAULT_URL: &str = "http://localhost/taskboard/";

pub type FileBus = ChangeBus<FileStorage>;
pub type FileBoard = Dashboard<FileStorage, FileBus>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Invalid workspace: {0}")]
    Workspace(#[from] WorkspaceIdError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Location error: {0}")]
    Location(#[from] LocationError),

    #[error("No task matches {0:?}")]
    NoMatch(String),

    #[error("{count} tasks match {prefix:?}; use more characters")]
    Ambiguous { prefix: String, count: usize },
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub data_dir: PathBuf,
    /// Explicit workspace id, overriding the URL
    pub workspace: Option<String>,
    /// Page URL; may carry `?ws=` and a share token
    pub url: Option<String>,
    pub config: BoardConfig,
    /// Recorded in the audit of status changes
    pub actor: Option<String>,
}

pub struct Session {
    pub storage: FileStorage,
    pub workspace: Workspace,
    pub location: MemoryLocation,
    pub config: BoardConfig,
    pub board: FileBoard,
    pub report: StartupReport,
}

impl Session {
    pub fn open(options: SessionOptions) -> Result<Self, SessionError> {
        let SessionOptions {
            data_dir,
            workspace,
            url,
            config,
            actor,
        } = options;

        let (workspace, location) = match (workspace, url) {
            (Some(id), url) => {
                let id: WorkspaceId = id.parse()?;
                let href = url.unwrap_or_else(|| DEFAULT_URL.to_string());
                let href = location::set_param(&href, &config.workspace_param, id.as_str())?;
                (Workspace::explicit(id), MemoryLocation::new(href))
            }
            (None, Some(url)) => {
                let location = MemoryLocation::new(url);
                let workspace = WorkspaceResolver::new(config.workspace_param.clone()).resolve(&location);
                (workspace, location)
            }
            (None, None) => {
                let id = WorkspaceId::default_id();
                let href = location::set_param(DEFAULT_URL, &config.workspace_param, id.as_str())?;
                (Workspace::explicit(id), MemoryLocation::new(href))
            }
        };
        info!("Using workspace {} ({:?})", workspace.id(), workspace.source());

        let storage = FileStorage::open(data_dir)?;
        let key = workspace.record_key(&config.storage_prefix);
        let bus = ChangeBus::StorageEvents(StorageEventBus::new(storage.clone(), key));
        let store = Store::new(storage.clone(), bus, &workspace, &config);

        let mut board = Dashboard::new(store, &config);
        if let Some(actor) = actor {
            board = board.with_actor(actor);
        }
        let report = board.open(&location);

        Ok(Self {
            storage,
            workspace,
            location,
            config,
            board,
            report,
        })
    }

    /// The page URL after startup (workspace embedded, share token removed).
    pub fn url(&self) -> String {
        self.location.current()
    }

    /// Full id of the single task whose id starts with `prefix`.
    pub fn resolve_task_id(&self, prefix: &str) -> Result<String, SessionError> {
        resolve_id(self.board.tasks(), prefix)
    }
}

fn resolve_id(tasks: &[Task], prefix: &str) -> Result<String, SessionError> {
    if prefix.is_empty() {
        return Err(SessionError::NoMatch(String::new()));
    }
    if let Some(task) = tasks.iter().find(|t| t.id == prefix) {
        return Ok(task.id.clone());
    }
    let matches: Vec<&Task> = tasks.iter().filter(|t| t.id.starts_with(prefix)).collect();
    match matches.as_slice() {
        [] => Err(SessionError::NoMatch(prefix.to_string())),
        [task] => Ok(task.id.clone()),
        many => Err(SessionError::Ambiguous {
            prefix: prefix.to_string(),
            count: many.len(),
        }),
    }
}
