//! Workspace: the scope of one task collection.
//!
//! The workspace id rides in the page URL (`?ws=...`). The first context to
//! open a board without one generates an id and writes it back into the URL,
//! so a reload or a copied link lands in the same workspace. The id keys
//! both the store record and the broadcast channel.

use crate::location::{self, Location};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;
use tracing::{info, warn};

/// Workspace used when the location cannot be read or rewritten.
pub const DEFAULT_WORKSPACE: &str = "default";

const MAX_ID_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkspaceIdError {
    #[error("Workspace ID is empty")]
    Empty,
    #[error("Workspace ID is longer than 64 characters")]
    TooLong,
    #[error("Workspace ID may only contain letters, digits, '-' and '_'")]
    InvalidChar,
}

/// Identifier of a workspace.
///
/// Generated ids are 16 lowercase hex characters. Ids read from a URL may be
/// any 1-64 characters of `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Generate a new random id. Never all zeros.
    pub fn generate() -> Self {
        use rand::Rng;
        loop {
            let id: u64 = rand::rng().random();
            if id != 0 {
                return Self(format!("{:016x}", id));
            }
        }
    }

    pub fn default_id() -> Self {
        Self(DEFAULT_WORKSPACE.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for WorkspaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for WorkspaceId {
    type Err = WorkspaceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(WorkspaceIdError::Empty);
        }
        if s.len() > MAX_ID_LEN {
            return Err(WorkspaceIdError::TooLong);
        }
        if !s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(WorkspaceIdError::InvalidChar);
        }
        Ok(Self(s.to_string()))
    }
}

impl serde::Serialize for WorkspaceId {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&self.0)
    }
}

impl<'de> serde::Deserialize<'de> for WorkspaceId {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// How a workspace id was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceSource {
    /// Read from the location
    Location,
    /// Generated and written into the location
    Generated,
    /// Location unusable; using `DEFAULT_WORKSPACE`
    Fallback,
    /// Supplied directly by the host (CLI flag, test)
    Explicit,
}

/// A resolved workspace. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    id: WorkspaceId,
    source: WorkspaceSource,
}

impl Workspace {
    pub fn explicit(id: WorkspaceId) -> Self {
        Self {
            id,
            source: WorkspaceSource::Explicit,
        }
    }

    pub fn id(&self) -> &WorkspaceId {
        &self.id
    }

    pub fn source(&self) -> WorkspaceSource {
        self.source
    }

    /// Storage key of this workspace's record.
    pub fn record_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }

    /// Broadcast channel name for this workspace.
    pub fn channel_name(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.id)
    }
}

/// Derives the workspace for a context from its location.
#[derive(Debug, Clone)]
pub struct WorkspaceResolver {
    param: String,
}

impl WorkspaceResolver {
    pub fn new(param: impl Into<String>) -> Self {
        Self {
            param: param.into(),
        }
    }

    pub fn param(&self) -> &str {
        &self.param
    }

    /// Resolve the workspace, embedding a fresh id in the location if needed.
    ///
    /// Never fails: an unreadable or unwritable location yields the default
    /// workspace.
    pub fn resolve(&self, location: &dyn Location) -> Workspace {
        let href = match location.href() {
            Ok(href) => href,
            Err(e) => {
                warn!("Cannot read location ({}), using workspace {}", e, DEFAULT_WORKSPACE);
                return Self::fallback();
            }
        };

        if let Some(raw) = location::read_param(&href, &self.param) {
            match raw.parse::<WorkspaceId>() {
                Ok(id) => {
                    return Workspace {
                        id,
                        source: WorkspaceSource::Location,
                    };
                }
                Err(e) => warn!("Ignoring workspace id {:?} in location: {}", raw, e),
            }
        }

        let id = WorkspaceId::generate();
        let rewritten = match location::set_param(&href, &self.param, id.as_str()) {
            Ok(rewritten) => rewritten,
            Err(e) => {
                warn!("Cannot embed workspace id in {} ({}), using {}", href, e, DEFAULT_WORKSPACE);
                return Self::fallback();
            }
        };
        if let Err(e) = location.replace(&rewritten) {
            warn!("Cannot rewrite location ({}), using workspace {}", e, DEFAULT_WORKSPACE);
            return Self::fallback();
        }

        info!("Generated workspace {}", id);
        Workspace {
            id,
            source: WorkspaceSource::Generated,
        }
    }

    fn fallback() -> Workspace {
        Workspace {
            id: WorkspaceId::default_id(),
            source: WorkspaceSource::Fallback,
        }
    }
}

impl Default for WorkspaceResolver {
    fn default() -> Self {
        Self::new("ws")
    }
}
