//! Identity types for sync targets.
//!
//! Every entity carries an opaque upstream ID and a mutable display name.
//! IDs are the only stable join key; names only decide where things live.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerRef {
    /// Opaque upstream ID.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Server URL, used to derive the remote repository name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ServerRef {
    /// Creates a server reference without a URL.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            url: None,
        }
    }

    /// Sets the server URL.
    #[must_use]
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Returns the hostname part of the URL, if any.
    pub fn host(&self) -> Option<&str> {
        let url = self.url.as_deref()?;
        let rest = url.split_once("://").map_or(url, |(_, rest)| rest);
        let authority = rest.split(['/', '?', '#']).next().unwrap_or(rest);
        let host = authority.rsplit_once('@').map_or(authority, |(_, h)| h);
        let host = host.split(':').next().unwrap_or(host);
        if host.is_empty() {
            None
        } else {
            Some(host)
        }
    }
}

/// A team within a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamRef {
    /// Opaque upstream ID.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl TeamRef {
    /// Creates a team reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// A database within a team.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatabaseRef {
    /// Opaque upstream ID.
    pub id: String,
    /// Display name.
    pub name: String,
}

impl DatabaseRef {
    /// Creates a database reference.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
        }
    }
}

/// One (server, team, database) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncTarget {
    /// Server.
    pub server: ServerRef,
    /// Team.
    pub team: TeamRef,
    /// Database.
    pub database: DatabaseRef,
}

impl SyncTarget {
    /// Creates a target.
    pub fn new(server: ServerRef, team: TeamRef, database: DatabaseRef) -> Self {
        Self {
            server,
            team,
            database,
        }
    }
}

impl fmt::Display for SyncTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} ({})",
            self.server.name, self.team.name, self.database.name, self.database.id
        )
    }
}
