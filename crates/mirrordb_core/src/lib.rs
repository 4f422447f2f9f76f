//! # mirrordb core
//!
//! Mirrors exported workspace databases into name-addressed, git-versioned
//! file trees, one repository per upstream server.
//!
//! This crate provides:
//! - Deterministic name sanitization and path resolution
//! - Atomic restructuring of ID-addressed exports into the canonical layout
//! - Metadata sidecars and metadata-first discovery
//! - Per-server git repositories with first-sync publishing
//! - Derived artifacts (`ERD.md`, `SCRIPTS.md`)
//! - The [`SyncPipeline`] that ties these together, with ordered progress events
//!
//! ## Key Invariants
//!
//! - Identical names always resolve to the identical path
//! - A canonical database root is never a mix of old and new content
//! - Staging directories never outlive a sync attempt
//! - At most one writer per server working tree within a process
//! - Every progress sequence ends in exactly one `done` or `failed`

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod artifacts;
mod config;
mod error;
mod fetch;
pub mod fsutil;
mod git;
mod locks;
mod metadata;
mod path;
mod pipeline;
mod progress;
mod remote;
mod repository;
mod restructure;
mod types;

pub use artifacts::{
    ArtifactGenerator, ArtifactReport, ArtifactSet, ArtifactStatus, DiagramGenerator,
    DocumentationGenerator,
};
pub use config::{
    CollisionPolicy, GitConfig, MirrorConfig, PublishPolicy, RemoteConfig, SanitizeConfig,
    STAGING_DIR, STRUCTURE_VERSION,
};
pub use error::{CoreError, CoreResult};
pub use fetch::{
    Catalog, CatalogDatabase, CatalogServer, CatalogTeam, CommandFetcher, DirectoryFetcher,
    Fetcher, StaticCatalog,
};
pub use git::Git;
pub use locks::ServerLocks;
pub use metadata::{Discovery, LegacyMapping, MetadataRecord, MetadataStore, METADATA_FILE};
pub use path::{database_dir_name, files_dir, objects_dir, PathResolver};
pub use pipeline::{PublishOutcome, SyncFailure, SyncOutcome, SyncPipeline};
pub use progress::{NullProgress, Phase, ProgressEvent, ProgressLog, ProgressSink};
pub use remote::{GitRemoteHost, LocalBareHost, MockRemoteHost, RemoteCall, RemoteHost};
pub use repository::{redact_url, CommitId, CommitSummary, RepositoryManager};
pub use restructure::{CanonicalLayout, Restructurer, StagingGuard};
pub use types::{DatabaseRef, ServerRef, SyncTarget, TeamRef};
