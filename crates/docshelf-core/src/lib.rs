//! Core types and traits for docshelf.
//!
//! This crate provides the fundamental data structures shared by every
//! docshelf crate: the file/folder entity model, listing queries, the
//! [`Provider`] capability interface, errors and configuration.

mod config;
mod entity;
mod error;
mod progress;
mod provider;
mod query;

pub use config::{
    ConfigError, EngineConfig, ListingConfig, ListingConfigBuilder, TransferConfig,
    TransferConfigBuilder,
};
pub use entity::{Entity, EntityKind, EntityUid, ProviderId};
pub use error::{ProviderError, ProviderResult};
pub use progress::{NoProgress, ProgressSink};
pub use provider::{
    BoxFuture, ByteStream, Capabilities, ItemReport, Provider,
    ServerTransfer, TransferMode, collect_children, with_cancel,
};
pub use query::{FilterSpec, Page, PageQuery, SortField, SortSpec, normalize_search};

// Re-export the cancellation token so callers need not depend on tokio-util.
pub use tokio_util::sync::CancellationToken;
