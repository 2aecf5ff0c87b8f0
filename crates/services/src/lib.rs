#![forbid(unsafe_code)]

pub mod aggregator;
pub mod api;
pub mod config;
pub mod dashboard;
pub mod debouncer;
pub mod error;
pub mod http_client;
pub mod player;
pub mod position;
pub mod progress_service;
pub mod session;
pub mod store;
pub mod sync_client;

pub use progress_core::Clock;

pub use aggregator::ProgressAggregator;
pub use api::{CatalogApi, Dashboard, FormationProgressView, ProgressApi};
pub use config::SyncConfig;
pub use debouncer::ProgressDebouncer;
pub use error::{ConfigError, ErrorClass, PlayerError, ProgressServiceError, SyncError};
pub use http_client::HttpProgressClient;
pub use player::{LessonPlayer, Notice, OpenedLesson};
pub use position::{PositionSource, SimulatedPlayback};
pub use progress_service::{LocalProgressApi, ProgressService};
pub use session::{SessionConfig, SessionReport, run_session};
pub use store::{ProgressStore, StoreReader, UnsyncedWrite};
pub use sync_client::{ProgressSyncClient, SyncOutcome};
