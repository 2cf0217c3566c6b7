//! Kiosk Feedback Library
//!
//! This library provides the client side of a satisfaction kiosk: taps are
//! delivered to the feedback API when possible and otherwise kept in a
//! durable queue that is drained, in order, once the API is reachable.
//!
//! - **config**: Environment-based configuration
//! - **event**: Satisfaction grades and the queued feedback event
//! - **storage**: Persisted key/value slots (file-backed and in-memory)
//! - **queue**: Durable FIFO of unacknowledged events
//! - **ident**: 16-digit local identifiers
//! - **client**: HTTP client for the feedback API
//! - **connectivity**: Online/offline signal and health probe
//! - **coordinator**: Immediate submission, queue draining and triggers
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use kiosk_feedback::client::FeedbackClient;
//! use kiosk_feedback::config::Config;
//! use kiosk_feedback::connectivity::Connectivity;
//! use kiosk_feedback::coordinator::{CoordinatorSettings, DeliveryCoordinator};
//! use kiosk_feedback::event::SatisfactionGrade;
//! use kiosk_feedback::storage::FileSlotStore;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!
//!     let client = FeedbackClient::new(&config).expect("Failed to create client");
//!     let store = FileSlotStore::open(&config.data_dir).expect("Failed to open data dir");
//!
//!     let coordinator = DeliveryCoordinator::new(
//!         Arc::new(client),
//!         Arc::new(store),
//!         Connectivity::new(true),
//!         CoordinatorSettings::from(&config),
//!     );
//!
//!     let outcome = coordinator.submit(SatisfactionGrade::VerySatisfied).await;
//!     println!("{:?}", outcome);
//! }
//! ```

pub mod client;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod event;
pub mod ident;
pub mod queue;
pub mod storage;

// Re-export commonly used types at crate root for convenience
pub use client::{ClientError, FeedbackClient, FeedbackTransport, PublicSummary, SubmitResponse};
pub use config::{Config, ConfigError};
pub use connectivity::Connectivity;
pub use coordinator::{
    CoordinatorSettings, DeliveryCoordinator, DeliveryStatus, DrainOutcome, DrainReport,
    SubmitOutcome,
};
pub use event::{FeedbackEvent, SatisfactionGrade};
pub use ident::NumericIdGenerator;
pub use queue::{PendingQueue, PopOutcome};
pub use storage::{FileSlotStore, MemorySlotStore, SlotStore, StorageError};
