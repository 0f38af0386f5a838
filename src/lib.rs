//! Ondevice - local content decisioning
//!
//! Evaluates personalization and experimentation decisions on the client
//! instead of calling the remote decision service for every request, while
//! staying consistent with the remote service's semantics:
//! - Versioned rule artifact polled over HTTP and published atomically
//! - Feasibility check deciding what can be resolved locally
//! - Context collation (time, user agent, page, custom parameters, geo)
//! - Deterministic visitor allocation for experiment branches
//! - Response assembly for mboxes, views and page loads
//! - Asynchronous display notifications with a bounded queue
//!
//! # Architecture
//!
//! ```text
//! request → feasibility → collators → RuleExecutor → DetailsExecutor → response
//!                                                          ↓
//!                                          NotificationDeliveryService
//! ```
//!
//! # Example
//!
//! ```ignore
//! use ondevice_core::{ClientConfig, OnDeviceDecisioningService};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ClientConfig::from_file("ondevice.toml")?;
//!     let service = OnDeviceDecisioningService::builder(config, transport).build()?;
//!     service.start()?;
//!
//!     let response = service.execute_request(&request)?;
//!     println!("status: {}", response.status);
//!
//!     service.stop().await;
//!     Ok(())
//! }
//! ```

pub mod allocation;
pub mod artifact;
pub mod assembler;
pub mod collator;
pub mod config;
pub mod error;
pub mod executor;
pub mod feasibility;
pub mod geo;
pub mod loader;
pub mod locator;
pub mod logic;
pub mod macros;
pub mod notification;
pub mod service;
pub mod trace;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use allocation::allocate;
pub use artifact::{Rule, RuleArtifact, RuleSet};
pub use config::{ClientConfig, NotificationPoolConfig};
pub use error::{DecisioningError, Result};
pub use feasibility::{evaluate_feasibility, FeasibilityVerdict};
pub use loader::{ArtifactSource, FetchOutcome, HttpArtifactSource, RuleLoader};
pub use locator::ClusterLocator;
pub use logic::{ConditionEvaluator, JsonLogic};
pub use notification::NotificationDeliveryService;
pub use service::{OnDeviceDecisioningService, ServiceBuilder};
pub use trace::TraceRecorder;
pub use transport::{DecisioningHandler, ExceptionHandler, Transport};
pub use types::{
    DeliveryRequest, DeliveryResponse, RequestDetails, TargetDeliveryRequest,
    TargetDeliveryResponse, ViewSelector,
};
