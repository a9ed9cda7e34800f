//! Access token lifecycle management for Tidepool clients
//!
//! `TokenManager` keeps a valid access token on hand for a long-running
//! client. It performs the initial exchange on `start()`, refreshes
//! proactively on one of two cadences (see `policy`), coalesces concurrent
//! refresh demand into a single exchange, and applies a `FailurePolicy` when
//! the token endpoint misbehaves.
//!
//! ```no_run
//! # async fn run() -> tidepool_token::Result<()> {
//! use std::sync::Arc;
//! use tidepool_auth::{ClientConfig, Environment, HttpTokenClient};
//! use tidepool_token::{ManagerOptions, TokenManager};
//!
//! let client = Arc::new(HttpTokenClient::new(reqwest::Client::new()));
//! let manager = TokenManager::with_tokio(client, ManagerOptions::default());
//! manager.start(ClientConfig::new(Environment::Qa2, "tidepool-uploader")?, "refresh-token");
//! let token = manager.access_token().await?;
//! # let _ = token;
//! manager.close();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod events;
pub mod manager;
mod metrics;
pub mod policy;
pub mod schedule;

pub use error::{Error, Result};
pub use events::{CloseReason, ManagerStatus, TokenEvent};
pub use manager::{DEFAULT_IMMINENT_WINDOW, DEFAULT_WAIT_TIMEOUT, ManagerOptions, TokenManager};
pub use policy::{FailurePolicy, next_refresh_delay};
pub use schedule::{ScheduledTask, Scheduler, Task, TokioScheduler};
