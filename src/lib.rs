//! activationd - periodic activation verification for an installed system.
//!
//! The daemon waits out a grace period measured from the key artifact's
//! modification time, then asks a verification server whether this copy is
//! activated, binding the request to a hardware fingerprint and/or the
//! product key depending on the distribution channel.
//!
//! # Modules
//!
//! - [`hardware`] - hardware fingerprint
//! - [`key_store`] - product key and grace-period marker
//! - [`verification`] - wire protocol and response interpretation
//! - [`scheduler`] - grace period, poll interval and reporting
//!
//! # Example
//!
//! ```rust,no_run
//! use activationd::config::DaemonConfig;
//! use activationd::events::TracingSink;
//! use activationd::hardware::SysfsHardware;
//! use activationd::key_store::KeyStore;
//! use activationd::scheduler::{Scheduler, SchedulerSettings};
//! use activationd::verification::VerificationClient;
//!
//! # async fn run() -> activationd::errors::ActivationResult<()> {
//! let config = DaemonConfig::load(None)?;
//! let store = KeyStore::from_config(&config.storage);
//! store.ensure_initialized().await?;
//!
//! let mut scheduler = Scheduler::new(
//!     SchedulerSettings::from_config(&config)?,
//!     store,
//!     SysfsHardware::default(),
//!     VerificationClient::from_config(&config),
//!     TracingSink,
//! );
//! scheduler.run().await;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod config;
pub mod errors;
pub mod events;
pub mod hardware;
pub mod key_store;
pub mod privilege;
pub mod scheduler;
pub mod verification;
