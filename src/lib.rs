//! cms-pricer: price medical treatment plans against CMS Medicare fee
//! schedules
//!
//! The crate wires two tightly-coupled subsystems over a snapshot-backed
//! reference store:
//!
//! - The **geographic resolver** maps a ZIP/ZIP+4 at a valuation date to
//!   a pricing locality through a strict precedence hierarchy, with a
//!   geodesic nearest-neighbor fallback and a structured trace for every
//!   call.
//! - The **pricing orchestrator** decomposes a treatment plan into
//!   lines, dispatches each to the engine for its setting (physician,
//!   outpatient, inpatient, surgical, laboratory, durable equipment,
//!   drugs), threads beneficiary cost sharing through the lines, and
//!   records an auditable, replayable run.
//!
//! All money is integer cents; fee-schedule rows are effective-dated and
//! digest-identified so any two runs can be compared for dataset parity
//! and any past run can be replayed bit-for-bit.
//!
//! # Examples
//!
//! ```no_run
//! use std::sync::Arc;
//! use cms_pricer::api::AppState;
//! use cms_pricer::config::Settings;
//! use cms_pricer::store::PgStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::from_env();
//! let store = Arc::new(PgStore::connect(&settings.database_url).await?);
//! let state = AppState::new(settings, store);
//! cms_pricer::api::serve(state).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod engines;
pub mod pricing;
pub mod resolver;
pub mod snapshot;
pub mod store;
pub mod trace;
pub mod types;
