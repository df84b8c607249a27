//! gridwalk Deterministic Simulation Testing (DST) Harness
//!
//! This crate hosts a whole grid inside one process: a block of contiguous
//! regions plus one isolated region, each running its own
//! `TransferCoordinator` against a simulated network and simulated viewers.
//!
//! # Core Principle: One Paused Clock
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: tokio's paused clock only advances when every task is blocked
//! - **Network**: region-to-region calls with latency, partitions and refusals
//! - **Randomness**: capability paths and ids derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SimWorld                            │
//! │  ┌───────────┐   SimNetwork    ┌───────────┐                 │
//! │  │ RegionHost│◄───────────────►│ RegionHost│   ...  Island   │
//! │  │  R00      │  create/update/ │  R01      │                 │
//! │  └─────▲─────┘  close/objects  └─────▲─────┘                 │
//! │        │  EventQueue / ViewerClient  │                       │
//! │  ┌─────┴─────────────────────────────┴─────┐                 │
//! │  │  SimViewer (arrives after a delay)      │                 │
//! │  └─────────────────────────────────────────┘                 │
//! │                        Oracle (grid-wide invariants)         │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use gridwalk_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TeleportFar);
//! assert!(result.passed);
//! ```

mod context;
mod error;
mod ids;
mod network;
mod oracle;
mod region;
mod runner;
mod viewer;
mod world;
pub mod scenarios;

pub use context::SimContext;
pub use error::{ensure, SimError};
pub use ids::DeterministicIds;
pub use network::{NetworkStats, RemoteCall, SimNetwork, SimNetworkController};
pub use oracle::{Oracle, Violation};
pub use region::{RegionHost, RegionStats, SimRegion};
pub use runner::{ScenarioMetrics, ScenarioResult, ScenarioRunner};
pub use viewer::{SimEventQueue, SimViewer, ViewerEvent};
pub use world::{SimCapabilities, SimConfig, SimGrid, SimHomes, SimWorld};
