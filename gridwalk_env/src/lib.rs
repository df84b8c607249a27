//! gridwalk Environment Abstraction Layer
//!
//! This crate provides the seams that let the agent migration protocol run
//! against **Production** services (tokio, HTTP) or the deterministic
//! **Simulation** harness.
//!
//! # Core Concept
//!
//! Everything the protocol cannot control is behind a trait:
//! - Time, task spawning and randomness (`GridContext`)
//! - Region-to-region calls (`SimulationService`)
//! - The grid directory (`GridService`)
//!
//! The payloads crossing those seams (`AgentCircuit`, `AgentSnapshot`,
//! `SceneObject`, ...) live here too, so both sides of a hand-off agree on
//! their shape.
//!
//! # Example
//!
//! ```ignore
//! use gridwalk_env::{GridContext, SimulationService};
//!
//! async fn push<Ctx: GridContext>(ctx: &Ctx, sim: &dyn SimulationService) {
//!     ctx.sleep(Duration::from_millis(200)).await;
//!     sim.update_agent(&destination, &snapshot).await?;
//! }
//! ```

mod context;
mod network;
mod types;
mod wire;
mod error;
mod tokio_impl;

pub use context::GridContext;
pub use network::{GridService, SimulationService};
pub use types::{AgentId, ItemId, ObjectId, RegionHandle, RegionId, RegionInfo, SessionId};
pub use wire::{
    AgentCircuit, AgentSnapshot, AvatarAppearance, CreateObjectRequest, CrossRegion, EdgeBehavior,
    Position, SceneObject, TeleportFinish, TeleportFlags, AGENT_CONTROL_FLY,
};
pub use error::EnvError;
pub use tokio_impl::TokioContext;
