//! Pairing client implementations.
//!
//! - [`bridge`]: drives an external helper process over JSON lines on stdio.
//! - [`scripted`]: deterministic in-process client for tests and demos.

pub mod bridge;
pub mod protocol;
pub mod scripted;

pub use bridge::{BridgeClient, BridgeFactory};
pub use scripted::{
    ClientCall, Script, ScriptStep, ScriptedBehavior, ScriptedClient, ScriptedFactory,
};
