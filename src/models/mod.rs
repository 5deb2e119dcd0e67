//! Core data models for the fleet object store control plane.
//!
//! Records map to the `objects` table via `sqlx::FromRow`; the wire
//! representations serialize with `serde` in the kebab-case shape the
//! fleet SDKs expect.

pub mod caller;
pub mod object;
pub mod subscription;
