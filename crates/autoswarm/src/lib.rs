//! Reconciliation engine for the node-local swarm/control-plane bridge.
//!
//! See each module for its slice of the design (§ references point back to
//! the specification this daemon implements):
//!   - [`model`] — the data model shared by translation and reconciliation.
//!   - [`gateway`] — the orchestrator contract (§4.1) plus its `bollard`-backed
//!     and in-memory implementations.
//!   - [`control_plane`] — the cached, write-through Dokploy-style client (§4.2).
//!   - [`translator`] — container → service-spec conversion (§4.3).
//!   - [`reconciler`] — the label/network diff-and-patch algorithm (§4.4).
//!   - [`supervisor`] — the dual-loop scheduler (§4.5).
//!   - [`daemon`] — startup wiring that ties the above into one aggregate.

pub mod config;
pub mod control_plane;
pub mod daemon;
pub mod error;
pub mod gateway;
pub mod model;
pub mod reconciler;
pub mod supervisor;
pub mod translator;
