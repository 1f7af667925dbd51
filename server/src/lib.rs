//! # Game Server Library
//!
//! This library provides the authoritative server for a small multiplayer
//! real-time strategy game. It owns the canonical world, runs the lockstep
//! simulation, and tells each client exactly as much about the world as
//! their units can currently see.
//!
//! ## Core Responsibilities
//!
//! ### Authoritative Simulation
//! All game rules are enforced here. Clients send orders, never state:
//! build, move, and attack requests are validated against ownership,
//! terrain, and resources, and illegal orders are dropped. Whatever the
//! server simulates is the game.
//!
//! ### Lockstep Coordination
//! The simulation advances one tick at a time and only when every player
//! has confirmed the previous tick. There is no tick timer; a session
//! moves as fast as its slowest player, and a configurable deadline tears
//! the session down if a player stalls the barrier for too long.
//!
//! ### Fog of War
//! Every cell and unit tracks which players currently perceive it and
//! which players have ever seen it. Clients are only told about things
//! inside their sensor circles, and each transition in or out of view is
//! reported exactly once.
//!
//! ## Architecture Design
//!
//! ### Single Coordinator Loop
//! One task owns all mutable state: the world, the session, the ledger,
//! and every connection. Per-socket reader tasks decode frames and forward
//! them over a channel; per-socket writer tasks drain byte queues. Nothing
//! else touches the state, so no locks are needed and every run of the
//! same inputs produces the same simulation.
//!
//! ### TCP Word-Stream Protocol
//! Messages travel as fixed-layout frames of big-endian 32-bit words with
//! a checksum word at the end. A lockstep game cannot tolerate loss or
//! reordering, so the stream transport does the heavy lifting and the
//! framing layer only needs to detect corruption and keep message
//! boundaries.
//!
//! ## Module Organization
//!
//! - [`network`]: listener, connection tasks, and the coordinator loop
//! - [`connection`]: per-connection handshake state, fault budget, outbox
//! - [`session`]: player slots and the session lifecycle
//! - [`lockstep`]: tick barrier, order queue, and the per-tick pipeline
//! - [`world`]: terrain, units, movement, combat, and build rules
//! - [`visibility`]: fog-of-war masks and notification sweeps
//! - [`ledger`]: per-player resource accounts
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::network::{Server, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig {
//!         port: 7777,
//!         required_players: 2,
//!         ..ServerConfig::default()
//!     };
//!
//!     // Runs until the session ends: a player disconnects mid-game, the
//!     // tick barrier times out, or the process is stopped.
//!     let mut server = Server::bind(config).await?;
//!     server.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod connection;
pub mod ledger;
pub mod lockstep;
pub mod network;
pub mod session;
pub mod visibility;
pub mod world;
