//! # Lockstep Server Library
//!
//! This library provides the authoritative coordinator for a deterministic
//! lockstep game. Every peer runs the same simulation; the server decides
//! which commands run at which tick, streams a snapshot of the world to
//! joining peers and keeps everyone within a bounded distance of each other.
//!
//! ## Core Responsibilities
//!
//! ### Command Sequencing
//! Peers never apply their own actions locally. They send a command request,
//! the server validates it, stamps it with the earliest tick no peer may have
//! simulated yet and relays it to every peer, the sender included. Commands
//! for the same tick run in the order the server accepted them.
//!
//! ### Joining Mid-Game
//! A joining peer authenticates, waits for the single snapshot slot, receives
//! the serialized world in chunks and then replays the commands it missed
//! until it catches up with the frame clock.
//!
//! ### Keeping Peers Together
//! The frame clock advances once per tick and tells peers how far they may
//! simulate. Peers acknowledge their progress; ones that fall too far behind
//! are evicted. A checksum of the server's world is broadcast periodically so
//! peers can detect divergence.
//!
//! ## Architecture Design
//!
//! ### Single-Threaded Session
//! All shared state lives in [`session::Session`], which is driven from one
//! loop and performs no I/O itself. This eliminates locking and makes the
//! whole protocol testable in memory through [`transport::LoopbackTransport`].
//!
//! ### TCP Transport
//! Uses one TCP connection per peer carrying length-prefixed bincode frames.
//! Reader and writer tasks per connection talk to the session loop over
//! channels; see [`network`].
//!
//! ## Module Organization
//!
//! - `registry`: connections, outbound queues and the snapshot slot
//! - `join`: the per-connection join state machine
//! - `snapshot`: chunked world transfer with an adaptive window
//! - `sequencer`: validation, tick assignment and fan-out of commands
//! - `clock`: the shared tick counter and simulation ceiling
//! - `lag` / `sync`: eviction of slow peers and desync detection
//! - `session`: the loop tying the above together
//! - `network` / `transport`: sockets and the seam between them and the session
//! - `config` / `error`: settings and error types
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::ServerConfig;
//! use server::network::Server;
//! use shared::LedgerWorld;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::default();
//!     let server = Server::bind(config, LedgerWorld::new(), LedgerWorld::command_table()).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod join;
pub mod lag;
pub mod network;
pub mod registry;
pub mod sequencer;
pub mod session;
pub mod snapshot;
pub mod sync;
pub mod transport;
