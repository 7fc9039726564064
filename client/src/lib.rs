//! # Lockstep Client Library
//!
//! This library provides the peer side of the lockstep protocol. A peer never
//! applies its own actions directly: it asks the server to schedule them and
//! runs every command, its own included, only when the server relays it back
//! with a tick and announces a ceiling that covers that tick.
//!
//! ## Module Organization
//!
//! ### Peer Module (`peer`)
//! The protocol state machine, free of I/O:
//! - Join handshake, password replies and snapshot requests
//! - Snapshot reassembly with a size check before the world is restored
//! - `FrameGate`, which releases buffered commands strictly at their tick
//! - Checksum comparison against the server's periodic `Sync`
//! - Periodic progress acknowledgements
//!
//! ### Network Module (`network`)
//! Runs a peer over a TCP connection with a reader task and a select loop.
//!
//! ### Bot Module (`bot`)
//! Random, always-permitted commands for headless test peers.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::Client;
//! use client::peer::PeerConfig;
//! use shared::{LedgerWorld, Role};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PeerConfig::new("observer", Role::Spectator);
//!     let mut client: Client<LedgerWorld> = Client::connect("127.0.0.1:3979", config).await?;
//!     client
//!         .run(Duration::from_secs(30), Duration::from_secs(1), |_| None)
//!         .await?;
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod network;
pub mod peer;
