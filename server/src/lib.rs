//! # Authority Server Library
//!
//! The authoritative peer for the local-authority object-sync protocol. The
//! server holds the canonical copy of every replicated object, arbitrates
//! ownership, executes commands, and re-broadcasts rpcs and position
//! updates to the other peers.
//!
//! ## Core Responsibilities
//!
//! ### Ownership Arbitration
//! Every request and release runs through the per-object state machine in
//! `shared::ownership`. The server is the single writer: at any instant it
//! observes at most one owner per object, and every accepted transition is
//! broadcast to all peers. Denied requests are silent by design.
//!
//! ### Dispatch and Forwarding
//! Incoming envelopes are validated against the callback registry before
//! anything runs. Commands execute here only; client-originated rpcs are
//! re-broadcast to the other connections with an explicit exclusion set
//! (loopback connections, plus the sender when the callback was predicted
//! there), then executed on the canonical world.
//!
//! ### Position Tracking
//! Owner-originated waypoints are gated on current ownership, applied to
//! the canonical positions through the shared follower algorithm, and
//! forwarded to every non-owner.
//!
//! ## Architecture Design
//!
//! All object state is owned by one `select!` event loop; dedicated tokio
//! tasks handle socket receive, socket send, and timeout sweeps, talking to
//! the loop over unbounded channels. This keeps every mutation of world,
//! arbiter, and position buffers single-threaded.
//!
//! ## Module Organization
//!
//! - `authority`: socket-free protocol logic (world, arbiter, dispatch,
//!   forwarding decisions), driven directly by the integration tests.
//! - `peer_manager`: connection roster, address lookup, timeouts.
//! - `network`: UDP transport, the event loop, and packet routing.

pub mod authority;
pub mod network;
pub mod peer_manager;
