//! # Peer Client Library
//!
//! Client-side implementation of the local-authority object-sync protocol.
//! The client keeps a replica of the authoritative world and makes shared
//! objects feel local: predicted callbacks apply before the round trip,
//! ownership is assumed the moment it is requested, and non-owned objects
//! glide along broadcast waypoints instead of teleporting between updates.
//!
//! ## Architecture Overview
//!
//! ### Client-Side Prediction
//! Callbacks whose descriptors are marked predicted run immediately on the
//! invoking peer. The authority excludes this peer from the re-broadcast,
//! so the effect applies exactly once everywhere.
//!
//! ### Optimistic Ownership
//! A requesting peer treats itself as the owner as soon as the request is
//! sent. The next authoritative broadcast either confirms or corrects; a
//! silent denial is caught by a timer and the claim is dropped.
//!
//! ### Position Interpolation
//! While owning an object the client samples its motion and condenses it to
//! one waypoint per send interval. For everything else it walks the
//! received waypoint queue, snapping across large jumps.
//!
//! ## Module Organization
//!
//! - `replica`: the socket-free world replica (packet application,
//!   prediction, ownership views, waypoint following, the outbox).
//! - `network`: UDP transport and the receive/tick event loop.
//! - `demo`: a scripted interaction driver standing in for real input.

pub mod demo;
pub mod network;
pub mod replica;
