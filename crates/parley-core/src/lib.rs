//! # parley-core
//!
//! Foundation types for the Parley conversational gateway.
//!
//! This crate provides the shared vocabulary that all other Parley crates
//! depend on:
//!
//! - **Branded IDs**: [`ids::SessionId`], [`ids::ThreadId`] as newtypes
//! - **Events**: [`events::ReplyEvent`] for backend reply streaming,
//!   [`events::ClientEvent`] / [`events::ServerEvent`] for the WebSocket
//!   wire protocol
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other parley crates.

#![deny(unsafe_code)]

pub mod events;
pub mod ids;
