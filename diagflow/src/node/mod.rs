//! The per-node RPC collaborator.
//!
//! The engine talks to every node through the [`NodeClient`] trait. The
//! transport (HTTP, gRPC, an in-process fake) is the embedding
//! application's choice.

mod client;

#[cfg(test)]
pub use client::MockNodeClient;
pub use client::{NodeClient, NodeStatusReport};
