//! tus 1.0.0 client over `reqwest`.
//!
//! [`TusClient`] implements [`ChunkTransport`](chunkup_transfer::ChunkTransport)
//! against a tus server (creation + core protocol). [`ListingClient`] reads
//! the companion API that lists finished uploads.

pub mod client;
pub mod listing;

pub use client::{ClientError, TusClient, classify_status};
pub use listing::ListingClient;

#[cfg(test)]
mod mock;
