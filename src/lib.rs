//! An anonymous confession board.
//!
//! The whole board is one JSON array kept in a file of a GitHub repository.
//! The [`server`] exposes it over HTTP at `/api/confessions`, appending with
//! a read-modify-write cycle that is conditioned on the file's revision, so a
//! concurrent writer is never silently overwritten. The [`client`] lists and
//! posts entries and falls back to a local cache when the server is down.

#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod config;
pub mod http;
pub mod metrics;
pub mod model;
pub mod server;
pub mod service;
pub mod state;
pub mod store;

#[cfg(test)]
mod test_utils;
