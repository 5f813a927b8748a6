//! Feedrank - a votable feed aggregator
//!
//! Periodically ingests registered RSS, Atom and JSON feeds into a shared
//! entry store and serves the entries ranked by a time-decayed vote score.

pub mod config;
pub mod db;
pub mod error;
pub mod ingest;
pub mod normalize;
pub mod parser;
pub mod ranking;
pub mod routes;
