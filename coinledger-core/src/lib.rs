//! coinledger core — domain types, upstream providers, the CSV store and
//! read-only market queries.
//!
//! This crate holds everything the pipeline stages sit on:
//! - Domain types (listing rows, provider bars, stored history records)
//! - `ListingProvider` / `HistoryProvider` traits with CoinGecko and Yahoo clients
//! - A circuit breaker shared by the HTTP clients
//! - `CsvStore`, the single durable owner of listings and history tables
//! - `MarketQuery`, the read side over a listing snapshot

pub mod data;
pub mod domain;
pub mod query;
