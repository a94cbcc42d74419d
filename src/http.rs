//! HTTP transport for token endpoint exchanges.

pub mod client;

pub use client::HttpTokenFetcher;
