//! High-level API for embedding the routing core

pub mod builder;

pub use builder::{ProxyRouter, ProxyRouterBuilder};
