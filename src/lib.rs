//! # lanework
//!
//! Lane-aware task distribution for conversation post-processing.
//!
//! Work is published to a delayed topic exchange under lane-scoped routing
//! keys, consumed by the vectorize worker with an admission gate, and
//! recovered by a periodic pending rescan. A second periodic job
//! consolidates each subject's recent messages into long-term facts.
//! Singleton jobs coordinate across replicas with a TTL-bounded distributed
//! lock; outbound calls resolve lane deployments through a polled service
//! registry.

pub mod broker;
pub mod cache;
pub mod clients;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod kv;
pub mod lane;
pub mod lock;
pub mod memory;
pub mod model;
pub mod telemetry;
