//! UCXSync Library
//!
//! Fleet-aware capture file synchronization: mirrors a project from every
//! mounted (node, share) source into one local destination and tracks
//! capture completion across the cluster.

pub mod capture;
pub mod config;
pub mod copy;
pub mod disk;
pub mod engine;
pub mod fs_scan;
pub mod logging;
pub mod models;
pub mod monitor;
pub mod mount;
pub mod tracker;
pub mod web;
