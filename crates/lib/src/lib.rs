//! pkgdigest-lib: package digestion and upgrade versioning
//!
//! This crate turns an application type and its service manifests into
//! versioned package documents:
//! - `params`: parameter tables and `[Name]` reference resolution
//! - `digest`: merging import policies and overrides into a digested tree
//! - `upgrade`: comparing a target tree against the running one and
//!   assigning rollout versions
//! - `sync`: checksum-witnessed publishing to a `store`
//! - `builder`: the provision, create and upgrade phases end to end

pub mod builder;
pub mod checksum;
pub mod config;
pub mod consts;
pub mod digest;
pub mod manifest;
pub mod package;
pub mod params;
pub mod store;
pub mod sync;
pub mod upgrade;
pub mod util;
pub mod validate;
pub mod version;
