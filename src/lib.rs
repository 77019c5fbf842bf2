//! Asynchronous photo-feed pipeline: fetch an XML feed of image URLs,
//! download the referenced images, and serve full-resolution and thumbnail
//! variants from a persistent on-disk cache.
//!
//! The crate is organized into three layers:
//!
//! - [`feed`] - Feed download and XML parsing into an ordered URL list
//! - [`cache`] - Resource-addressed disk cache with async load/save pipelines
//! - [`gallery`] - Per-photo load-state machines and the item collection
//!
//! All blocking work (network, disk, decoding) runs on background workers;
//! completion is delivered through channels so an interactive consumer never
//! blocks.

pub mod cache;
pub mod config;
pub mod feed;
pub mod gallery;
pub mod util;
