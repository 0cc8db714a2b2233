//! Core building blocks for snapdf: configuration, the per-conversation
//! image store, the on-disk spool and the image-to-PDF encoder.

pub mod config;
pub mod pdf;
pub mod spool;
pub mod store;
