//! Evidence preserver library.
//!
//! Captures web resources as tamper-evident evidence: every capture is stored
//! in several forms, each artifact is fingerprinted with SHA-512, and the
//! aggregate of those fingerprints is timestamped by an RFC 3161 authority.

#![allow(clippy::needless_raw_string_hashes)]

pub mod capture;
pub mod checksum;
pub mod config;
pub mod constants;
pub mod db;
pub mod http;
pub mod pipeline;
pub mod shell;
pub mod tsa;
