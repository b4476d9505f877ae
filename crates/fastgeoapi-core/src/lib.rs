//! Core types and utilities for fastgeoapi.
//!
//! This crate provides the foundational types used throughout the gateway:
//!
//! - **Secrets**: `SharedSecret`, used for the per-process internal key and the API key
//! - **Error types**: configuration and startup failures shared across crates
//!
//! # Example
//!
//! ```
//! use fastgeoapi_core::SharedSecret;
//!
//! // A fresh 256-bit key, generated once per process start
//! let key = SharedSecret::generate();
//!
//! assert!(key.matches(key.expose().as_bytes()));
//! assert!(!key.matches(b"guess"));
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod secret;

pub use error::{CoreError, Result};
pub use secret::{SecretError, SharedSecret};
