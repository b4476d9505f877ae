//! HTTP request handlers.

pub mod health;
pub mod internal;
pub mod proxy;
pub mod well_known;
