//! HTTP server for Laurel

pub mod http;

pub use http::{run, AppState};
