#![warn(clippy::unwrap_used)]

pub mod responses;
pub mod rest;
pub mod run_rest;
pub mod sequence_rest;
pub mod server;
pub mod step_rest;
pub mod swagger;

pub use rest::AppState;
pub use server::{router, ApiServer};
pub use swagger::ApiDoc;
