pub mod client;
pub mod metrics;
pub mod types;
mod url;
