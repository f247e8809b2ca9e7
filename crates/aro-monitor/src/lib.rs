pub mod config;
pub mod differ;
pub mod fetcher;
pub mod monitor;
pub mod notify;
pub mod parser;
pub mod store;
pub mod types;

pub use config::Config;
pub use monitor::{Monitor, RunError, RunReport, RunState};

pub const DEFAULT_LISTINGS_URL: &str = "https://www.lincolncommonapartments.com/floorplans";
