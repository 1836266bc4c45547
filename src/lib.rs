pub mod config;
pub mod descriptor;
pub mod payload;
pub mod tracker;

pub use config::CloudEnv;
pub use tracker::Tracker;
