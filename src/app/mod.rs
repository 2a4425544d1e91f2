pub mod config;

pub use config::{Config, NotifyChannel};
