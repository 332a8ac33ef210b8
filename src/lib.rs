pub mod config;
pub mod dashboard;
pub mod error;

pub use config::Config;
pub use dashboard::Dashboard;
pub use error::{DashboardError, Result};
