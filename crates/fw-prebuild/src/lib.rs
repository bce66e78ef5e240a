pub mod config;
pub mod error;
pub mod executor;
pub mod libdeps;
pub mod minify;
pub mod modules;
pub mod packages;
pub mod patch;
pub mod planner;
pub mod project;

pub use error::{Error, Result};
