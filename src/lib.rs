// Library exports for the Warden multi-process supervisor

pub mod cli;
pub mod config;
pub mod context;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod process;
pub mod servers;
pub mod supervisor;
