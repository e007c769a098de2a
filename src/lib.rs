pub mod app;
pub mod audio;
pub mod cli;
pub mod config;
pub mod notation;
pub mod recognition;
pub mod session;
