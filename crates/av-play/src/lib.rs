pub mod cli;
pub mod config;
pub mod runtime;

mod commands;
mod device;
mod playback;
