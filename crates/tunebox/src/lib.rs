pub mod cli;
pub mod config;
pub mod runtime;

mod commands;
mod library;
mod mdns;
mod server;
mod song_info;
