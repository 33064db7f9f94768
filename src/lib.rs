//! IRC gateway for SmileBASIC Source chat.

pub mod config;
pub mod connection;
pub mod drawing;
pub mod error;
pub mod irc;
pub mod roster;
pub mod sbs;
pub mod server;
pub mod session;
pub mod text;
