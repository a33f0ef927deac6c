//! Cloudide - ephemeral per-project sandbox containers with a browser
//! terminal and editor channel.

pub mod config;
pub mod container;
pub mod docker;
pub mod editor;
pub mod error;
pub mod http_server;
pub mod project;
pub mod state;
pub mod terminal;
pub mod upgrade;
pub mod workspace;
