#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod error;
pub mod realtime;
pub mod ws;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use realtime::Client;
pub use ws::ConnectionState;
pub use ws::config::{Config, HeartbeatConfig, ReconnectConfig};
