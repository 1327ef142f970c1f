//! fsocks: a two-endpoint SOCKS5 tunneling proxy with a multiplexed,
//! framed, obfuscated wire protocol between client and server.

pub mod core;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
