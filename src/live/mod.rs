//! WebSocket transport to the live interpreter model

pub mod client;
pub mod messages;

pub use client::{LiveSession, OutboundMessage};
pub use messages::{
    build_media_message, build_setup_message, build_system_directive, parse_server_message,
    ServerEvent, SetupMessage,
};
