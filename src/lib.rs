//! Mimic traffic-obfuscation tunnel
//!
//! A client and server that keep one logical session alive over a
//! sequence of short-lived physical connections, each fronted as
//! traffic to a different public domain. A yamux session runs over a
//! hot-swappable virtual connection, so applications see a stable
//! stream while the transport identity underneath rotates and
//! outbound traffic is shaped to the fronted domain's behavioral
//! profile.

pub mod client;
pub mod config;
pub mod constants;
pub mod logging;
pub mod obfuscation;
pub mod presets;
pub mod protocol;
pub mod server;
pub mod transport;
