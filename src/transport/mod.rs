// Swappable transport layer
//
// The virtual connection presents one stable byte stream to the
// multiplexer while the physical socket underneath it is rotated; the
// manager owns the client-side rotation sequence.

pub mod manager;
pub mod virtual_conn;

pub use manager::Manager;
pub use virtual_conn::{Retired, VirtualConn};
