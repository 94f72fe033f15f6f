//! Helpers around the serial port and byte dumps.

#[cfg(test)]
pub(crate) mod mock;
mod ports;

use hexplay::HexViewBuilder;

pub use ports::{available_ports, open_and_setup_port};

/// Render `bytes` as a hex table, 16 bytes per row, for debug logs.
pub(crate) fn hex_view(bytes: &[u8]) -> String {
    HexViewBuilder::new(bytes)
        .address_offset(0)
        .row_width(16)
        .finish()
        .to_string()
}
