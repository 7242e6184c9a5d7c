//! # thermal-printer
//!
//! ESC/POS thermal printer library - low-level printing capabilities only.
//!
//! ## Scope
//!
//! This crate handles HOW to print:
//! - Print document model (text, columns, images, QR codes, feed/cut/drawer)
//! - Text layout with double-width (CJK) characters
//! - ESC/POS command building and document encoding
//! - Windows-1252 / GBK code pages
//! - Raw TCP sessions to network printers (port 9100) and status queries
//!
//! Which printer gets which job, and when, belongs to `printer-fleet`.
//!
//! ## Example
//!
//! ```ignore
//! use thermal_printer::{Alignment, ColumnItem, Encoder, NetworkPrinter, PrintItem, Printer};
//!
//! let items = vec![
//!     PrintItem::text("Table 12"),
//!     PrintItem::columns(vec![
//!         ColumnItem::new("Fried rice", 30, Alignment::Left, true)?,
//!         ColumnItem::new("9.50", 18, Alignment::Right, false)?,
//!     ]),
//!     PrintItem::cut(),
//! ];
//! let data = Encoder::default().encode(&items)?;
//!
//! let printer = NetworkPrinter::new("192.168.1.100", 9100)?;
//! printer.print(&data).await?;
//! ```

mod connection;
mod document;
mod encoder;
mod encoding;
mod error;
mod escpos;
mod layout;
mod raster;
mod status;

// Re-exports
pub use connection::{
    ConnectionState, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT, DEFAULT_PORT,
    DEFAULT_PROBE_TIMEOUT, NetworkPrinter, Printer, PrinterConnection, probe,
};
pub use document::{
    Alignment, ColumnItem, ColumnRow, DEFAULT_COLUMN_WIDTH, DEFAULT_CUT_FEED, DEFAULT_QR_SIZE,
    Document, FontSize, ImageItem, PrintItem, QrCodeItem, TextItem,
};
pub use encoder::{Encoder, EncoderConfig, PaperWidth, encode};
pub use encoding::{CodePage, encode_text};
pub use error::{PrintError, PrintResult};
pub use escpos::{EscPosBuilder, font_select_command, status_request_command};
pub use layout::{
    any_column_contains_wide_character, contains_wide_character, layout_columns, pad_and_align,
    split_into_lines, visual_width,
};
pub use raster::Raster;
pub use status::{PrinterStatus, StatusKind, StatusReport, is_status_byte};

#[cfg(feature = "image")]
pub use raster::raster_from_image;

/// Raw command bytes, for tools that inspect encoded streams
pub mod commands {
    pub use crate::escpos::{DLE, EOT, ESC, FS, GS, LF, QR_MAX_PAYLOAD, RASTER_BAND_ROWS};
}
