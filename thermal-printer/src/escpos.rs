//! ESC/POS command builder
//!
//! Low-level fluent writer for the ESC/POS byte stream. It knows the
//! command layouts but nothing about documents; the encoder drives it.

use crate::document::Alignment;
use crate::encoding::{CodePage, encode_text};
use crate::error::{PrintError, PrintResult};
use crate::raster::Raster;

pub const ESC: u8 = 0x1B;
pub const GS: u8 = 0x1D;
pub const FS: u8 = 0x1C;
pub const DLE: u8 = 0x10;
pub const EOT: u8 = 0x04;
pub const LF: u8 = 0x0A;

/// Largest payload a model 2 QR code can store
pub const QR_MAX_PAYLOAD: usize = 7089;

/// Rows per GS v 0 block; taller images are split
pub const RASTER_BAND_ROWS: u32 = 256;

/// Character size command (GS ! n) for the given multipliers
///
/// Both multipliers must be within 1-8.
pub fn font_select_command(height: u8, width: u8) -> PrintResult<[u8; 3]> {
    if !(1..=8).contains(&height) || !(1..=8).contains(&width) {
        return Err(PrintError::invalid(format!(
            "font multiplier {}x{} out of range 1-8",
            height, width
        )));
    }
    Ok([GS, 0x21, ((width - 1) << 4) | (height - 1)])
}

/// Real-time status request (DLE EOT n), n = 1..4
pub fn status_request_command(n: u8) -> [u8; 3] {
    [DLE, EOT, n]
}

/// ESC/POS command builder
///
/// Builds ESC/POS byte sequences for thermal printers.
pub struct EscPosBuilder {
    buf: Vec<u8>,
}

impl EscPosBuilder {
    /// Create a builder; the stream starts with ESC @ (initialize)
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(&[ESC, 0x40]);
        Self { buf }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // === Text Output ===

    /// Write text in the given code page (no line terminator)
    pub fn text(&mut self, s: &str, page: CodePage) -> &mut Self {
        self.buf.extend_from_slice(&encode_text(s, page));
        self
    }

    /// Line feed
    pub fn newline(&mut self) -> &mut Self {
        self.buf.push(LF);
        self
    }

    /// Print and feed n lines (ESC d n)
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x64, lines]);
        self
    }

    pub fn code_page(&mut self, page: CodePage) -> &mut Self {
        self.buf.extend_from_slice(page.select_command());
        self
    }

    // === Alignment & Style ===

    /// ESC a n
    pub fn align(&mut self, alignment: Alignment) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x61, alignment.as_escpos()]);
        self
    }

    /// ESC E n
    pub fn bold(&mut self, on: bool) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x45, on as u8]);
        self
    }

    /// GS ! n
    pub fn font_size(&mut self, height: u8, width: u8) -> PrintResult<&mut Self> {
        let cmd = font_select_command(height, width)?;
        self.buf.extend_from_slice(&cmd);
        Ok(self)
    }

    // === Paper Control ===

    /// Cut paper
    ///
    /// 0 = full cut (GS V 0), 1 = partial cut (GS V 1), any other value
    /// feeds that many motion units and then cuts (GS V 66 n).
    pub fn cut(&mut self, units: u8) -> &mut Self {
        match units {
            0 => self.buf.extend_from_slice(&[GS, 0x56, 0x00]),
            1 => self.buf.extend_from_slice(&[GS, 0x56, 0x01]),
            n => self.buf.extend_from_slice(&[GS, 0x56, 0x42, n]),
        }
        self
    }

    // === Cash Drawer ===

    /// Kick the drawer on pin 2 (0) or pin 5 (1): ESC p m t1 t2
    pub fn open_drawer(&mut self, pin: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, 0x70, pin, 25, 250]);
        self
    }

    // === Raster Image ===

    /// GS v 0 raster blocks, split into bands of [`RASTER_BAND_ROWS`]
    pub fn raster(&mut self, raster: &Raster) -> PrintResult<&mut Self> {
        raster.validate()?;
        let stride = raster.stride();
        if stride > u16::MAX as usize {
            return Err(PrintError::invalid("raster too wide"));
        }

        let mut y = 0;
        while y < raster.height {
            let rows = (raster.height - y).min(RASTER_BAND_ROWS);
            // GS v 0 m xL xH yL yH
            self.buf.extend_from_slice(&[
                GS,
                0x76,
                0x30,
                0x00,
                (stride & 0xFF) as u8,
                (stride >> 8) as u8,
                (rows & 0xFF) as u8,
                (rows >> 8) as u8,
            ]);
            let start = y as usize * stride;
            let end = (y + rows) as usize * stride;
            self.buf.extend_from_slice(&raster.data[start..end]);
            y += rows;
        }
        Ok(self)
    }

    // === QR Code ===

    /// Print a QR code
    ///
    /// Size: 1-16 (module size in dots). The five GS ( k functions must be
    /// sent in this order.
    pub fn qr_code(&mut self, data: &str, size: u8) -> PrintResult<&mut Self> {
        if !(1..=16).contains(&size) {
            return Err(PrintError::invalid(format!(
                "QR module size {} out of range 1-16",
                size
            )));
        }
        let data_bytes = data.as_bytes();
        if data_bytes.is_empty() || data_bytes.len() > QR_MAX_PAYLOAD {
            return Err(PrintError::invalid(format!(
                "QR payload of {} bytes out of range 1-{}",
                data_bytes.len(),
                QR_MAX_PAYLOAD
            )));
        }

        // Function 165: Select model (Model 2)
        self.buf
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x04, 0x00, 0x31, 0x41, 0x32, 0x00]);

        // Function 167: Set module size
        self.buf
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x43, size]);

        // Function 169: Set error correction (M)
        self.buf
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x45, 0x31]);

        // Function 180: Store data
        let len = data_bytes.len() + 3;
        let p_l = (len & 0xFF) as u8;
        let p_h = ((len >> 8) & 0xFF) as u8;
        self.buf
            .extend_from_slice(&[GS, 0x28, 0x6B, p_l, p_h, 0x31, 0x50, 0x30]);
        self.buf.extend_from_slice(data_bytes);

        // Function 181: Print
        self.buf
            .extend_from_slice(&[GS, 0x28, 0x6B, 0x03, 0x00, 0x31, 0x51, 0x30]);

        Ok(self)
    }

    // === Raw Commands ===

    /// Write raw bytes directly
    pub fn raw(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    // === Build ===

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

impl Default for EscPosBuilder {
    fn default() -> Self {
        Self::new()
    }
}
