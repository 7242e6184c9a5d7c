//! Document to ESC/POS encoder
//!
//! Walks a document once and drives [`EscPosBuilder`]. The only state kept
//! between items is the printer mode last selected (alignment, character
//! size, code page), so mode commands are sent only when something changes.

use crate::document::{Alignment, ColumnRow, DEFAULT_QR_SIZE, ImageItem, PrintItem, TextItem};
use crate::encoding::CodePage;
use crate::error::{PrintError, PrintResult};
use crate::escpos::{EscPosBuilder, QR_MAX_PAYLOAD};
use crate::layout::{any_column_contains_wide_character, layout_columns, split_into_lines};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// Paper roll presets
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaperWidth {
    #[default]
    #[serde(rename = "80mm")]
    Mm80,
    #[serde(rename = "58mm")]
    Mm58,
}

impl PaperWidth {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "80" | "80mm" => Some(PaperWidth::Mm80),
            "58" | "58mm" => Some(PaperWidth::Mm58),
            _ => None,
        }
    }
}

/// Printable area of the target printer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderConfig {
    /// Characters per line at normal size
    pub line_width: usize,
    /// Printable width in dots
    pub dots_width: u32,
}

impl EncoderConfig {
    pub fn new(paper: PaperWidth) -> Self {
        match paper {
            PaperWidth::Mm80 => Self {
                line_width: 48,
                dots_width: 576,
            },
            PaperWidth::Mm58 => Self {
                line_width: 32,
                dots_width: 384,
            },
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self::new(PaperWidth::Mm80)
    }
}

/// ESC/POS encoder for print documents
#[derive(Debug, Clone, Default)]
pub struct Encoder {
    config: EncoderConfig,
}

/// Printer mode as last set in the stream
struct Mode {
    alignment: Alignment,
    size: (u8, u8),
    code_page: Option<CodePage>,
}

impl Default for Mode {
    // ESC @ state
    fn default() -> Self {
        Self {
            alignment: Alignment::Left,
            size: (1, 1),
            code_page: None,
        }
    }
}

impl Encoder {
    pub fn new(config: EncoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Encode a whole document
    ///
    /// Every item is checked before any byte is produced; one bad item
    /// rejects the document with `InvalidArgument`.
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub fn encode(&self, items: &[PrintItem]) -> PrintResult<Vec<u8>> {
        for (index, item) in items.iter().enumerate() {
            self.check(item).map_err(|e| match e {
                PrintError::InvalidArgument(msg) => {
                    PrintError::invalid(format!("item {} ({}): {}", index, item.kind(), msg))
                }
                other => other,
            })?;
        }

        let mut b = EscPosBuilder::new();
        let mut mode = Mode::default();

        for item in items {
            match item {
                PrintItem::Text(text) => self.text(&mut b, &mut mode, text)?,
                PrintItem::Column(row) => self.columns(&mut b, &mut mode, row)?,
                PrintItem::Feed { lines } => {
                    b.feed(*lines);
                }
                PrintItem::Cut { units } => {
                    b.cut(*units);
                }
                PrintItem::CashBox { units } => {
                    b.open_drawer(*units);
                }
                PrintItem::Image(image) => self.image(&mut b, &mut mode, image)?,
                PrintItem::QrCode(qr) => {
                    set_alignment(&mut b, &mut mode, qr.alignment);
                    let size = if qr.units == 0 { DEFAULT_QR_SIZE } else { qr.units };
                    b.qr_code(&qr.text, size)?;
                    b.newline();
                }
            }
        }

        let data = b.build();
        debug!(bytes = data.len(), "document encoded");
        Ok(data)
    }

    fn check(&self, item: &PrintItem) -> PrintResult<()> {
        item.validate()?;
        match item {
            PrintItem::Image(image) if image.bitmap.width > self.config.dots_width => {
                Err(PrintError::invalid(format!(
                    "image is {} dots wide, printable width is {}",
                    image.bitmap.width, self.config.dots_width
                )))
            }
            PrintItem::QrCode(qr) if qr.text.len() > QR_MAX_PAYLOAD => Err(PrintError::invalid(
                format!("QR payload exceeds {} bytes", QR_MAX_PAYLOAD),
            )),
            _ => Ok(()),
        }
    }

    fn text(&self, b: &mut EscPosBuilder, mode: &mut Mode, item: &TextItem) -> PrintResult<()> {
        let printable = item.font_size.chars_per_line(self.config.line_width);
        let lines = split_into_lines(&item.text, printable, item.wrap_words)?;

        set_alignment(b, mode, item.alignment);
        set_size(b, mode, item.font_size.multipliers())?;
        if item.bold {
            b.bold(true);
        }
        for line in &lines {
            let line = line.trim_end();
            if !line.is_empty() {
                let page = CodePage::for_text(line);
                set_code_page(b, mode, page);
                b.text(line, page);
            }
            b.newline();
        }
        if item.bold {
            b.bold(false);
        }
        Ok(())
    }

    fn columns(&self, b: &mut EscPosBuilder, mode: &mut Mode, row: &ColumnRow) -> PrintResult<()> {
        let rows = layout_columns(&row.columns)?;
        let page = if any_column_contains_wide_character(&row.columns) {
            CodePage::Gbk
        } else {
            CodePage::Latin
        };

        set_alignment(b, mode, Alignment::Left);
        set_size(b, mode, row.font_size.multipliers())?;
        set_code_page(b, mode, page);
        if row.bold {
            b.bold(true);
        }
        for line in &rows {
            b.text(line.trim_end(), page);
            b.newline();
        }
        if row.bold {
            b.bold(false);
        }
        Ok(())
    }

    fn image(&self, b: &mut EscPosBuilder, mode: &mut Mode, item: &ImageItem) -> PrintResult<()> {
        let bitmap = &item.bitmap;
        let free = self.config.dots_width - bitmap.width;
        let offset = match item.alignment {
            Alignment::Left => 0,
            Alignment::Center => free / 2,
            Alignment::Right => free,
        };

        // the raster carries its own offset, the printer must not shift it again
        set_alignment(b, mode, Alignment::Left);
        if offset == 0 {
            b.raster(bitmap)?;
        } else {
            b.raster(&bitmap.place(offset + bitmap.width, offset))?;
        }
        b.newline();
        Ok(())
    }
}

fn set_alignment(b: &mut EscPosBuilder, mode: &mut Mode, alignment: Alignment) {
    if mode.alignment != alignment {
        b.align(alignment);
        mode.alignment = alignment;
    }
}

fn set_size(b: &mut EscPosBuilder, mode: &mut Mode, size: (u8, u8)) -> PrintResult<()> {
    if mode.size != size {
        b.font_size(size.0, size.1)?;
        mode.size = size;
    }
    Ok(())
}

fn set_code_page(b: &mut EscPosBuilder, mode: &mut Mode, page: CodePage) {
    if mode.code_page != Some(page) {
        b.code_page(page);
        mode.code_page = Some(page);
    }
}

/// Encode with the default 80mm configuration
pub fn encode(items: &[PrintItem]) -> PrintResult<Vec<u8>> {
    Encoder::default().encode(items)
}
