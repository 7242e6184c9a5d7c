//! Print document model
//!
//! A document is an ordered list of [`PrintItem`]s. Hosts usually describe
//! documents as loosely-typed JSON; [`Document::from_json`] validates such a
//! description and fills in defaults.

use crate::error::{PrintError, PrintResult};
use crate::layout::split_into_lines;
use crate::raster::Raster;
use serde::{Deserialize, Serialize};

/// Default column width when the description omits it
pub const DEFAULT_COLUMN_WIDTH: usize = 10;

/// Default QR module size in dots
pub const DEFAULT_QR_SIZE: u8 = 4;

/// Feed amount used by the default cut (GS V 66 n)
pub const DEFAULT_CUT_FEED: u8 = 0x66;

/// Horizontal alignment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
}

impl Alignment {
    /// Parameter of the ESC a command
    pub fn as_escpos(self) -> u8 {
        match self {
            Alignment::Left => 0,
            Alignment::Center => 1,
            Alignment::Right => 2,
        }
    }
}

/// Character size preset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FontSize {
    #[default]
    Normal,
    Wide,
    Tall,
    Big,
}

impl FontSize {
    /// (height, width) multipliers
    pub fn multipliers(self) -> (u8, u8) {
        match self {
            FontSize::Normal => (1, 1),
            FontSize::Wide => (1, 2),
            FontSize::Tall => (2, 1),
            FontSize::Big => (2, 2),
        }
    }

    /// Characters per line at this size for a given normal-size width
    pub fn chars_per_line(self, line_width: usize) -> usize {
        (line_width / self.multipliers().1 as usize).max(1)
    }
}

/// One column of a [`PrintItem::Column`] row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnItem {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub alignment: Alignment,
    /// Width in character cells
    #[serde(default = "default_column_width")]
    pub width: usize,
    #[serde(default)]
    pub wrap_words: bool,
    /// Wrapped text, filled by the layout engine
    #[serde(skip)]
    pub lines: Vec<String>,
}

fn default_column_width() -> usize {
    DEFAULT_COLUMN_WIDTH
}

impl ColumnItem {
    pub fn new(
        text: impl Into<String>,
        width: usize,
        alignment: Alignment,
        wrap_words: bool,
    ) -> PrintResult<Self> {
        let mut column = Self {
            text: text.into(),
            alignment,
            width,
            wrap_words,
            lines: Vec::new(),
        };
        column.layout()?;
        Ok(column)
    }

    /// (Re)wrap `text` into `lines`
    pub fn layout(&mut self) -> PrintResult<()> {
        if self.width == 0 {
            return Err(PrintError::invalid("column width must be > 0"));
        }
        self.lines = split_into_lines(&self.text, self.width, self.wrap_words)?;
        Ok(())
    }
}

/// Text block payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    #[serde(default, deserialize_with = "text_or_lines")]
    pub text: String,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub font_size: FontSize,
    #[serde(default)]
    pub wrap_words: bool,
}

/// Multi-column row payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnRow {
    pub columns: Vec<ColumnItem>,
    #[serde(default)]
    pub bold: bool,
    #[serde(default)]
    pub font_size: FontSize,
}

/// Image payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageItem {
    pub bitmap: Raster,
    #[serde(default)]
    pub alignment: Alignment,
}

/// QR code payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QrCodeItem {
    pub text: String,
    #[serde(default)]
    pub alignment: Alignment,
    /// Module size in dots (1-16); 0 selects the default
    #[serde(default)]
    pub units: u8,
}

/// A single printable unit
///
/// Each variant carries only the fields that are meaningful for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum PrintItem {
    Text(TextItem),
    Feed {
        #[serde(default, alias = "feedLines")]
        lines: u8,
    },
    Cut {
        /// 0 = full cut, 1 = partial cut, otherwise feed `units` then full cut
        #[serde(default = "default_cut_units")]
        units: u8,
    },
    Column(ColumnRow),
    Image(ImageItem),
    #[serde(rename = "QRCODE")]
    QrCode(QrCodeItem),
    #[serde(rename = "CASHBOX")]
    CashBox {
        /// Drawer connector: 0 = pin 2, 1 = pin 5
        #[serde(default)]
        units: u8,
    },
}

fn default_cut_units() -> u8 {
    DEFAULT_CUT_FEED
}

/// Accept either a string or an array of strings (joined by newlines)
fn text_or_lines<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum TextOrLines {
        One(String),
        Many(Vec<String>),
    }

    Ok(match TextOrLines::deserialize(deserializer)? {
        TextOrLines::One(s) => s,
        TextOrLines::Many(lines) => lines.join("\n"),
    })
}

impl PrintItem {
    pub fn text(text: impl Into<String>) -> Self {
        PrintItem::Text(TextItem {
            text: text.into(),
            bold: false,
            alignment: Alignment::Left,
            font_size: FontSize::Normal,
            wrap_words: false,
        })
    }

    pub fn feed(lines: u8) -> Self {
        PrintItem::Feed { lines }
    }

    /// Feed past the tear bar, then cut; same as a bare `{"type":"CUT"}`
    pub fn cut() -> Self {
        PrintItem::Cut {
            units: DEFAULT_CUT_FEED,
        }
    }

    pub fn columns(columns: Vec<ColumnItem>) -> Self {
        PrintItem::Column(ColumnRow {
            columns,
            bold: false,
            font_size: FontSize::Normal,
        })
    }

    pub fn qr_code(text: impl Into<String>) -> Self {
        PrintItem::QrCode(QrCodeItem {
            text: text.into(),
            alignment: Alignment::Left,
            units: 0,
        })
    }

    pub fn image(bitmap: Raster, alignment: Alignment) -> Self {
        PrintItem::Image(ImageItem { bitmap, alignment })
    }

    pub fn cash_box() -> Self {
        PrintItem::CashBox { units: 0 }
    }

    /// Short name used in logs and errors
    pub fn kind(&self) -> &'static str {
        match self {
            PrintItem::Text(_) => "TEXT",
            PrintItem::Feed { .. } => "FEED",
            PrintItem::Cut { .. } => "CUT",
            PrintItem::Column(_) => "COLUMN",
            PrintItem::Image(_) => "IMAGE",
            PrintItem::QrCode(_) => "QRCODE",
            PrintItem::CashBox { .. } => "CASHBOX",
        }
    }

    /// Check the per-type invariants
    pub fn validate(&self) -> PrintResult<()> {
        match self {
            PrintItem::Column(row) => {
                if row.columns.is_empty() {
                    return Err(PrintError::invalid("column row without columns"));
                }
                if row.columns.iter().any(|c| c.width == 0) {
                    return Err(PrintError::invalid("column width must be > 0"));
                }
                Ok(())
            }
            PrintItem::Image(image) => image.bitmap.validate(),
            PrintItem::QrCode(qr) => {
                if qr.text.is_empty() {
                    return Err(PrintError::invalid("QR code without payload"));
                }
                if qr.units > 16 {
                    return Err(PrintError::invalid(format!(
                        "QR module size {} out of range 1-16",
                        qr.units
                    )));
                }
                Ok(())
            }
            PrintItem::CashBox { units } if *units > 1 => Err(PrintError::invalid(format!(
                "drawer pin selector {} out of range 0-1",
                units
            ))),
            _ => Ok(()),
        }
    }
}

/// An ordered print document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document {
    pub items: Vec<PrintItem>,
}

impl Document {
    pub fn new(items: Vec<PrintItem>) -> Self {
        Self { items }
    }

    /// Build a document from a host description
    ///
    /// Every item is validated and column text is wrapped, so the result is
    /// ready for the encoder.
    pub fn from_json(value: serde_json::Value) -> PrintResult<Self> {
        let mut doc: Document = serde_json::from_value(value)
            .map_err(|e| PrintError::invalid(format!("malformed print document: {}", e)))?;
        for item in &mut doc.items {
            if let PrintItem::Column(row) = item {
                for column in &mut row.columns {
                    column.layout()?;
                }
            }
            item.validate()?;
        }
        Ok(doc)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl From<Vec<PrintItem>> for Document {
    fn from(items: Vec<PrintItem>) -> Self {
        Self { items }
    }
}
