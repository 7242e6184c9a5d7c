//! Code page handling for printed text
//!
//! Receipt printers do not understand UTF-8. Latin text goes out in
//! Windows-1252, anything with CJK characters goes out in GBK with the
//! printer's Chinese mode enabled.

use crate::layout::contains_wide_character;
use encoding_rs::{Encoding, GBK, WINDOWS_1252};

/// Character table used for a run of text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodePage {
    /// WPC1252 single-byte table (ESC t 16)
    Latin,
    /// GBK double-byte Chinese mode (FS &)
    Gbk,
}

impl CodePage {
    /// Pick the table able to print `text`
    pub fn for_text(text: &str) -> Self {
        if contains_wide_character(text) {
            CodePage::Gbk
        } else {
            CodePage::Latin
        }
    }

    /// Command sequence switching the printer to this table
    pub fn select_command(self) -> &'static [u8] {
        match self {
            // FS . (leave Chinese mode), ESC t 16 (WPC1252)
            CodePage::Latin => &[0x1C, 0x2E, 0x1B, 0x74, 16],
            // FS & (Chinese mode), FS C 1 (GBK), FS S 0 0 (no extra spacing)
            CodePage::Gbk => &[0x1C, 0x26, 0x1C, 0x43, 0x01, 0x1C, 0x53, 0x00, 0x00],
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            CodePage::Latin => WINDOWS_1252,
            CodePage::Gbk => GBK,
        }
    }
}

/// Encode text into printer bytes for the given table
///
/// Characters the table cannot represent, and control characters that
/// would be read as commands, print as `?`.
pub fn encode_text(text: &str, page: CodePage) -> Vec<u8> {
    let encoding = page.encoding();
    let mut out = Vec::with_capacity(text.len() * 2);
    let mut buf = [0u8; 4];

    for c in text.chars() {
        if c == '\t' {
            out.push(b' ');
            continue;
        }
        if c.is_control() {
            out.push(b'?');
            continue;
        }
        if c.is_ascii() {
            out.push(c as u8);
            continue;
        }
        let (bytes, _, unmappable) = encoding.encode(c.encode_utf8(&mut buf));
        if unmappable {
            out.push(b'?');
        } else {
            out.extend_from_slice(&bytes);
        }
    }

    out
}
