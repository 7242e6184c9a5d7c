//! Text layout for fixed-pitch receipt printers
//!
//! All widths are visual widths: CJK and other full-width characters take
//! two cells, everything else takes one.

use crate::document::{Alignment, ColumnItem};
use crate::error::{PrintError, PrintResult};
use unicode_width::UnicodeWidthChar;

/// Visual width of a single character (1 or 2)
#[inline]
pub fn char_width(c: char) -> usize {
    match c.width() {
        Some(2) => 2,
        _ => 1,
    }
}

/// Visual width of a string
pub fn visual_width(s: &str) -> usize {
    s.chars().map(char_width).sum()
}

/// Whether the text contains any double-width character
pub fn contains_wide_character(text: &str) -> bool {
    text.chars().any(|c| char_width(c) == 2)
}

/// Whether any column's text contains a double-width character
pub fn any_column_contains_wide_character(columns: &[ColumnItem]) -> bool {
    columns.iter().any(|c| {
        contains_wide_character(&c.text) || c.lines.iter().any(|l| contains_wide_character(l))
    })
}

/// Split text into lines no wider than `width`
///
/// Explicit newlines always start a new line. With `wrap_words`, lines break
/// between whitespace-separated words and runs of whitespace collapse to a
/// single space; a word wider than the line is split across lines. Without
/// it, lines are filled character by character. A lone character wider than
/// `width` gets a line of its own. Always returns at least one line.
pub fn split_into_lines(text: &str, width: usize, wrap_words: bool) -> PrintResult<Vec<String>> {
    if width == 0 {
        return Err(PrintError::invalid("line width must be > 0"));
    }

    let mut lines = Vec::new();
    for paragraph in text.split('\n') {
        let paragraph = paragraph.strip_suffix('\r').unwrap_or(paragraph);
        if wrap_words {
            wrap_paragraph_words(paragraph, width, &mut lines);
        } else {
            wrap_paragraph_chars(paragraph, width, &mut lines);
        }
    }

    if lines.is_empty() {
        lines.push(String::new());
    }
    Ok(lines)
}

fn wrap_paragraph_chars(text: &str, width: usize, lines: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_width = 0;

    for c in text.chars() {
        let cw = char_width(c);
        if current_width + cw > width && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
            current_width = 0;
        }
        current.push(c);
        current_width += cw;
    }

    lines.push(current);
}

fn wrap_paragraph_words(text: &str, width: usize, lines: &mut Vec<String>) {
    let mut current = String::new();
    let mut current_width = 0;
    let mut emitted = false;

    for word in text.split_whitespace() {
        let word_width = visual_width(word);

        if word_width > width {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
                current_width = 0;
            }
            // Long word gets lines of its own, split at the width
            wrap_paragraph_chars(word, width, lines);
            emitted = true;
            continue;
        }

        let needed = if current.is_empty() {
            word_width
        } else {
            current_width + 1 + word_width
        };

        if needed <= width {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
            current_width = needed;
        } else {
            lines.push(std::mem::take(&mut current));
            current.push_str(word);
            current_width = word_width;
        }
        emitted = true;
    }

    if !current.is_empty() || !emitted {
        lines.push(current);
    }
}

/// Pad text with spaces to exactly `width` visual columns
///
/// Text is expected to fit already; wider text is returned unchanged.
pub fn pad_and_align(text: &str, width: usize, alignment: Alignment) -> PrintResult<String> {
    if width == 0 {
        return Err(PrintError::invalid("pad width must be > 0"));
    }

    let padding = width.saturating_sub(visual_width(text));
    let (left, right) = match alignment {
        Alignment::Left => (0, padding),
        Alignment::Right => (padding, 0),
        Alignment::Center => (padding / 2, padding - padding / 2),
    };

    let mut out = String::with_capacity(text.len() + padding);
    out.extend(std::iter::repeat_n(' ', left));
    out.push_str(text);
    out.extend(std::iter::repeat_n(' ', right));
    Ok(out)
}

/// Merge independently wrapped columns into printable rows
///
/// Row `i` is the concatenation of each column's line `i`, padded to the
/// column width; shorter columns contribute blank cells.
pub fn layout_columns(columns: &[ColumnItem]) -> PrintResult<Vec<String>> {
    let wrapped = columns
        .iter()
        .map(|column| {
            if column.width == 0 {
                return Err(PrintError::invalid("column width must be > 0"));
            }
            if column.lines.is_empty() {
                split_into_lines(&column.text, column.width, column.wrap_words)
            } else {
                Ok(column.lines.clone())
            }
        })
        .collect::<PrintResult<Vec<_>>>()?;

    let rows = wrapped.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);

    for row in 0..rows {
        let mut line = String::new();
        for (column, lines) in columns.iter().zip(&wrapped) {
            let cell = lines.get(row).map(String::as_str).unwrap_or("");
            line.push_str(&pad_and_align(cell, column.width, column.alignment)?);
        }
        out.push(line);
    }

    Ok(out)
}
