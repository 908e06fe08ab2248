use serde_json::{Map, Value};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::config::{OutputFormat, ThemeName, DEFAULT_MAX_COLUMN_WIDTH};
use crate::query_executor::QueryResult;

pub const NO_ROWS_MESSAGE: &str = "No rows returned.";
const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BorderSet {
    pub horizontal: char,
    pub vertical: char,
    pub top: [char; 3],
    pub middle: [char; 3],
    pub bottom: [char; 3],
}

impl BorderSet {
    pub const UNICODE: Self = Self {
        horizontal: '─',
        vertical: '│',
        top: ['┌', '┬', '┐'],
        middle: ['├', '┼', '┤'],
        bottom: ['└', '┴', '┘'],
    };

    pub const ASCII: Self = Self {
        horizontal: '-',
        vertical: '|',
        top: ['+', '+', '+'],
        middle: ['+', '+', '+'],
        bottom: ['+', '+', '+'],
    };
}

/// Layout knobs for the table renderer, passed in rather than read from
/// process-wide state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableStyle {
    pub padding: usize,
    pub max_column_width: usize,
    pub borders: BorderSet,
}

impl Default for TableStyle {
    fn default() -> Self {
        Self {
            padding: 2,
            max_column_width: DEFAULT_MAX_COLUMN_WIDTH,
            borders: BorderSet::UNICODE,
        }
    }
}

impl TableStyle {
    #[must_use]
    pub fn for_theme(theme: ThemeName, max_column_width: usize) -> Self {
        let borders = match theme {
            ThemeName::Unicode => BorderSet::UNICODE,
            ThemeName::Ascii => BorderSet::ASCII,
        };
        Self {
            max_column_width: max_column_width.max(ELLIPSIS.len() + 2),
            borders,
            ..Self::default()
        }
    }

    fn content_width(&self, column_width: usize) -> usize {
        column_width.saturating_sub(self.padding)
    }
}

#[must_use]
pub fn render(format: OutputFormat, result: &QueryResult, style: &TableStyle) -> String {
    match format {
        OutputFormat::Table => render_table(result.columns(), result.rows(), style),
        OutputFormat::Csv => render_csv(result.columns(), result.rows()),
        OutputFormat::Json => render_json(result.columns(), result.rows()),
        OutputFormat::Markdown => render_markdown(result.columns(), result.rows()),
    }
}

/// Per-column width including padding: the widest of header and cells plus
/// `style.padding`, never more than `style.max_column_width`.
#[must_use]
pub fn column_widths(columns: &[String], rows: &[Vec<String>], style: &TableStyle) -> Vec<usize> {
    columns
        .iter()
        .enumerate()
        .map(|(index, header)| {
            let widest_cell = rows
                .iter()
                .filter_map(|row| row.get(index))
                .map(|cell| cell.width())
                .max()
                .unwrap_or(0);
            (header.width().max(widest_cell) + style.padding).min(style.max_column_width)
        })
        .collect()
}

/// Cuts `text` to at most `width` display columns, marking the cut with `...`.
#[must_use]
pub fn truncate_to_width(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }

    let budget = width.saturating_sub(ELLIPSIS.len());
    let mut used = 0;
    let mut truncated = String::with_capacity(width);
    for ch in text.chars() {
        let ch_width = ch.width().unwrap_or(0);
        if used + ch_width > budget {
            break;
        }
        used += ch_width;
        truncated.push(ch);
    }
    truncated.push_str(ELLIPSIS);
    truncated
}

#[must_use]
pub fn render_table(columns: &[String], rows: &[Vec<String>], style: &TableStyle) -> String {
    if rows.is_empty() {
        return format!("{NO_ROWS_MESSAGE}\n");
    }

    let widths = column_widths(columns, rows, style);
    let borders = &style.borders;
    let mut out = String::new();

    push_rule(&mut out, &widths, borders, borders.top);
    push_row(&mut out, columns, &widths, style);
    push_rule(&mut out, &widths, borders, borders.middle);
    for row in rows {
        push_row(&mut out, row, &widths, style);
    }
    push_rule(&mut out, &widths, borders, borders.bottom);
    out
}

fn push_rule(out: &mut String, widths: &[usize], borders: &BorderSet, [left, mid, right]: [char; 3]) {
    out.push(left);
    for (index, width) in widths.iter().enumerate() {
        if index > 0 {
            out.push(mid);
        }
        out.extend(std::iter::repeat(borders.horizontal).take(*width));
    }
    out.push(right);
    out.push('\n');
}

fn push_row(out: &mut String, cells: &[String], widths: &[usize], style: &TableStyle) {
    let left_pad = style.padding / 2;
    out.push(style.borders.vertical);
    for (index, width) in widths.iter().enumerate() {
        let cell = cells.get(index).map_or("", String::as_str);
        let fitted = truncate_to_width(cell, style.content_width(*width));
        let trailing = width.saturating_sub(left_pad + fitted.width());
        out.extend(std::iter::repeat(' ').take(left_pad));
        out.push_str(&fitted);
        out.extend(std::iter::repeat(' ').take(trailing));
        out.push(style.borders.vertical);
    }
    out.push('\n');
}

/// Quotes a field only when it holds a comma or a double quote.
#[must_use]
pub fn csv_field(value: &str) -> String {
    if value.contains([',', '"']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[must_use]
pub fn render_csv(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    push_csv_line(&mut out, columns);
    for row in rows {
        push_csv_line(&mut out, row);
    }
    out
}

fn push_csv_line(out: &mut String, fields: &[String]) {
    let line = fields
        .iter()
        .map(|field| csv_field(field))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push('\n');
}

fn json_records(columns: &[String], rows: &[Vec<String>]) -> Value {
    let records = rows
        .iter()
        .map(|row| {
            let mut object = Map::with_capacity(columns.len());
            for (column, cell) in columns.iter().zip(row) {
                object.insert(column.clone(), Value::String(cell.clone()));
            }
            Value::Object(object)
        })
        .collect();
    Value::Array(records)
}

/// Compact JSON array of objects. Values stay as normalized text, so numbers
/// and `NULL` are strings here.
#[must_use]
pub fn render_json(columns: &[String], rows: &[Vec<String>]) -> String {
    json_records(columns, rows).to_string()
}

#[must_use]
pub fn render_json_pretty(columns: &[String], rows: &[Vec<String>]) -> String {
    format!("{:#}\n", json_records(columns, rows))
}

fn markdown_cell(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('|', "\\|")
        .replace(['\r', '\n'], " ")
}

#[must_use]
pub fn render_markdown(columns: &[String], rows: &[Vec<String>]) -> String {
    let mut out = String::new();
    let header = columns
        .iter()
        .map(|column| markdown_cell(column))
        .collect::<Vec<_>>();
    out.push_str(&format!("| {} |\n", header.join(" | ")));
    out.push_str(&format!("|{}\n", " --- |".repeat(columns.len())));
    for row in rows {
        let cells = row.iter().map(|cell| markdown_cell(cell)).collect::<Vec<_>>();
        out.push_str(&format!("| {} |\n", cells.join(" | ")));
    }
    out
}
