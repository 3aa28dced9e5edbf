//! Page variant detection and shared HTML helpers.
//!
//! The portal has served the same data in several shapes over time. Each
//! known shape gets its own parser; detection here only looks at cheap
//! signatures so that adding a variant never touches session logic.

use scraper::{ElementRef, Html, Selector};

use crate::portal::RawPage;
use crate::types::{DaaError, DaaResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageVariant {
    /// Server-rendered table, identified by its CSS class.
    HtmlTable,
    /// JSON API response with `data` and `total` fields.
    JsonApi,
    /// The portal served its login form instead of data.
    LoginForm,
    Unknown,
}

impl PageVariant {
    pub fn name(self) -> &'static str {
        match self {
            PageVariant::HtmlTable => "html-table",
            PageVariant::JsonApi => "json-api",
            PageVariant::LoginForm => "login-form",
            PageVariant::Unknown => "unknown",
        }
    }
}

/// Detect which variant `page` is, given the table class of the HTML variant.
pub fn detect(page: &RawPage, table_class: &str) -> PageVariant {
    if page.is_json() {
        return PageVariant::JsonApi;
    }

    let body = page.body.to_ascii_lowercase();
    if body.contains(table_class) {
        return PageVariant::HtmlTable;
    }
    if body.contains("type=\"password\"") || body.contains("name=\"password\"") {
        return PageVariant::LoginForm;
    }
    PageVariant::Unknown
}

pub(crate) fn selector(css: &str) -> DaaResult<Selector> {
    Selector::parse(css).map_err(|e| DaaError::Config(format!("invalid selector '{css}': {e:?}")))
}

/// Visible text of an element with whitespace collapsed.
pub(crate) fn cell_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Texts of the `<td>` cells in each body row of `table`.
pub(crate) fn table_rows(table: ElementRef<'_>) -> DaaResult<Vec<Vec<String>>> {
    let row_sel = selector("tbody > tr")?;
    let cell_sel = selector("td")?;
    Ok(table
        .select(&row_sel)
        .map(|row| row.select(&cell_sel).map(cell_text).collect())
        .collect())
}

/// Row count declared in the table footer. A page cut off before its footer
/// has no count and is rejected by the caller.
pub(crate) fn declared_row_count(table: ElementRef<'_>, variant: &'static str) -> DaaResult<usize> {
    let footer_sel = selector("tfoot [data-row-count]")?;
    let footer = table.select(&footer_sel).next().ok_or_else(|| {
        DaaError::parse(variant, "missing row-count footer (page truncated?)")
    })?;
    let raw = footer.value().attr("data-row-count").unwrap_or_default();
    raw.trim()
        .parse::<usize>()
        .map_err(|_| DaaError::parse(variant, format!("invalid row count '{raw}'")))
}

/// Locate the data table and return its rows after checking them against the footer.
pub(crate) fn checked_table<'a>(
    doc: &'a Html,
    table_css: &str,
    variant: &'static str,
    expected_cells: usize,
) -> DaaResult<(ElementRef<'a>, Vec<Vec<String>>)> {
    let table_sel = selector(table_css)?;
    let table = doc
        .select(&table_sel)
        .next()
        .ok_or_else(|| DaaError::parse(variant, format!("no element matches '{table_css}'")))?;

    let rows = table_rows(table)?;
    let declared = declared_row_count(table, variant)?;
    if declared != rows.len() {
        return Err(DaaError::parse(
            variant,
            format!("footer declares {declared} rows but table has {}", rows.len()),
        ));
    }

    for (i, cells) in rows.iter().enumerate() {
        if cells.len() != expected_cells {
            return Err(DaaError::parse(
                variant,
                format!("row {} has {} cells, expected {expected_cells}", i + 1, cells.len()),
            ));
        }
    }

    Ok((table, rows))
}

/// `None` for an empty cell, the text otherwise.
pub(crate) fn optional(text: &str) -> Option<String> {
    let trimmed = text.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}
