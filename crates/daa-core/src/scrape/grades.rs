//! Grade page parsers.

use scraper::Html;
use serde::Deserialize;

use super::variant::{checked_table, detect, optional, PageVariant};
use crate::portal::RawPage;
use crate::types::{DaaError, DaaResult, GradeRecord};

const TABLE_CLASS: &str = "grade-table";
const HTML_CELLS: usize = 6;

/// Parse a grade page of any known variant. Records keep portal order.
pub fn parse_grades(page: &RawPage) -> DaaResult<Vec<GradeRecord>> {
    match detect(page, TABLE_CLASS) {
        PageVariant::HtmlTable => parse_html(page),
        PageVariant::JsonApi => parse_json(page),
        PageVariant::LoginForm => Err(DaaError::SessionRejected),
        PageVariant::Unknown => Err(DaaError::parse(
            "grades",
            "unrecognized page structure",
        )),
    }
}

fn parse_html(page: &RawPage) -> DaaResult<Vec<GradeRecord>> {
    const VARIANT: &str = "html-table";
    let doc = Html::parse_document(&page.body);
    let (_, rows) = checked_table(&doc, "table.grade-table", VARIANT, HTML_CELLS)?;

    rows.iter()
        .enumerate()
        .map(|(i, cells)| {
            let row = i + 1;
            let term = required(&cells[0], "term", row)?;
            let course_code = required(&cells[1], "course code", row)?;
            let course_name = required(&cells[2], "course name", row)?;
            let credits = cells[3].parse::<u32>().map_err(|_| {
                DaaError::parse(VARIANT, format!("row {row}: invalid credits '{}'", cells[3]))
            })?;
            let score = parse_score(&cells[4])
                .map_err(|msg| DaaError::parse(VARIANT, format!("row {row}: {msg}")))?;

            Ok(GradeRecord {
                term,
                course_code,
                course_name,
                credits,
                score,
                letter: optional(&cells[5]),
                source_timestamp: page.fetched_at,
            })
        })
        .collect()
}

fn required(text: &str, field: &str, row: usize) -> DaaResult<String> {
    optional(text).ok_or_else(|| DaaError::parse("html-table", format!("row {row}: empty {field}")))
}

/// Empty means not yet graded. The portal uses a decimal comma in some locales.
fn parse_score(text: &str) -> Result<Option<f32>, String> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(None);
    }
    let value: f32 = text
        .replace(',', ".")
        .parse()
        .map_err(|_| format!("invalid score '{text}'"))?;
    check_score(value).map(Some)
}

fn check_score(value: f32) -> Result<f32, String> {
    if (0.0..=10.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("score {value} outside 0-10"))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiGrade {
    term_code: String,
    course_code: String,
    course_name: String,
    credits: u32,
    #[serde(default)]
    score: Option<f32>,
    #[serde(default)]
    letter: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiGrades {
    data: Vec<ApiGrade>,
    total: usize,
}

fn parse_json(page: &RawPage) -> DaaResult<Vec<GradeRecord>> {
    const VARIANT: &str = "json-api";
    let payload: ApiGrades = serde_json::from_str(&page.body)
        .map_err(|e| DaaError::parse(VARIANT, e.to_string()))?;

    if payload.total != payload.data.len() {
        return Err(DaaError::parse(
            VARIANT,
            format!("total {} but {} records", payload.total, payload.data.len()),
        ));
    }

    payload
        .data
        .into_iter()
        .enumerate()
        .map(|(i, g)| {
            let score = g
                .score
                .map(check_score)
                .transpose()
                .map_err(|msg| DaaError::parse(VARIANT, format!("record {}: {msg}", i + 1)))?;
            Ok(GradeRecord {
                term: g.term_code,
                course_code: g.course_code,
                course_name: g.course_name,
                credits: g.credits,
                score,
                letter: g.letter.as_deref().and_then(optional),
                source_timestamp: page.fetched_at,
            })
        })
        .collect()
}
