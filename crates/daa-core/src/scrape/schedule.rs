//! Schedule page parsers.

use chrono::Weekday;
use scraper::Html;
use serde::Deserialize;

use super::variant::{checked_table, detect, optional, PageVariant};
use crate::portal::RawPage;
use crate::types::{DaaError, DaaResult, ScheduleEntry};

const TABLE_CLASS: &str = "schedule-table";
const HTML_CELLS: usize = 6;
const MAX_PERIOD: u8 = 16;

/// Parse a schedule page of any known variant, ordered by weekday, start
/// period, then course code.
pub fn parse_schedule(page: &RawPage) -> DaaResult<Vec<ScheduleEntry>> {
    let mut entries = match detect(page, TABLE_CLASS) {
        PageVariant::HtmlTable => parse_html(page)?,
        PageVariant::JsonApi => parse_json(page)?,
        PageVariant::LoginForm => return Err(DaaError::SessionRejected),
        PageVariant::Unknown => {
            return Err(DaaError::parse("schedule", "unrecognized page structure"))
        }
    };
    sort_entries(&mut entries);
    Ok(entries)
}

pub(crate) fn sort_entries(entries: &mut [ScheduleEntry]) {
    entries.sort_by(|a, b| {
        a.weekday
            .num_days_from_monday()
            .cmp(&b.weekday.num_days_from_monday())
            .then(a.start_period.cmp(&b.start_period))
            .then_with(|| a.course_code.cmp(&b.course_code))
    });
}

/// Accepts "Thứ 2".."Thứ 7", "CN", English day names, and the portal's
/// numeric convention (2 = Monday .. 8 = Sunday).
fn parse_weekday(text: &str) -> Option<Weekday> {
    let lower = text.trim().to_lowercase();
    let key = lower
        .strip_prefix("thứ")
        .or_else(|| lower.strip_prefix("thu "))
        .map(str::trim)
        .unwrap_or(lower.as_str());

    match key {
        "2" | "mon" | "monday" => Some(Weekday::Mon),
        "3" | "tue" | "tuesday" => Some(Weekday::Tue),
        "4" | "wed" | "wednesday" => Some(Weekday::Wed),
        "5" | "thu" | "thursday" => Some(Weekday::Thu),
        "6" | "fri" | "friday" => Some(Weekday::Fri),
        "7" | "sat" | "saturday" => Some(Weekday::Sat),
        "8" | "cn" | "chủ nhật" | "sun" | "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// "7-9" or a single period "4".
fn parse_periods(text: &str) -> Option<(u8, u8)> {
    let (start, end) = match text.split_once('-') {
        Some((a, b)) => (a.trim().parse().ok()?, b.trim().parse().ok()?),
        None => {
            let p: u8 = text.trim().parse().ok()?;
            (p, p)
        }
    };
    valid_periods(start, end).then_some((start, end))
}

fn valid_periods(start: u8, end: u8) -> bool {
    start >= 1 && start <= end && end <= MAX_PERIOD
}

fn parse_html(page: &RawPage) -> DaaResult<Vec<ScheduleEntry>> {
    const VARIANT: &str = "html-table";
    let doc = Html::parse_document(&page.body);
    let (table, rows) = checked_table(&doc, "table.schedule-table", VARIANT, HTML_CELLS)?;

    let term = table
        .value()
        .attr("data-term")
        .and_then(optional)
        .ok_or_else(|| DaaError::parse(VARIANT, "schedule table has no data-term"))?;

    rows.iter()
        .enumerate()
        .map(|(i, cells)| {
            let row = i + 1;
            let field = |idx: usize, name: &str| {
                optional(&cells[idx])
                    .ok_or_else(|| DaaError::parse(VARIANT, format!("row {row}: empty {name}")))
            };
            let weekday = parse_weekday(&cells[2]).ok_or_else(|| {
                DaaError::parse(VARIANT, format!("row {row}: unknown day '{}'", cells[2]))
            })?;
            let (start_period, end_period) = parse_periods(&cells[3]).ok_or_else(|| {
                DaaError::parse(VARIANT, format!("row {row}: invalid periods '{}'", cells[3]))
            })?;

            Ok(ScheduleEntry {
                term: term.clone(),
                course_code: field(0, "course code")?,
                course_name: field(1, "course name")?,
                weekday,
                start_period,
                end_period,
                room: field(4, "room")?,
                instructor: optional(&cells[5]),
                source_timestamp: page.fetched_at,
            })
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiSlot {
    course_code: String,
    course_name: String,
    day: u8,
    start_period: u8,
    end_period: u8,
    room: String,
    #[serde(default)]
    instructor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSchedule {
    term: String,
    data: Vec<ApiSlot>,
    total: usize,
}

fn parse_json(page: &RawPage) -> DaaResult<Vec<ScheduleEntry>> {
    const VARIANT: &str = "json-api";
    let payload: ApiSchedule = serde_json::from_str(&page.body)
        .map_err(|e| DaaError::parse(VARIANT, e.to_string()))?;

    if payload.total != payload.data.len() {
        return Err(DaaError::parse(
            VARIANT,
            format!("total {} but {} records", payload.total, payload.data.len()),
        ));
    }

    let term = payload.term;
    payload
        .data
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            let record = i + 1;
            let weekday = parse_weekday(&slot.day.to_string()).ok_or_else(|| {
                DaaError::parse(VARIANT, format!("record {record}: unknown day {}", slot.day))
            })?;
            if !valid_periods(slot.start_period, slot.end_period) {
                return Err(DaaError::parse(
                    VARIANT,
                    format!(
                        "record {record}: invalid periods {}-{}",
                        slot.start_period, slot.end_period
                    ),
                ));
            }
            Ok(ScheduleEntry {
                term: term.clone(),
                course_code: slot.course_code,
                course_name: slot.course_name,
                weekday,
                start_period: slot.start_period,
                end_period: slot.end_period,
                room: slot.room,
                instructor: slot.instructor.as_deref().and_then(optional),
                source_timestamp: page.fetched_at,
            })
        })
        .collect()
}
