//! # Summary Engine
//!
//! Derives weekly and monthly spending summaries from dated amount records.
//! Summaries are recomputed on every read; nothing here is persisted.
//!
//! Weekly buckets are keyed by ISO week (ISO year + week number) while their
//! displayed bounds are the Sunday-start calendar week of the record that
//! opened the bucket. A Sunday therefore shares a bucket with the preceding
//! Monday..Saturday but displays the week it starts.

use chrono::{Datelike, Days, NaiveDate};
use models::{KaimemoAmount, KaimemoSummaryResponse, MonthlySummary, WeeklySummary};
use std::collections::BTreeMap;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SummaryError>;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SummaryError {
    #[error("Malformed date '{date}' on record '{id}' (expected YYYY-MM-DD)")]
    MalformedDate { id: String, date: String },

    #[error("Amount total overflows at record '{id}'")]
    AmountOverflow { id: String },
}

/// Adds `amount` to `total`, naming the record on overflow.
fn add_amount(total: &mut i64, record: &KaimemoAmount) -> Result<()> {
    *total = total
        .checked_add(record.amount)
        .ok_or_else(|| SummaryError::AmountOverflow { id: record.id.clone() })?;
    Ok(())
}

/// Parses a `YYYY-MM-DD` date, rejecting anything chrono would accept loosely
/// (single-digit months, signed years, trailing text).
pub fn parse_record_date(text: &str) -> Option<NaiveDate> {
    let bytes = text.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let digits_ok = bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 4 || i == 7 || b.is_ascii_digit());
    if !digits_ok {
        return None;
    }
    NaiveDate::parse_from_str(text, DATE_FORMAT).ok()
}

/// Same as [`parse_record_date`] but reports the offending record.
fn record_date(record: &KaimemoAmount) -> Result<NaiveDate> {
    parse_record_date(&record.date).ok_or_else(|| SummaryError::MalformedDate {
        id: record.id.clone(),
        date: record.date.clone(),
    })
}

/// Validates a date string coming from a client request.
pub fn validate_date(text: &str) -> Result<()> {
    parse_record_date(text)
        .map(|_| ())
        .ok_or_else(|| SummaryError::MalformedDate {
            id: String::new(),
            date: text.to_string(),
        })
}

/// Sunday on or before `date`.
fn calendar_week_start(date: NaiveDate) -> Option<NaiveDate> {
    let offset = date.weekday().num_days_from_sunday();
    date.checked_sub_days(Days::new(u64::from(offset)))
}

pub fn group_by_week(records: &[KaimemoAmount]) -> Result<Vec<WeeklySummary>> {
    let mut buckets: BTreeMap<(i32, u32), WeeklySummary> = BTreeMap::new();

    for record in records {
        let date = record_date(record)?;
        let iso = date.iso_week();
        let key = (iso.year(), iso.week());

        if !buckets.contains_key(&key) {
            let (start, end) = calendar_week_start(date)
                .and_then(|start| start.checked_add_days(Days::new(6)).map(|end| (start, end)))
                .ok_or_else(|| SummaryError::MalformedDate {
                    id: record.id.clone(),
                    date: record.date.clone(),
                })?;
            buckets.insert(
                key,
                WeeklySummary {
                    week_start: start.format(DATE_FORMAT).to_string(),
                    week_end: end.format(DATE_FORMAT).to_string(),
                    total_amount: 0,
                    items: Vec::new(),
                },
            );
        }

        if let Some(summary) = buckets.get_mut(&key) {
            add_amount(&mut summary.total_amount, record)?;
            summary.items.push(record.clone());
        }
    }

    // BTreeMap order breaks ties between buckets that display the same Sunday
    let mut result: Vec<WeeklySummary> = buckets.into_values().collect();
    result.sort_by(|a, b| a.week_start.cmp(&b.week_start));
    Ok(result)
}

pub fn group_by_month(records: &[KaimemoAmount]) -> Result<Vec<MonthlySummary>> {
    let mut buckets: BTreeMap<String, MonthlySummary> = BTreeMap::new();

    for record in records {
        record_date(record)?;
        let month = record.date[..7].to_string();

        let summary = buckets
            .entry(month.clone())
            .or_insert_with(|| MonthlySummary {
                month,
                total_amount: 0,
                tag_totals: BTreeMap::new(),
            });
        add_amount(&mut summary.total_amount, record)?;
        add_amount(summary.tag_totals.entry(record.tag.clone()).or_insert(0), record)?;
    }

    Ok(buckets.into_values().collect())
}

/// Both views over the same record set.
pub fn summarize(records: &[KaimemoAmount]) -> Result<KaimemoSummaryResponse> {
    Ok(KaimemoSummaryResponse {
        monthly_summaries: group_by_month(records)?,
        weekly_summaries: group_by_week(records)?,
    })
}
