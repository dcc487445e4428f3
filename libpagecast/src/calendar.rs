//! Recurring schedule calendar
//!
//! Weekly (time-of-day, weekday-set) rules projected onto concrete dates.
//! The projection is a pure function of the stored rules and posts,
//! recomputed on every call; all date math happens in the one configured
//! system timezone. Weekdays are numbered 0 = Sunday .. 6 = Saturday.

use chrono::{Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Serialize;

use crate::db::Database;
use crate::error::{PagecastError, Result};
use crate::types::{PostStatus, RecurringTimeRule};

/// A rule annotated with human weekday names for display.
#[derive(Debug, Clone, Serialize)]
pub struct RuleView {
    pub id: i64,
    pub time: String,
    pub days: Vec<u8>,
    pub day_names: Vec<&'static str>,
    pub active: bool,
}

/// One calendar day in a month projection.
#[derive(Debug, Clone, Serialize)]
pub struct DayView {
    pub date: NaiveDate,
    pub day: u32,
    /// 0 = Sunday .. 6 = Saturday.
    pub weekday: u8,
    pub is_today: bool,
    pub is_past: bool,
    /// (rule id, time) for every active rule matching this weekday.
    pub rule_times: Vec<(i64, String)>,
    /// (time, status) of posts already scheduled on this date.
    pub scheduled: Vec<(String, PostStatus)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthView {
    pub year: i32,
    pub month: u32,
    pub month_name: String,
    pub days: Vec<DayView>,
    pub rules: Vec<RuleView>,
}

/// Partial update for a rule; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RuleUpdate {
    pub time: Option<String>,
    pub days: Option<Vec<u8>>,
    pub active: Option<bool>,
}

pub struct RecurringCalendar {
    db: Database,
    tz: Tz,
}

/// Validate and zero-pad an "HH:MM" time-of-day.
pub fn normalize_time(time: &str) -> Option<String> {
    let (hour_str, minute_str) = time.split_once(':')?;
    if minute_str.len() != 2 {
        return None;
    }
    let hour: u32 = hour_str.parse().ok()?;
    let minute: u32 = minute_str.parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(format!("{:02}:{:02}", hour, minute))
}

pub fn day_name(day: u8) -> &'static str {
    match day {
        0 => "Sunday",
        1 => "Monday",
        2 => "Tuesday",
        3 => "Wednesday",
        4 => "Thursday",
        5 => "Friday",
        6 => "Saturday",
        _ => "",
    }
}

fn validate_days(days: &[u8]) -> Result<Vec<u8>> {
    if days.is_empty() {
        return Err(PagecastError::Validation(
            "A recurring time needs at least one weekday".to_string(),
        ));
    }
    if let Some(bad) = days.iter().find(|d| **d > 6) {
        return Err(PagecastError::Validation(format!(
            "Invalid weekday value: {}",
            bad
        )));
    }
    let mut days = days.to_vec();
    days.sort_unstable();
    days.dedup();
    Ok(days)
}

fn days_csv(days: &[u8]) -> String {
    days.iter()
        .map(|d| d.to_string())
        .collect::<Vec<_>>()
        .join(",")
}

impl RecurringCalendar {
    pub fn new(db: Database, tz: Tz) -> Self {
        Self { db, tz }
    }

    fn now_local(&self) -> chrono::NaiveDateTime {
        Utc::now().with_timezone(&self.tz).naive_local()
    }

    /// Create a rule. Bad input is rejected before anything is persisted.
    pub async fn create_rule(&self, time: &str, days: &[u8]) -> Result<i64> {
        let time = normalize_time(time).ok_or_else(|| {
            PagecastError::Validation(format!("Invalid time format: {}", time))
        })?;
        let days = validate_days(days)?;

        let now = self.now_local();
        let id = self.db.insert_rule(&time, &days_csv(&days), &now).await?;
        tracing::info!(rule_id = id, %time, days = %days_csv(&days), "Recurring time created");
        Ok(id)
    }

    /// Partially update a rule. Only supplied fields are touched; supplied
    /// but invalid values are rejected.
    pub async fn update_rule(&self, rule_id: i64, update: RuleUpdate) -> Result<bool> {
        let time = match &update.time {
            Some(t) => Some(normalize_time(t).ok_or_else(|| {
                PagecastError::Validation(format!("Invalid time format: {}", t))
            })?),
            None => None,
        };
        let days = match &update.days {
            Some(d) => Some(validate_days(d)?),
            None => None,
        };

        let now = self.now_local();
        let changed = self
            .db
            .update_rule(
                rule_id,
                time.as_deref(),
                days.as_ref().map(|d| days_csv(d)).as_deref(),
                update.active,
                &now,
            )
            .await?;
        if changed {
            tracing::info!(rule_id, "Recurring time updated");
        }
        Ok(changed)
    }

    /// Delete a rule; deleting an unknown id is a no-op.
    pub async fn delete_rule(&self, rule_id: i64) -> Result<()> {
        self.db.delete_rule(rule_id).await?;
        tracing::info!(rule_id, "Recurring time deleted");
        Ok(())
    }

    /// Rules ordered by time ascending, annotated with weekday names.
    pub async fn list_rules(&self, active_only: bool) -> Result<Vec<RuleView>> {
        let rules = self.db.list_rules(active_only).await?;
        Ok(rules.iter().map(rule_view).collect())
    }

    /// Project the active rules and scheduled posts onto a calendar month.
    pub async fn month_view(&self, year: i32, month: u32) -> Result<MonthView> {
        let start = NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            PagecastError::Validation(format!("Invalid month: {}-{}", year, month))
        })?;
        let end = last_day_of_month(start);

        let rules = self.db.list_rules(true).await?;
        let posts = self.db.posts_between(start, end).await?;
        let today = Utc::now().with_timezone(&self.tz).date_naive();

        let mut days = Vec::new();
        let mut current = start;
        while current <= end {
            let weekday = current.weekday().num_days_from_sunday() as u8;

            let rule_times: Vec<(i64, String)> = rules
                .iter()
                .filter(|r| r.days.contains(&weekday))
                .map(|r| (r.id, r.time.clone()))
                .collect();

            let scheduled: Vec<(String, PostStatus)> = posts
                .iter()
                .filter(|(date, _, _)| *date == current)
                .map(|(_, time, status)| (time.clone(), *status))
                .collect();

            days.push(DayView {
                date: current,
                day: current.day(),
                weekday,
                is_today: current == today,
                is_past: current < today,
                rule_times,
                scheduled,
            });
            current += Duration::days(1);
        }

        Ok(MonthView {
            year,
            month,
            month_name: start.format("%B %Y").to_string(),
            days,
            rules: rules.iter().map(rule_view).collect(),
        })
    }

    /// Rule times applicable to the date's weekday, minus times already
    /// taken by a post that still holds its slot. Slots compare by exact
    /// "HH:MM" equality.
    pub async fn available_slots(&self, date: NaiveDate) -> Result<Vec<String>> {
        let weekday = date.weekday().num_days_from_sunday() as u8;
        let rules = self.db.list_rules(true).await?;
        let occupied = self.db.occupied_slots(date).await?;

        Ok(rules
            .iter()
            .filter(|r| r.days.contains(&weekday))
            .map(|r| r.time.clone())
            .filter(|time| !occupied.contains(time))
            .collect())
    }

    /// Times on the date already held by a slot-holding post.
    pub async fn occupied_slots(&self, date: NaiveDate) -> Result<Vec<String>> {
        self.db.occupied_slots(date).await
    }
}

fn rule_view(rule: &RecurringTimeRule) -> RuleView {
    RuleView {
        id: rule.id,
        time: rule.time.clone(),
        days: rule.days.clone(),
        day_names: rule.days.iter().map(|d| day_name(*d)).collect(),
        active: rule.active,
    }
}

fn last_day_of_month(first: NaiveDate) -> NaiveDate {
    let (next_year, next_month) = if first.month() == 12 {
        (first.year() + 1, 1)
    } else {
        (first.year(), first.month() + 1)
    };
    // The first of the next month always exists.
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .map(|d| d - Duration::days(1))
        .unwrap_or(first)
}
