//! Engagement metrics derived from local state

use crate::models::{Company, EmailLog};
use chrono::{DateTime, Duration, TimeZone};
use serde::Serialize;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetrics {
    pub total_companies: usize,
    /// Logs sent since local midnight
    pub emails_today: usize,
    /// Logs sent since local midnight seven days ago
    pub emails_week: usize,
    /// Every log on record
    pub emails_month: usize,
    pub upcoming_follow_ups: usize,
    pub follow_ups_today: usize,
    pub overdue_follow_ups: usize,
    /// Percentage of contacted companies marked interested, rounded
    pub response_rate: u32,
}

impl DashboardMetrics {
    pub fn compute<Tz: TimeZone>(
        companies: &[Company],
        logs: &[EmailLog],
        now: &DateTime<Tz>,
    ) -> Self {
        let now_ms = now.timestamp_millis();
        let today_start = start_of_day(now);
        let week_start = today_start - Duration::days(7).num_milliseconds();

        let open = || logs.iter().filter(|l| !l.completed);

        let contacted: HashSet<&str> = logs.iter().map(|l| l.company_id.as_str()).collect();
        let interested = companies
            .iter()
            .filter(|c| c.is_interested && contacted.contains(c.id.as_str()))
            .count();

        Self {
            total_companies: companies.len(),
            emails_today: logs.iter().filter(|l| l.date_sent >= today_start).count(),
            emails_week: logs.iter().filter(|l| l.date_sent >= week_start).count(),
            emails_month: logs.len(),
            upcoming_follow_ups: open()
                .filter(|l| l.follow_up_date.is_some_and(|d| d > now_ms))
                .count(),
            follow_ups_today: open().filter(|l| falls_on_day_of(l, now)).count(),
            overdue_follow_ups: open()
                .filter(|l| l.follow_up_date.is_some_and(|d| d < today_start))
                .count(),
            response_rate: percent(interested, contacted.len()),
        }
    }
}

/// Open follow-ups whose date is on the same calendar day as `now`
pub fn follow_ups_due_on<Tz: TimeZone>(logs: &[EmailLog], now: &DateTime<Tz>) -> Vec<EmailLog> {
    logs.iter()
        .filter(|l| !l.completed && falls_on_day_of(l, now))
        .cloned()
        .collect()
}

fn falls_on_day_of<Tz: TimeZone>(log: &EmailLog, now: &DateTime<Tz>) -> bool {
    let Some(millis) = log.follow_up_date else {
        return false;
    };
    now.timezone()
        .timestamp_millis_opt(millis)
        .single()
        .is_some_and(|due| due.date_naive() == now.date_naive())
}

/// Local midnight of `now`'s day in epoch milliseconds
fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> i64 {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| now.timezone().from_local_datetime(&midnight).earliest())
        .map_or_else(|| now.timestamp_millis(), |start| start.timestamp_millis())
}

/// round(100 * part / whole), 0 for an empty whole
fn percent(part: usize, whole: usize) -> u32 {
    if whole == 0 {
        return 0;
    }
    let rounded = (part * 200 + whole) / (2 * whole);
    u32::try_from(rounded).unwrap_or(u32::MAX)
}
