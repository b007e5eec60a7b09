//! Proxy health scoring
//!
//! Additive, fixed-weight rating in `[0, 100]`:
//!
//! | factor          | points                                   |
//! |-----------------|------------------------------------------|
//! | working         | 40                                       |
//! | latency         | <100ms 30, <300ms 20, <500ms 10, else 5, unknown 15 |
//! | failures        | 0 → 20, 1-2 → 15, 3-5 → 10, else 5       |
//! | check recency   | <1h 10, <24h 7, <7d 5, older 2, never 1  |
//!
//! A proxy that is not working always scores 0.

use chrono::{DateTime, Duration, Utc};

use crate::models::Proxy;

pub const MAX_SCORE: f64 = 100.0;

const WORKING_POINTS: f64 = 40.0;

/// Score a proxy against the current time
pub fn score(proxy: &Proxy) -> f64 {
    score_at(proxy, Utc::now())
}

/// Score a proxy as seen at `now`
pub fn score_at(proxy: &Proxy, now: DateTime<Utc>) -> f64 {
    if !proxy.is_working {
        return 0.0;
    }

    let total = WORKING_POINTS
        + latency_points(proxy.latency)
        + failure_points(proxy.fail_count)
        + recency_points(proxy.last_checked, now);

    total.min(MAX_SCORE)
}

fn latency_points(latency: Option<f64>) -> f64 {
    match latency {
        Some(ms) if ms < 100.0 => 30.0,
        Some(ms) if ms < 300.0 => 20.0,
        Some(ms) if ms < 500.0 => 10.0,
        Some(_) => 5.0,
        None => 15.0,
    }
}

fn failure_points(fail_count: u32) -> f64 {
    match fail_count {
        0 => 20.0,
        1..=2 => 15.0,
        3..=5 => 10.0,
        _ => 5.0,
    }
}

fn recency_points(last_checked: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let Some(checked) = last_checked else {
        return 1.0;
    };

    let age = now.signed_duration_since(checked);
    if age < Duration::hours(1) {
        10.0
    } else if age < Duration::hours(24) {
        7.0
    } else if age < Duration::days(7) {
        5.0
    } else {
        2.0
    }
}
