//! Presentation helpers for limiter state.

use std::fmt::Write;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};

use super::limiter::KeyStatus;

/// Render a remaining duration for people, rounding up.
///
/// Anything under a minute is shown in seconds, anything under an hour in
/// minutes, and longer spans as hours plus minutes. The result is never
/// below `"1 second"`, even for a zero duration.
pub fn format_remaining_time(remaining: Duration) -> String {
    let secs = (remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0)).max(1);

    if secs < 60 {
        return plural(secs, "second");
    }

    let minutes = secs.div_ceil(60);
    if minutes < 60 {
        return plural(minutes, "minute");
    }

    let hours = minutes / 60;
    let minutes = minutes % 60;
    if minutes == 0 {
        plural(hours, "hour")
    } else {
        format!("{} {}", plural(hours, "hour"), plural(minutes, "minute"))
    }
}

fn plural(count: u64, unit: &str) -> String {
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}

/// Render key statuses as a fixed-width text table for debugging.
pub fn render_status_table(statuses: &[KeyStatus]) -> String {
    const HEADERS: [&str; 5] = ["LIMITER", "KEY", "ATTEMPTS", "REMAINING", "RESET"];

    let rows: Vec<[String; 5]> = statuses
        .iter()
        .map(|status| {
            [
                status.limiter.clone(),
                status.key.clone(),
                status.attempts.to_string(),
                status.remaining_attempts.to_string(),
                status.reset_time.map(format_instant).unwrap_or_else(|| "-".to_string()),
            ]
        })
        .collect();

    let mut widths = HEADERS.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.len());
        }
    }

    let mut table = String::new();
    write_row(&mut table, &HEADERS, &widths);
    for row in &rows {
        write_row(&mut table, row, &widths);
    }
    table
}

fn write_row<S: AsRef<str>>(out: &mut String, cells: &[S], widths: &[usize]) {
    let line: Vec<String> = cells
        .iter()
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell.as_ref(), width = *width))
        .collect();
    let _ = writeln!(out, "{}", line.join("  ").trim_end());
}

fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_format_seconds() {
        assert_eq!(format_remaining_time(Duration::from_secs(1)), "1 second");
        assert_eq!(format_remaining_time(Duration::from_secs(45)), "45 seconds");
        assert_eq!(format_remaining_time(Duration::from_millis(1500)), "2 seconds");
    }

    #[test]
    fn test_format_zero_rounds_up_to_one_second() {
        assert_eq!(format_remaining_time(Duration::ZERO), "1 second");
        assert_eq!(format_remaining_time(Duration::from_nanos(1)), "1 second");
    }

    #[test]
    fn test_format_minutes_round_up() {
        assert_eq!(format_remaining_time(Duration::from_secs(60)), "1 minute");
        assert_eq!(format_remaining_time(Duration::from_secs(181)), "4 minutes");
        assert_eq!(format_remaining_time(Duration::from_secs(30 * 60)), "30 minutes");
    }

    #[test]
    fn test_format_hours() {
        assert_eq!(format_remaining_time(Duration::from_secs(3600)), "1 hour");
        assert_eq!(
            format_remaining_time(Duration::from_secs(2 * 3600 + 5 * 60)),
            "2 hours 5 minutes"
        );
        assert_eq!(
            format_remaining_time(Duration::from_secs(3600 + 1)),
            "1 hour 1 minute"
        );
    }

    #[test]
    fn test_render_status_table() {
        let reset = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(30);
        let statuses = vec![
            KeyStatus {
                limiter: "login".to_string(),
                key: "u@x.com:login".to_string(),
                attempts: 3,
                remaining_attempts: 0,
                reset_time: Some(reset),
            },
            KeyStatus {
                limiter: "password-reset".to_string(),
                key: "v@x.com:password-reset".to_string(),
                attempts: 1,
                remaining_attempts: 3,
                reset_time: None,
            },
        ];

        let table = render_status_table(&statuses);
        let lines: Vec<&str> = table.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("LIMITER"));
        assert!(lines[1].contains("u@x.com:login"));
        assert!(lines[1].contains("1970-01-01T00:30:00Z"));
        assert!(lines[2].ends_with('-'));

        let key_column = lines[0].find("KEY").unwrap();
        assert_eq!(lines[1].find("u@x.com"), Some(key_column));
        assert_eq!(lines[2].find("v@x.com"), Some(key_column));
    }

    #[test]
    fn test_render_empty_table() {
        assert_eq!(
            render_status_table(&[]),
            "LIMITER  KEY  ATTEMPTS  REMAINING  RESET\n"
        );
    }
}
