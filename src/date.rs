//! Loose date text to `YYYY-MM-DD`.
//!
//! Listing pages print dates as `day/month/year` somewhere inside free text
//! (`"Thứ hai, 5/3/2024, 10:15 (GMT+7)"`). The first such match wins. When
//! nothing matches the caller's "today" is used instead, so every article
//! always carries a date.

use std::sync::OnceLock;

use chrono::{Local, NaiveDate};
use regex::Regex;

static DMY_DATE: OnceLock<Regex> = OnceLock::new();

fn dmy_date() -> &'static Regex {
    DMY_DATE.get_or_init(|| {
        Regex::new(r"(\d{1,2})/(\d{1,2})/(\d{4})").expect("date pattern is valid")
    })
}

/// Normalize against the current local date.
pub fn normalize(raw: &str) -> String {
    normalize_on(raw, Local::now().date_naive())
}

/// Normalize, falling back to `today` when `raw` holds no date.
///
/// Day and month are zero-padded but not range-checked: `"31/13/2024"`
/// becomes `"2024-13-31"`.
pub fn normalize_on(raw: &str, today: NaiveDate) -> String {
    match dmy_date().captures(raw) {
        Some(caps) => format!("{}-{:0>2}-{:0>2}", &caps[3], &caps[2], &caps[1]),
        None => today.format("%Y-%m-%d").to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn reorders_day_month_year() {
        assert_eq!(
            normalize_on("bài viết ngày 5/3/2024", day(2030, 1, 1)),
            "2024-03-05"
        );
        assert_eq!(normalize_on("12/11/2023", day(2030, 1, 1)), "2023-11-12");
    }

    #[test]
    fn first_match_wins() {
        assert_eq!(
            normalize_on("1/2/2020 updated 3/4/2021", day(2030, 1, 1)),
            "2020-02-01"
        );
    }

    #[test]
    fn falls_back_to_given_day() {
        assert_eq!(normalize_on("no date here", day(2024, 7, 9)), "2024-07-09");
        assert_eq!(normalize_on("", day(2024, 7, 9)), "2024-07-09");
        // two-digit years are not dates
        assert_eq!(normalize_on("5/3/24", day(2024, 7, 9)), "2024-07-09");
    }

    #[test]
    fn out_of_range_values_pass_through() {
        assert_eq!(normalize_on("31/13/2024", day(2030, 1, 1)), "2024-13-31");
    }

    #[test]
    fn normalize_without_date_uses_today() {
        let before = Local::now().date_naive().format("%Y-%m-%d").to_string();
        let result = normalize("no date here");
        let after = Local::now().date_naive().format("%Y-%m-%d").to_string();
        assert!(result == before || result == after);
    }
}
