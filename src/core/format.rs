//! Presentation helpers for decoded card fields.
//!
//! All of these return their input unchanged when it does not have the
//! expected shape, so a half-read card still produces something printable.

use std::fmt;

use chrono::{Datelike, Local, NaiveDate};

pub const CID_LENGTH: usize = 13;

pub const THAI_MONTHS: [&str; 12] = [
    "มกราคม",
    "กุมภาพันธ์",
    "มีนาคม",
    "เมษายน",
    "พฤษภาคม",
    "มิถุนายน",
    "กรกฎาคม",
    "สิงหาคม",
    "กันยายน",
    "ตุลาคม",
    "พฤศจิกายน",
    "ธันวาคม",
];

/// Offset between the Gregorian and Buddhist Era calendars.
pub const BUDDHIST_ERA_OFFSET: i32 = 543;

/// `1234567890123` → `1-2345-67890-12-3`
pub fn format_cid_hyphenated(cid: &str) -> String {
    let digits: Vec<char> = cid.chars().collect();
    if digits.len() != CID_LENGTH {
        return cid.to_string();
    }

    [&digits[0..1], &digits[1..5], &digits[5..10], &digits[10..12], &digits[12..13]]
        .iter()
        .map(|group| group.iter().collect::<String>())
        .collect::<Vec<_>>()
        .join("-")
}

/// `1234567890123` → `1 2 3 4 5 6 7 8 9 0 1 2 3`, for forms with one box per
/// digit.
pub fn format_cid_spaced(cid: &str) -> String {
    if cid.chars().count() != CID_LENGTH {
        return cid.to_string();
    }

    cid.chars()
        .map(String::from)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Thai month name for a 1-based month.
pub fn thai_month_name(month: u32) -> Option<&'static str> {
    let index = usize::try_from(month).ok()?.checked_sub(1)?;
    THAI_MONTHS.get(index).copied()
}

/// Calendar date as stored on the card (`YYYYMMDD`).
///
/// Card dates are already in the Buddhist Era, and day or month may be zero
/// when unknown, so this is not a validated calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThaiDate {
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl ThaiDate {
    /// Parse exactly eight ASCII digits with a month in `1..=12`.
    pub fn parse(yyyymmdd: &str) -> Option<Self> {
        if yyyymmdd.len() != 8 || !yyyymmdd.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let year = yyyymmdd[0..4].parse().ok()?;
        let month = yyyymmdd[4..6].parse().ok()?;
        let day = yyyymmdd[6..8].parse().ok()?;
        thai_month_name(month)?;

        Some(Self { day, month, year })
    }

    /// Gregorian date shifted into the Buddhist Era.
    pub fn from_gregorian(date: NaiveDate) -> Self {
        Self {
            day: date.day(),
            month: date.month(),
            year: date.year() + BUDDHIST_ERA_OFFSET,
        }
    }

    pub fn today() -> Self {
        Self::from_gregorian(Local::now().date_naive())
    }

    pub fn month_name(&self) -> &'static str {
        thai_month_name(self.month).unwrap_or_default()
    }
}

impl fmt::Display for ThaiDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.day, self.month_name(), self.year)
    }
}

/// `25470219` → `19 กุมภาพันธ์ 2547`. The year is printed as stored.
pub fn format_thai_date(yyyymmdd: &str) -> String {
    ThaiDate::parse(yyyymmdd)
        .map(|date| date.to_string())
        .unwrap_or_else(|| yyyymmdd.to_string())
}

/// Gender code on the card: `1` male, `2` female.
pub fn gender_label(code: &str) -> String {
    match code.trim() {
        "1" => "ชาย".to_string(),
        "2" => "หญิง".to_string(),
        other => other.to_string(),
    }
}

/// Title (first word) of a decoded full name, e.g. `นาย`.
pub fn name_prefix(full_name: &str) -> String {
    full_name
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_formatters() {
        assert_eq!(format_cid_hyphenated("1234567890123"), "1-2345-67890-12-3");
        assert_eq!(
            format_cid_spaced("1234567890123"),
            "1 2 3 4 5 6 7 8 9 0 1 2 3"
        );
    }

    #[test]
    fn test_cid_wrong_length_unchanged() {
        for cid in ["", "123", "12345678901234", "123456789012"] {
            assert_eq!(format_cid_hyphenated(cid), cid);
            assert_eq!(format_cid_spaced(cid), cid);
        }
    }

    #[test]
    fn test_thai_date() {
        let date = ThaiDate::parse("20040219").unwrap();
        assert_eq!(date, ThaiDate { day: 19, month: 2, year: 2004 });
        assert_eq!(date.month_name(), "กุมภาพันธ์");
        assert_eq!(format_thai_date("20040219"), "19 กุมภาพันธ์ 2004");
        assert_eq!(format_thai_date("25470219"), "19 กุมภาพันธ์ 2547");
        assert_eq!(format_thai_date("25301201"), "1 ธันวาคม 2530");
    }

    #[test]
    fn test_thai_date_malformed_unchanged() {
        for input in ["", "2004021", "200402190", "2004AB19", "20041319", "20040019", "-2004021"] {
            assert_eq!(format_thai_date(input), input);
        }
    }

    #[test]
    fn test_from_gregorian() {
        let date = NaiveDate::from_ymd_opt(2025, 5, 9).unwrap();
        let thai = ThaiDate::from_gregorian(date);
        assert_eq!(thai.year, 2568);
        assert_eq!(thai.to_string(), "9 พฤษภาคม 2568");
    }

    #[test]
    fn test_month_names() {
        assert_eq!(thai_month_name(1), Some("มกราคม"));
        assert_eq!(thai_month_name(12), Some("ธันวาคม"));
        assert_eq!(thai_month_name(0), None);
        assert_eq!(thai_month_name(13), None);
    }

    #[test]
    fn test_gender_and_prefix() {
        assert_eq!(gender_label("1"), "ชาย");
        assert_eq!(gender_label("2"), "หญิง");
        assert_eq!(gender_label("9"), "9");
        assert_eq!(name_prefix("นาย สมชาย ใจดี"), "นาย");
        assert_eq!(name_prefix(""), "");
    }
}
