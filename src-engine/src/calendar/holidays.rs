//! Public holiday tables.

use chrono::{Duration, NaiveDate};

/// Which public holiday calendar to exclude from delivery days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HolidayRegion {
    #[default]
    Hungary,
    /// No public holidays, only weekends and configured closures.
    None,
}

impl HolidayRegion {
    /// Convert from the settings representation.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "hungary" | "hu" => Some(Self::Hungary),
            "none" | "" => Some(Self::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hungary => "hungary",
            Self::None => "none",
        }
    }

    /// Every public holiday of `year` in this region.
    pub fn holidays(&self, year: i32) -> Vec<NaiveDate> {
        match self {
            Self::Hungary => hungary(year),
            Self::None => Vec::new(),
        }
    }
}

/// Easter Sunday, anonymous Gregorian algorithm.
pub fn easter_sunday(year: i32) -> Option<NaiveDate> {
    let a = year % 19;
    let b = year / 100;
    let c = year % 100;
    let d = b / 4;
    let e = b % 4;
    let f = (b + 8) / 25;
    let g = (b - f + 1) / 3;
    let h = (19 * a + b - d - g + 15) % 30;
    let i = c / 4;
    let k = c % 4;
    let l = (32 + 2 * e + 2 * i - h - k) % 7;
    let m = (a + 11 * h + 22 * l) / 451;
    let month = (h + l - 7 * m + 114) / 31;
    let day = (h + l - 7 * m + 114) % 31 + 1;
    NaiveDate::from_ymd_opt(year, month as u32, day as u32)
}

fn hungary(year: i32) -> Vec<NaiveDate> {
    let fixed = [
        (1, 1),   // New Year's Day
        (3, 15),  // 1848 Revolution memorial
        (5, 1),   // Labour Day
        (8, 20),  // State Foundation Day
        (10, 23), // 1956 Revolution memorial
        (11, 1),  // All Saints' Day
        (12, 25), // Christmas
        (12, 26), // Second day of Christmas
    ];
    let mut days: Vec<NaiveDate> = fixed
        .iter()
        .filter_map(|&(month, day)| NaiveDate::from_ymd_opt(year, month, day))
        .collect();

    if let Some(easter) = easter_sunday(year) {
        // Good Friday only became a public holiday in 2017.
        if year >= 2017 {
            days.push(easter - Duration::days(2));
        }
        days.push(easter);
        days.push(easter + Duration::days(1));
        // Whit Sunday and Monday
        days.push(easter + Duration::days(49));
        days.push(easter + Duration::days(50));
    }

    days.sort();
    days
}
