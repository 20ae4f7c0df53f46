use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate, Weekday};

/// Source of market holidays consulted by the admission gate.
pub trait HolidayCalendar {
    fn holiday_name(&self, date: NaiveDate) -> Option<String>;
}

/// New York Stock Exchange full-day closures.
///
/// Rules are computed per year rather than read from a table, so the calendar
/// never runs out. One-off closures (weather, national days of mourning) are
/// listed in `SPECIAL_CLOSURES`.
#[derive(Debug, Clone, Copy, Default)]
pub struct NyseCalendar;

const SPECIAL_CLOSURES: &[(i32, u32, u32, &str)] = &[
    (2001, 9, 11, "Closed for Sept 11, 2001 Attacks"),
    (2001, 9, 12, "Closed for Sept 11, 2001 Attacks"),
    (2001, 9, 13, "Closed for Sept 11, 2001 Attacks"),
    (2001, 9, 14, "Closed for Sept 11, 2001 Attacks"),
    (2004, 6, 11, "Day of Mourning for President Ronald Reagan"),
    (2007, 1, 2, "Day of Mourning for President Gerald R. Ford"),
    (2012, 10, 29, "Hurricane Sandy"),
    (2012, 10, 30, "Hurricane Sandy"),
    (2018, 12, 5, "Day of Mourning for President George H.W. Bush"),
    (2025, 1, 9, "Day of Mourning for President Jimmy Carter"),
];

impl NyseCalendar {
    /// All closures falling in `year`, sorted by date.
    pub fn holidays_for_year(year: i32) -> Vec<(NaiveDate, String)> {
        let rule_based = [
            new_years_day(year),
            (year >= 1998)
                .then(|| NaiveDate::from_weekday_of_month_opt(year, 1, Weekday::Mon, 3))
                .flatten()
                .map(|date| (date, "Martin Luther King Jr. Day".to_string())),
            NaiveDate::from_weekday_of_month_opt(year, 2, Weekday::Mon, 3)
                .map(|date| (date, "Washington's Birthday".to_string())),
            easter_sunday(year).map(|easter| (easter - Duration::days(2), "Good Friday".to_string())),
            last_weekday_of_month(year, 5, Weekday::Mon)
                .map(|date| (date, "Memorial Day".to_string())),
            (year >= 2022)
                .then(|| fixed_observed(year, 6, 19, "Juneteenth National Independence Day"))
                .flatten(),
            fixed_observed(year, 7, 4, "Independence Day"),
            NaiveDate::from_weekday_of_month_opt(year, 9, Weekday::Mon, 1)
                .map(|date| (date, "Labor Day".to_string())),
            NaiveDate::from_weekday_of_month_opt(year, 11, Weekday::Thu, 4)
                .map(|date| (date, "Thanksgiving Day".to_string())),
            fixed_observed(year, 12, 25, "Christmas Day"),
        ];

        let special = SPECIAL_CLOSURES
            .iter()
            .filter(|(y, ..)| *y == year)
            .filter_map(|&(y, m, d, name)| {
                NaiveDate::from_ymd_opt(y, m, d).map(|date| (date, name.to_string()))
            });

        let mut days: Vec<(NaiveDate, String)> =
            rule_based.into_iter().flatten().chain(special).collect();
        days.sort_by_key(|(date, _)| *date);
        days
    }
}

impl HolidayCalendar for NyseCalendar {
    fn holiday_name(&self, date: NaiveDate) -> Option<String> {
        Self::holidays_for_year(date.year())
            .into_iter()
            .find(|(day, _)| *day == date)
            .map(|(_, name)| name)
    }
}

/// New Year's Day falling on a Saturday is not observed on the prior Friday.
fn new_years_day(year: i32) -> Option<(NaiveDate, String)> {
    let date = NaiveDate::from_ymd_opt(year, 1, 1)?;
    match date.weekday() {
        Weekday::Sat => None,
        Weekday::Sun => Some((date + Duration::days(1), "New Year's Day (observed)".into())),
        _ => Some((date, "New Year's Day".into())),
    }
}

/// Fixed-date holiday shifted to Friday/Monday when it lands on a weekend.
fn fixed_observed(year: i32, month: u32, day: u32, name: &str) -> Option<(NaiveDate, String)> {
    let date = NaiveDate::from_ymd_opt(year, month, day)?;
    Some(match date.weekday() {
        Weekday::Sat => (date - Duration::days(1), format!("{name} (observed)")),
        Weekday::Sun => (date + Duration::days(1), format!("{name} (observed)")),
        _ => (date, name.to_string()),
    })
}

fn last_weekday_of_month(year: i32, month: u32, weekday: Weekday) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let mut day = first_of_next.pred_opt()?;
    while day.weekday() != weekday {
        day = day.pred_opt()?;
    }
    Some(day)
}

/// Gregorian Easter Sunday (anonymous Gregorian algorithm).
fn easter_sunday(year: i32) -> Option<NaiveDate> {
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

/// Fixed list of closures, for tests and exchange-specific overrides.
#[derive(Debug, Clone, Default)]
pub struct StaticCalendar {
    days: BTreeMap<NaiveDate, String>,
}

impl<S: Into<String>> FromIterator<(NaiveDate, S)> for StaticCalendar {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, S)>>(iter: I) -> Self {
        Self {
            days: iter
                .into_iter()
                .map(|(date, name)| (date, name.into()))
                .collect(),
        }
    }
}

impl HolidayCalendar for StaticCalendar {
    fn holiday_name(&self, date: NaiveDate) -> Option<String> {
        self.days.get(&date).cloned()
    }
}
