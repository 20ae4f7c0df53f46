//! Trading-calendar admission gate.
//!
//! Decides once per batch whether a capture run should go ahead. The gate is a
//! pure function of the date and the holiday calendar it was built with; any
//! force-override is applied by the caller, never here.

pub mod holidays;

use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;

pub use holidays::{HolidayCalendar, NyseCalendar, StaticCalendar};

/// Outcome of the admission check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Admission {
    pub allowed: bool,
    pub reason: String,
}

impl Admission {
    fn open() -> Self {
        Self {
            allowed: true,
            reason: "Market open".into(),
        }
    }

    fn closed(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

pub struct TradingCalendarGate<C> {
    calendar: C,
    non_trading_days: Vec<Weekday>,
}

impl<C: HolidayCalendar> TradingCalendarGate<C> {
    /// Gate with Saturday and Sunday as the non-trading days.
    pub fn new(calendar: C) -> Self {
        Self {
            calendar,
            non_trading_days: vec![Weekday::Sat, Weekday::Sun],
        }
    }

    pub fn with_non_trading_days(mut self, days: Vec<Weekday>) -> Self {
        self.non_trading_days = days;
        self
    }

    pub fn should_run(&self, today: NaiveDate) -> Admission {
        if self.non_trading_days.contains(&today.weekday()) {
            return Admission::closed("Weekend");
        }

        if let Some(name) = self.calendar.holiday_name(today) {
            return Admission::closed(format!("Holiday: {name}"));
        }

        Admission::open()
    }
}

impl Default for TradingCalendarGate<NyseCalendar> {
    fn default() -> Self {
        Self::new(NyseCalendar)
    }
}
