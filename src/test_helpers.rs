use crate::CalDateTime;
use chrono::{Duration, NaiveDate, NaiveDateTime};

pub const ONE_HOUR: Duration = Duration::hours(1);
pub const ONE_DAY: Duration = Duration::days(1);
pub const ONE_WEEK: Duration = Duration::weeks(1);

pub fn ymd(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).unwrap()
}

pub fn ymd_hms(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> NaiveDateTime {
    ymd(year, month, day).and_hms_opt(hour, min, sec).unwrap()
}

pub fn floating(year: i32, month: u32, day: u32, hour: u32, min: u32) -> CalDateTime {
    CalDateTime::floating(ymd_hms(year, month, day, hour, min, 0))
}

/// Monday, July 1st 2024 at 09:00, floating.
pub fn july_first() -> CalDateTime {
    floating(2024, 7, 1, 9, 0)
}

pub fn locals<'a>(dates: impl IntoIterator<Item = &'a CalDateTime>) -> Vec<NaiveDateTime> {
    dates.into_iter().map(CalDateTime::naive_local).collect()
}
