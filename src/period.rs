//! Period boundaries and BYxxx expansion within a period.

use crate::rrule::{Rule, WeekdayNum};
use crate::Frequency;
use chrono::{Datelike as _, Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike as _, Weekday};

/// One step of a rule's frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Period {
    Year(i32),
    Month(i32, u32),
    /// Starts on the rule's week start day.
    Week(NaiveDate),
    Day(NaiveDate),
    /// An hour, minute or second, by its first instant.
    Time(NaiveDateTime),
}

impl Period {
    pub(crate) fn start(&self) -> Option<NaiveDateTime> {
        match *self {
            Period::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1).map(midnight),
            Period::Month(year, month) => NaiveDate::from_ymd_opt(year, month, 1).map(midnight),
            Period::Week(date) | Period::Day(date) => Some(midnight(date)),
            Period::Time(time) => Some(time),
        }
    }
}

/// A rule's BYxxx lists with the parts it leaves out derived from the anchor.
#[derive(Debug, Clone)]
pub(crate) struct Expansion {
    freq: Frequency,
    interval: u32,
    week_start: Weekday,
    origin: NaiveDateTime,
    months: Vec<u32>,
    week_nos: Vec<i8>,
    year_days: Vec<i16>,
    month_days: Vec<i8>,
    week_days: Vec<WeekdayNum>,
    hours: Vec<u32>,
    minutes: Vec<u32>,
    seconds: Vec<u32>,
    set_pos: Vec<i16>,
    nanos: u32,
}

impl Expansion {
    pub(crate) fn new(rule: &Rule, anchor: NaiveDateTime) -> Self {
        let freq = rule.freq();
        let mut months: Vec<u32> = rule.by_month().iter().map(|&m| u32::from(m)).collect();
        let mut month_days = rule.by_month_day().to_vec();
        let mut week_days = rule.by_day().to_vec();

        if rule.by_week_no().is_empty()
            && rule.by_year_day().is_empty()
            && month_days.is_empty()
            && week_days.is_empty()
        {
            match freq {
                Frequency::Yearly => {
                    if months.is_empty() {
                        months.push(anchor.month());
                    }
                    month_days.push(anchor.day() as i8);
                }
                Frequency::Monthly => month_days.push(anchor.day() as i8),
                Frequency::Weekly => week_days.push(anchor.weekday().into()),
                _ => {}
            }
        }

        let date = anchor.date();
        let origin = match freq {
            Frequency::Yearly => date.with_ordinal(1).map(midnight),
            Frequency::Monthly => date.with_day(1).map(midnight),
            Frequency::Weekly => Some(midnight(week_start(date, rule.week_start()))),
            Frequency::Daily => Some(midnight(date)),
            Frequency::Hourly => anchor.date().and_hms_opt(anchor.hour(), 0, 0),
            Frequency::Minutely => anchor.date().and_hms_opt(anchor.hour(), anchor.minute(), 0),
            Frequency::Secondly => anchor.with_nanosecond(0),
        }
        .unwrap_or(anchor);

        Expansion {
            freq,
            interval: rule.interval(),
            week_start: rule.week_start(),
            origin,
            months,
            week_nos: rule.by_week_no().to_vec(),
            year_days: rule.by_year_day().to_vec(),
            month_days,
            week_days,
            hours: filled(rule.by_hour(), freq > Frequency::Hourly, anchor.hour()),
            minutes: filled(rule.by_minute(), freq > Frequency::Minutely, anchor.minute()),
            seconds: filled(rule.by_second(), freq > Frequency::Secondly, anchor.second()),
            set_pos: rule.by_set_pos().to_vec(),
            nanos: anchor.nanosecond(),
        }
    }

    /// The `index`th period visited, `interval` periods apart. `None` once
    /// the calendar runs out.
    pub(crate) fn period(&self, index: u64) -> Option<Period> {
        let step = i64::try_from(index.checked_mul(u64::from(self.interval))?).ok()?;
        let origin = self.origin;

        let period = match self.freq {
            Frequency::Yearly => {
                let year = i32::try_from(i64::from(origin.year()).checked_add(step)?).ok()?;
                NaiveDate::from_ymd_opt(year, 1, 1)?;
                Period::Year(year)
            }
            Frequency::Monthly => {
                let months = (i64::from(origin.year()) * 12 + i64::from(origin.month0()))
                    .checked_add(step)?;
                let year = i32::try_from(months.div_euclid(12)).ok()?;
                let month = u32::try_from(months.rem_euclid(12)).ok()? + 1;
                NaiveDate::from_ymd_opt(year, month, 1)?;
                Period::Month(year, month)
            }
            Frequency::Weekly => Period::Week(
                origin
                    .date()
                    .checked_add_signed(Duration::try_weeks(step)?)?,
            ),
            Frequency::Daily => {
                Period::Day(origin.date().checked_add_signed(Duration::try_days(step)?)?)
            }
            Frequency::Hourly => {
                Period::Time(origin.checked_add_signed(Duration::try_hours(step)?)?)
            }
            Frequency::Minutely => {
                Period::Time(origin.checked_add_signed(Duration::try_minutes(step)?)?)
            }
            Frequency::Secondly => {
                Period::Time(origin.checked_add_signed(Duration::try_seconds(step)?)?)
            }
        };
        Some(period)
    }

    /// Index of the period containing `local`, or of the first period when
    /// `local` comes before it.
    pub(crate) fn index_at(&self, local: NaiveDateTime) -> u64 {
        let origin = self.origin;
        let units = match self.freq {
            Frequency::Yearly => i64::from(local.year() - origin.year()),
            Frequency::Monthly => {
                i64::from(local.year() - origin.year()) * 12 + i64::from(local.month0())
                    - i64::from(origin.month0())
            }
            Frequency::Weekly => {
                (week_start(local.date(), self.week_start) - origin.date()).num_days() / 7
            }
            Frequency::Daily => (local.date() - origin.date()).num_days(),
            Frequency::Hourly => (local - origin).num_hours(),
            Frequency::Minutely => (local - origin).num_minutes(),
            Frequency::Secondly => (local - origin).num_seconds(),
        };
        u64::try_from(units.div_euclid(i64::from(self.interval))).unwrap_or(0)
    }

    /// Index of the first period starting at or after `local`.
    pub(crate) fn index_from(&self, local: NaiveDateTime) -> u64 {
        let index = self.index_at(local);
        match self.period(index).and_then(|period| period.start()) {
            Some(start) if start < local => index + 1,
            _ => index,
        }
    }

    /// For day-or-finer periods that cannot produce anything, the earliest
    /// wall clock worth looking at next.
    pub(crate) fn skip_target(&self, period: Period) -> Option<NaiveDateTime> {
        let (date, time) = match period {
            Period::Day(date) => (date, None),
            Period::Time(time) => (time.date(), Some(time)),
            _ => return None,
        };

        if !accepts(&self.months, date.month()) {
            return first_of_next_month(date).map(midnight);
        }
        if !self.date_matches(date) {
            return date.succ_opt().map(midnight);
        }

        let time = time?;
        let hour = time.date().and_hms_opt(time.hour(), 0, 0)?;
        if self.freq < Frequency::Hourly && !accepts(&self.hours, time.hour()) {
            return hour.checked_add_signed(Duration::hours(1));
        }
        if self.freq == Frequency::Secondly && !accepts(&self.minutes, time.minute()) {
            let minute = hour.with_minute(time.minute())?;
            return minute.checked_add_signed(Duration::minutes(1));
        }
        None
    }

    /// Every candidate of `period` in ascending order, BYSETPOS applied.
    pub(crate) fn candidates(&self, period: Period) -> Vec<NaiveDateTime> {
        let mut candidates = Vec::new();

        if let Period::Time(time) = period {
            if self.date_matches(time.date()) {
                candidates.extend(
                    self.times_within(time)
                        .into_iter()
                        .map(|t| time.date().and_time(t)),
                );
            }
        } else {
            let times = self.times();
            for date in self.dates(period).into_iter().filter(|d| self.date_matches(*d)) {
                candidates.extend(times.iter().map(|t| date.and_time(*t)));
            }
        }

        self.select_positions(candidates)
    }

    fn dates(&self, period: Period) -> Vec<NaiveDate> {
        match period {
            Period::Year(year) if !self.months.is_empty() && self.week_nos.is_empty() => self
                .months
                .iter()
                .filter_map(|&month| NaiveDate::from_ymd_opt(year, month, 1))
                .flat_map(|first| first.iter_days().take(days_in_month(first) as usize))
                .collect(),
            Period::Year(year) => NaiveDate::from_ymd_opt(year, 1, 1)
                .map(|first| first.iter_days().take(days_in_year(year) as usize).collect())
                .unwrap_or_default(),
            Period::Month(year, month) => NaiveDate::from_ymd_opt(year, month, 1)
                .map(|first| first.iter_days().take(days_in_month(first) as usize).collect())
                .unwrap_or_default(),
            Period::Week(first) => first.iter_days().take(7).collect(),
            Period::Day(date) => vec![date],
            Period::Time(time) => vec![time.date()],
        }
    }

    fn date_matches(&self, date: NaiveDate) -> bool {
        accepts(&self.months, date.month())
            && (self.week_nos.is_empty() || self.week_no_matches(date))
            && (self.year_days.is_empty() || self.year_day_matches(date))
            && (self.month_days.is_empty() || self.month_day_matches(date))
            && (self.week_days.is_empty() || self.week_day_matches(date))
    }

    fn week_no_matches(&self, date: NaiveDate) -> bool {
        let Some((week, weeks)) = week_number(date, self.week_start) else {
            return false;
        };
        self.week_nos.iter().map(|&n| i64::from(n)).any(|n| {
            if n > 0 {
                n == week
            } else {
                n == week - weeks - 1
            }
        })
    }

    fn year_day_matches(&self, date: NaiveDate) -> bool {
        let day = i64::from(date.ordinal());
        let len = days_in_year(date.year());
        self.year_days
            .iter()
            .map(|&n| i64::from(n))
            .any(|n| if n > 0 { n == day } else { n == day - len - 1 })
    }

    fn month_day_matches(&self, date: NaiveDate) -> bool {
        let day = i64::from(date.day());
        let len = date.with_day(1).map_or(31, days_in_month);
        self.month_days
            .iter()
            .map(|&n| i64::from(n))
            .any(|n| if n > 0 { n == day } else { n == day - len - 1 })
    }

    fn week_day_matches(&self, date: NaiveDate) -> bool {
        self.week_days.iter().any(|wd| {
            wd.weekday == date.weekday()
                && wd.ordinal.map_or(true, |n| {
                    let Some((first, len)) = self.ordinal_scope(date) else {
                        return false;
                    };
                    let index = (date - first).num_days();
                    let n = i64::from(n);
                    n == index / 7 + 1 || n == -((len - 1 - index) / 7 + 1)
                })
        })
    }

    // BYDAY=2MO counts within the year unless the rule narrows it to months.
    fn ordinal_scope(&self, date: NaiveDate) -> Option<(NaiveDate, i64)> {
        if self.freq == Frequency::Yearly && self.months.is_empty() {
            Some((date.with_ordinal(1)?, days_in_year(date.year())))
        } else {
            let first = date.with_day(1)?;
            Some((first, days_in_month(first)))
        }
    }

    fn times(&self) -> Vec<NaiveTime> {
        let mut times =
            Vec::with_capacity(self.hours.len() * self.minutes.len() * self.seconds.len());
        for &hour in &self.hours {
            for &minute in &self.minutes {
                for &second in &self.seconds {
                    // second 60 has no representation and is dropped
                    let time = NaiveTime::from_hms_nano_opt(hour, minute, second, self.nanos);
                    if let Some(time) = time {
                        times.push(time);
                    }
                }
            }
        }
        times
    }

    fn times_within(&self, time: NaiveDateTime) -> Vec<NaiveTime> {
        if !accepts(&self.hours, time.hour()) {
            return Vec::new();
        }

        let minutes = if self.freq == Frequency::Hourly {
            self.minutes.clone()
        } else if accepts(&self.minutes, time.minute()) {
            vec![time.minute()]
        } else {
            return Vec::new();
        };

        let seconds = if self.freq != Frequency::Secondly {
            self.seconds.clone()
        } else if accepts(&self.seconds, time.second()) {
            vec![time.second()]
        } else {
            return Vec::new();
        };

        let mut times = Vec::with_capacity(minutes.len() * seconds.len());
        for &minute in &minutes {
            for &second in &seconds {
                let hour = time.hour();
                if let Some(t) = NaiveTime::from_hms_nano_opt(hour, minute, second, self.nanos) {
                    times.push(t);
                }
            }
        }
        times
    }

    fn select_positions(&self, candidates: Vec<NaiveDateTime>) -> Vec<NaiveDateTime> {
        if self.set_pos.is_empty() {
            return candidates;
        }

        let len = candidates.len() as i64;
        let mut selected: Vec<NaiveDateTime> = self
            .set_pos
            .iter()
            .map(|&pos| i64::from(pos))
            .filter_map(|pos| {
                let index = if pos > 0 { pos - 1 } else { len + pos };
                usize::try_from(index)
                    .ok()
                    .and_then(|i| candidates.get(i).copied())
            })
            .collect();
        selected.sort_unstable();
        selected.dedup();
        selected
    }
}

/// First day of the week holding `date`, weeks starting on `week_start`.
pub(crate) fn week_start(date: NaiveDate, week_start: Weekday) -> NaiveDate {
    let back = (7 + date.weekday().num_days_from_monday() - week_start.num_days_from_monday()) % 7;
    date - Duration::days(i64::from(back))
}

/// Week 1 is the first week with at least four days in the year.
fn first_week(year: i32, week_start_day: Weekday) -> Option<NaiveDate> {
    let jan_1 = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let start = week_start(jan_1, week_start_day);
    if (jan_1 - start).num_days() <= 3 {
        Some(start)
    } else {
        start.checked_add_signed(Duration::days(7))
    }
}

/// The week number of `date` within the week-numbering year it belongs to,
/// and how many weeks that year has.
pub(crate) fn week_number(date: NaiveDate, week_start_day: Weekday) -> Option<(i64, i64)> {
    let year = date.year();
    let mut first = first_week(year, week_start_day)?;
    let mut next = first_week(year + 1, week_start_day)?;

    if date < first {
        next = first;
        first = first_week(year - 1, week_start_day)?;
    } else if date >= next {
        first = next;
        next = first_week(year + 2, week_start_day)?;
    }

    Some(((date - first).num_days() / 7 + 1, (next - first).num_days() / 7))
}

pub(crate) fn days_in_year(year: i32) -> i64 {
    if NaiveDate::from_ymd_opt(year, 2, 29).is_some() {
        366
    } else {
        365
    }
}

/// Length of the month starting at `first`.
pub(crate) fn days_in_month(first: NaiveDate) -> i64 {
    first_of_next_month(first).map_or(31, |next| (next - first).num_days())
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

fn accepts(values: &[u32], value: u32) -> bool {
    values.is_empty() || values.contains(&value)
}

fn filled(values: &[u8], derive: bool, anchor: u32) -> Vec<u32> {
    if values.is_empty() && derive {
        vec![anchor]
    } else {
        values.iter().map(|&v| u32::from(v)).collect()
    }
}
