//! Floating, UTC and zoned date-times (RFC 5545 §3.3.5).

use crate::tz::{Ambiguity, Disambiguation, Resolver, TimeZone};
use crate::{Error, Result};
use chrono::{
    DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, NaiveTime, Offset as _, Utc,
};
use std::cmp::Ordering;
use std::sync::Arc;

/// Which timeline a [`CalDateTime`] lives on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Same wall clock in every zone.
    Floating,
    Utc,
    /// Wall clock in a named zone, with the offset in force at that wall clock.
    Zoned {
        tzid: Arc<str>,
        zone: TimeZone,
        offset: FixedOffset,
    },
}

/// An immutable calendar date-time.
///
/// Equality and ordering compare moments, not fields: two zoned values are
/// equal when they denote the same UTC instant, and a floating value compared
/// with a zoned or UTC one is read in the other side's zone.
#[derive(Debug, Clone)]
pub struct CalDateTime {
    local: NaiveDateTime,
    mode: Mode,
}

impl CalDateTime {
    pub fn floating(local: NaiveDateTime) -> Self {
        CalDateTime {
            local,
            mode: Mode::Floating,
        }
    }

    pub fn utc(utc: NaiveDateTime) -> Self {
        CalDateTime {
            local: utc,
            mode: Mode::Utc,
        }
    }

    pub fn now_utc() -> Self {
        CalDateTime::utc(Utc::now().naive_utc())
    }

    /// A wall clock in `zone`. A wall clock that falls in a gap is moved
    /// forward by the length of the gap.
    pub fn zoned(local: NaiveDateTime, tzid: impl Into<Arc<str>>, zone: TimeZone) -> Self {
        let (_, observed, offset) = zone.resolve_local(&local);
        CalDateTime {
            local: observed,
            mode: Mode::Zoned {
                tzid: tzid.into(),
                zone,
                offset,
            },
        }
    }

    /// Like [`CalDateTime::zoned`], looking the identifier up leniently.
    pub fn in_zone(local: NaiveDateTime, resolver: &Resolver, tzid: &str) -> Self {
        let resolution = resolver.resolve(tzid);
        CalDateTime::zoned(local, resolution.tzid, resolution.zone)
    }

    /// The moment `utc` as observed in `zone`.
    pub fn from_utc_in(utc: NaiveDateTime, tzid: impl Into<Arc<str>>, zone: TimeZone) -> Self {
        let offset = zone.offset_at_utc(&utc);
        CalDateTime {
            local: utc + seconds(offset),
            mode: Mode::Zoned {
                tzid: tzid.into(),
                zone,
                offset,
            },
        }
    }

    pub fn naive_local(&self) -> NaiveDateTime {
        self.local
    }

    pub fn date(&self) -> NaiveDate {
        self.local.date()
    }

    pub fn time(&self) -> NaiveTime {
        self.local.time()
    }

    pub fn mode(&self) -> &Mode {
        &self.mode
    }

    pub fn tzid(&self) -> Option<&str> {
        match &self.mode {
            Mode::Zoned { tzid, .. } => Some(tzid),
            _ => None,
        }
    }

    pub fn zone(&self) -> Option<TimeZone> {
        match &self.mode {
            Mode::Zoned { zone, .. } => Some(*zone),
            Mode::Utc => Some(TimeZone::utc()),
            Mode::Floating => None,
        }
    }

    /// Offset from UTC; floating values have none.
    pub fn offset(&self) -> Option<FixedOffset> {
        match &self.mode {
            Mode::Floating => None,
            Mode::Utc => Some(Utc.fix()),
            Mode::Zoned { offset, .. } => Some(*offset),
        }
    }

    pub fn is_floating(&self) -> bool {
        matches!(self.mode, Mode::Floating)
    }

    pub fn is_utc(&self) -> bool {
        matches!(self.mode, Mode::Utc)
    }

    pub fn naive_utc(&self) -> Option<NaiveDateTime> {
        self.offset().map(|offset| self.local - seconds(offset))
    }

    pub fn add_seconds(&self, n: i64) -> Result<Self> {
        self.add_exact(Duration::try_seconds(n).ok_or(Error::DateOutOfRange)?)
    }

    pub fn add_minutes(&self, n: i64) -> Result<Self> {
        self.add_exact(Duration::try_minutes(n).ok_or(Error::DateOutOfRange)?)
    }

    pub fn add_hours(&self, n: i64) -> Result<Self> {
        self.add_exact(Duration::try_hours(n).ok_or(Error::DateOutOfRange)?)
    }

    /// Calendar days: the wall clock is kept and the offset recomputed.
    pub fn add_days(&self, n: i64) -> Result<Self> {
        let days = Duration::try_days(n).ok_or(Error::DateOutOfRange)?;
        let local = self
            .local
            .checked_add_signed(days)
            .ok_or(Error::DateOutOfRange)?;
        Ok(self.with_local(local))
    }

    pub fn add_weeks(&self, n: i64) -> Result<Self> {
        self.add_days(n.checked_mul(7).ok_or(Error::DateOutOfRange)?)
    }

    /// Clamps the day to the target month's length: Jan 31 + 1 month is the
    /// last day of February.
    pub fn add_months(&self, n: i32) -> Result<Self> {
        let months = Months::new(n.unsigned_abs());
        let local = if n >= 0 {
            self.local.checked_add_months(months)
        } else {
            self.local.checked_sub_months(months)
        };
        Ok(self.with_local(local.ok_or(Error::DateOutOfRange)?))
    }

    pub fn add_years(&self, n: i32) -> Result<Self> {
        self.add_months(n.checked_mul(12).ok_or(Error::DateOutOfRange)?)
    }

    pub fn to_utc(&self) -> Result<Self> {
        self.naive_utc()
            .map(CalDateTime::utc)
            .ok_or(Error::FloatingConversion(self.local))
    }

    /// The same moment observed in another zone.
    pub fn to_zone(&self, resolver: &Resolver, tzid: &str) -> Result<Self> {
        let resolution = resolver.resolve(tzid);
        self.to_zone_with(resolution.tzid, resolution.zone)
    }

    pub fn to_zone_with(&self, tzid: impl Into<Arc<str>>, zone: TimeZone) -> Result<Self> {
        let utc = self.naive_utc().ok_or(Error::FloatingConversion(self.local))?;
        Ok(CalDateTime::from_utc_in(utc, tzid, zone))
    }

    /// Drops the zone and keeps the wall clock.
    pub fn to_floating(&self) -> Self {
        CalDateTime::floating(self.local)
    }

    pub fn compare(&self, other: &CalDateTime) -> Ordering {
        let context = if self.is_floating() { other } else { self };
        self.key_in(context).cmp(&other.key_in(context))
    }

    /// Gives a floating value the zone of `reference` while keeping its wall
    /// clock. Values that already have a zone are returned unchanged.
    pub fn associate_zone_from(&self, reference: &CalDateTime) -> Self {
        if !self.is_floating() {
            return self.clone();
        }

        match &reference.mode {
            Mode::Floating => self.clone(),
            Mode::Utc => CalDateTime::utc(self.local),
            Mode::Zoned { tzid, zone, .. } => CalDateTime::zoned(self.local, tzid.clone(), *zone),
        }
    }

    /// Brings this value onto the timeline of `reference` so both can be
    /// evaluated together: same zone, UTC, or wall clock when `reference`
    /// floats.
    pub fn match_zone(&self, reference: &CalDateTime) -> Self {
        let associated = self.associate_zone_from(reference);
        match (&reference.mode, associated.naive_utc()) {
            (Mode::Zoned { tzid, zone, .. }, Some(utc)) => {
                CalDateTime::from_utc_in(utc, tzid.clone(), *zone)
            }
            (Mode::Utc, Some(utc)) => CalDateTime::utc(utc),
            _ => associated.to_floating(),
        }
    }

    pub fn start_of_day(&self) -> Self {
        self.with_local(self.local.date().and_time(NaiveTime::MIN))
    }

    /// The last representable instant of this value's day.
    pub fn end_of_day(&self) -> Result<Self> {
        let end = self
            .local
            .date()
            .succ_opt()
            .map(|next| next.and_time(NaiveTime::MIN) - Duration::nanoseconds(1))
            .ok_or(Error::DateOutOfRange)?;
        Ok(self.with_local(end))
    }

    /// The value's position on the timeline shared with `context`: UTC when
    /// `context` has a zone, wall clock when it floats.
    pub(crate) fn key_in(&self, context: &CalDateTime) -> NaiveDateTime {
        match (&self.mode, &context.mode) {
            (_, Mode::Floating) | (Mode::Floating, Mode::Utc) | (Mode::Utc, _) => self.local,
            (Mode::Floating, Mode::Zoned { zone, .. }) => zone.resolve_local(&self.local).0,
            (Mode::Zoned { offset, .. }, _) => self.local - seconds(*offset),
        }
    }

    /// Every instant `local` denotes on this value's timeline, earliest
    /// first: two when a zoned wall clock falls in an overlap, otherwise one.
    pub(crate) fn readings_of(&self, local: NaiveDateTime) -> Vec<CalDateTime> {
        if let Mode::Zoned { tzid, zone, .. } = &self.mode {
            if zone.offset_at(&local).ambiguity == Ambiguity::AmbiguousOverlap {
                return [Disambiguation::Earlier, Disambiguation::Later]
                    .into_iter()
                    .map(|overlap| {
                        let (utc, _, _) = zone.with_disambiguation(overlap).resolve_local(&local);
                        CalDateTime::from_utc_in(utc, tzid.clone(), *zone)
                    })
                    .collect();
            }
        }
        vec![self.with_local(local)]
    }

    /// Same mode, new wall clock.
    pub(crate) fn with_local(&self, local: NaiveDateTime) -> Self {
        match &self.mode {
            Mode::Floating => CalDateTime::floating(local),
            Mode::Utc => CalDateTime::utc(local),
            Mode::Zoned { tzid, zone, .. } => CalDateTime::zoned(local, tzid.clone(), *zone),
        }
    }

    fn add_exact(&self, duration: Duration) -> Result<Self> {
        match &self.mode {
            Mode::Floating | Mode::Utc => {
                let local = self
                    .local
                    .checked_add_signed(duration)
                    .ok_or(Error::DateOutOfRange)?;
                Ok(self.with_local(local))
            }
            Mode::Zoned { tzid, zone, offset } => {
                let utc = (self.local - seconds(*offset))
                    .checked_add_signed(duration)
                    .ok_or(Error::DateOutOfRange)?;
                Ok(CalDateTime::from_utc_in(utc, tzid.clone(), *zone))
            }
        }
    }
}

impl PartialEq for CalDateTime {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl PartialOrd for CalDateTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare(other))
    }
}

impl From<DateTime<Utc>> for CalDateTime {
    fn from(utc: DateTime<Utc>) -> Self {
        CalDateTime::utc(utc.naive_utc())
    }
}

fn seconds(offset: FixedOffset) -> Duration {
    Duration::seconds(i64::from(offset.local_minus_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use approx::*;
    use chrono_tz::Tz;

    fn new_york() -> TimeZone {
        TimeZone::iana(Tz::America__New_York)
    }

    fn eastern(local: NaiveDateTime) -> CalDateTime {
        CalDateTime::zoned(local, "America/New_York", new_york())
    }

    #[test]
    fn now_is_now() {
        let now = CalDateTime::now_utc();
        assert_abs_diff_eq!(
            now.naive_utc().unwrap().and_utc().timestamp(),
            Utc::now().timestamp(),
            epsilon = 1
        );
    }

    #[test]
    fn month_arithmetic_clamps() {
        let jan_31 = CalDateTime::floating(ymd_hms(2023, 1, 31, 9, 0, 0));
        assert_eq!(jan_31.add_months(1).unwrap().date(), ymd(2023, 2, 28));

        let jan_31 = CalDateTime::floating(ymd_hms(2024, 1, 31, 9, 0, 0));
        assert_eq!(jan_31.add_months(1).unwrap().date(), ymd(2024, 2, 29));
        assert_eq!(jan_31.add_months(-2).unwrap().date(), ymd(2023, 11, 30));

        let leap_day = CalDateTime::floating(ymd_hms(2024, 2, 29, 9, 0, 0));
        assert_eq!(leap_day.add_years(1).unwrap().date(), ymd(2025, 2, 28));
        assert_eq!(leap_day.add_years(4).unwrap().date(), ymd(2028, 2, 29));
    }

    #[test]
    fn days_keep_wall_clock_across_dst() {
        let before = eastern(ymd_hms(2019, 11, 2, 23, 0, 0));
        let after = before.add_days(1).unwrap();

        assert_eq!(after.naive_local(), ymd_hms(2019, 11, 3, 23, 0, 0));
        let elapsed = after.naive_utc().unwrap() - before.naive_utc().unwrap();
        assert_eq!(elapsed, Duration::hours(25));
    }

    #[test]
    fn hours_are_exact_across_dst() {
        let before = eastern(ymd_hms(2024, 3, 10, 1, 30, 0));
        let after = before.add_hours(1).unwrap();

        assert_eq!(after.naive_local(), ymd_hms(2024, 3, 10, 3, 30, 0));
        assert_eq!(after.offset(), Some(FixedOffset::west_opt(4 * 3600).unwrap()));
    }

    #[test]
    fn gap_moves_wall_clock_forward() {
        let skipped = eastern(ymd_hms(2024, 3, 10, 2, 30, 0));
        assert_eq!(skipped.naive_local(), ymd_hms(2024, 3, 10, 3, 30, 0));
        assert_eq!(skipped.naive_utc(), Some(ymd_hms(2024, 3, 10, 7, 30, 0)));
    }

    #[test]
    fn utc_round_trip() {
        let resolver = Resolver::new();
        let original =
            CalDateTime::in_zone(ymd_hms(2024, 7, 4, 12, 15, 0), &resolver, "America/New_York");

        let utc = original.to_utc().unwrap();
        assert!(utc.is_utc());
        assert_eq!(utc.naive_local(), ymd_hms(2024, 7, 4, 16, 15, 0));

        let back = utc.to_zone(&resolver, "America/New_York").unwrap();
        assert_eq!(back.naive_local(), original.naive_local());
        assert_eq!(back.offset(), original.offset());
    }

    #[test]
    fn overlap_round_trip_follows_policy() {
        let original = eastern(ymd_hms(2024, 11, 3, 1, 30, 0));
        let back = original
            .to_utc()
            .unwrap()
            .to_zone_with("America/New_York", new_york())
            .unwrap();

        // the earlier of the two readings survives the trip
        assert_eq!(back.naive_local(), original.naive_local());
        assert_eq!(back.offset(), Some(FixedOffset::west_opt(4 * 3600).unwrap()));
    }

    #[test]
    fn readings_of_a_repeated_wall_clock() {
        let utc = |readings: Vec<CalDateTime>| {
            readings
                .iter()
                .map(|reading| reading.naive_utc().unwrap())
                .collect::<Vec<_>>()
        };
        let anchor = eastern(ymd_hms(2024, 11, 2, 9, 0, 0));

        assert_eq!(
            utc(anchor.readings_of(ymd_hms(2024, 11, 3, 1, 30, 0))),
            vec![ymd_hms(2024, 11, 3, 5, 30, 0), ymd_hms(2024, 11, 3, 6, 30, 0)]
        );
        assert_eq!(
            utc(anchor.readings_of(ymd_hms(2024, 11, 3, 3, 0, 0))),
            vec![ymd_hms(2024, 11, 3, 8, 0, 0)]
        );

        let floating = CalDateTime::floating(ymd_hms(2024, 11, 2, 9, 0, 0));
        assert_eq!(floating.readings_of(ymd_hms(2024, 11, 3, 1, 30, 0)).len(), 1);
    }

    #[test]
    fn floating_has_no_utc() {
        let floating = CalDateTime::floating(ymd_hms(2024, 1, 1, 9, 0, 0));
        assert_eq!(
            floating.to_utc().unwrap_err(),
            Error::FloatingConversion(ymd_hms(2024, 1, 1, 9, 0, 0))
        );
        assert_eq!(floating.offset(), None);
    }

    #[test]
    fn zoned_and_utc_compare_as_moments() {
        let zoned = eastern(ymd_hms(2024, 1, 15, 10, 0, 0));
        let utc = CalDateTime::utc(ymd_hms(2024, 1, 15, 15, 0, 0));
        assert_eq!(zoned, utc);
        assert!(CalDateTime::utc(ymd_hms(2024, 1, 15, 14, 59, 0)) < zoned);
    }

    #[test]
    fn floating_compares_in_the_other_zone() {
        let floating = CalDateTime::floating(ymd_hms(2024, 1, 15, 10, 0, 0));
        let zoned = eastern(ymd_hms(2024, 1, 15, 10, 0, 0));
        let utc = CalDateTime::utc(ymd_hms(2024, 1, 15, 10, 0, 0));

        assert_eq!(floating, zoned);
        assert_eq!(zoned, floating);
        assert_eq!(floating, utc);
        assert!(floating < CalDateTime::floating(ymd_hms(2024, 1, 15, 10, 0, 1)));
    }

    #[test]
    fn association_copies_zone_not_moment() {
        let reference = eastern(ymd_hms(2024, 6, 1, 8, 0, 0));
        let floating = CalDateTime::floating(ymd_hms(2024, 1, 15, 10, 0, 0));

        let associated = floating.associate_zone_from(&reference);
        assert_eq!(associated.tzid(), Some("America/New_York"));
        assert_eq!(associated.naive_local(), ymd_hms(2024, 1, 15, 10, 0, 0));
        assert_eq!(associated.offset(), Some(FixedOffset::west_opt(5 * 3600).unwrap()));

        let utc = CalDateTime::utc(ymd_hms(2024, 1, 15, 10, 0, 0));
        assert!(utc.associate_zone_from(&reference).is_utc());
    }

    #[test]
    fn match_zone_converts_into_reference() {
        let reference = eastern(ymd_hms(2024, 6, 1, 8, 0, 0));
        let utc = CalDateTime::utc(ymd_hms(2024, 6, 1, 12, 0, 0));

        let matched = utc.match_zone(&reference);
        assert_eq!(matched.tzid(), Some("America/New_York"));
        assert_eq!(matched.naive_local(), ymd_hms(2024, 6, 1, 8, 0, 0));

        let floating_reference = CalDateTime::floating(ymd_hms(2024, 6, 1, 8, 0, 0));
        assert!(reference.match_zone(&floating_reference).is_floating());
    }

    #[test]
    fn day_bounds() {
        let value = CalDateTime::floating(ymd_hms(2024, 2, 29, 13, 45, 10));
        assert_eq!(value.start_of_day().naive_local(), ymd_hms(2024, 2, 29, 0, 0, 0));
        assert_eq!(
            value.end_of_day().unwrap().naive_local(),
            ymd_hms(2024, 3, 1, 0, 0, 0) - Duration::nanoseconds(1)
        );
    }
}
