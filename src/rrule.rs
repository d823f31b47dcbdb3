use crate::period::Expansion;
use crate::{CalDateTime, End, Error, Frequency, Result};
use chrono::{NaiveDateTime, Weekday};

/// A BYDAY entry: a weekday, optionally the nth one within the period
/// (negative counts from the end).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeekdayNum {
    pub weekday: Weekday,
    pub ordinal: Option<i8>,
}

impl WeekdayNum {
    pub fn every(weekday: Weekday) -> Self {
        WeekdayNum {
            weekday,
            ordinal: None,
        }
    }

    pub fn nth(ordinal: i8, weekday: Weekday) -> Self {
        WeekdayNum {
            weekday,
            ordinal: Some(ordinal),
        }
    }
}

impl From<Weekday> for WeekdayNum {
    fn from(weekday: Weekday) -> Self {
        WeekdayNum::every(weekday)
    }
}

/// Literal rule parts, as produced by an RRULE parser.
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub interval: Option<u32>,
    pub end: End,
    pub week_start: Option<Weekday>,
    pub by_second: Vec<u8>,
    pub by_minute: Vec<u8>,
    pub by_hour: Vec<u8>,
    pub by_day: Vec<WeekdayNum>,
    pub by_month_day: Vec<i8>,
    pub by_year_day: Vec<i16>,
    pub by_week_no: Vec<i8>,
    pub by_month: Vec<u8>,
    pub by_set_pos: Vec<i16>,
}

/// A validated recurrence rule (RFC 5545 §3.3.10).
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    freq: Frequency,
    interval: u32,
    end: End,
    week_start: Weekday,
    by_second: Vec<u8>,
    by_minute: Vec<u8>,
    by_hour: Vec<u8>,
    by_day: Vec<WeekdayNum>,
    by_month_day: Vec<i8>,
    by_year_day: Vec<i16>,
    by_week_no: Vec<i8>,
    by_month: Vec<u8>,
    by_set_pos: Vec<i16>,
}

impl Rule {
    /// ## Errors
    ///
    /// Returns an error naming the offending part when a value is out of
    /// range, INTERVAL is zero, a part is not allowed for `freq`, or BYSETPOS
    /// comes without another BYxxx part.
    pub fn new(freq: Frequency, options: Options) -> Result<Self> {
        let interval = options.interval.unwrap_or(1);
        if interval == 0 {
            return Err(Error::ZeroInterval);
        }

        check_range("BYSECOND", &options.by_second, 0, 60, "0..=60")?;
        check_range("BYMINUTE", &options.by_minute, 0, 59, "0..=59")?;
        check_range("BYHOUR", &options.by_hour, 0, 23, "0..=23")?;
        check_range("BYMONTHDAY", &options.by_month_day, -31, 31, SIGNED_31)?;
        check_range("BYYEARDAY", &options.by_year_day, -366, 366, SIGNED_366)?;
        check_range("BYWEEKNO", &options.by_week_no, -53, 53, SIGNED_53)?;
        check_range("BYMONTH", &options.by_month, 1, 12, "1..=12")?;
        check_range("BYSETPOS", &options.by_set_pos, -366, 366, SIGNED_366)?;
        let ordinals: Vec<i8> = options.by_day.iter().filter_map(|d| d.ordinal).collect();
        check_range("BYDAY", &ordinals, -53, 53, SIGNED_53)?;

        let incompatible = |field: &'static str| Error::IncompatibleField {
            field,
            frequency: freq,
        };
        if !options.by_week_no.is_empty() && freq != Frequency::Yearly {
            return Err(incompatible("BYWEEKNO"));
        }
        if !options.by_year_day.is_empty()
            && matches!(freq, Frequency::Daily | Frequency::Weekly | Frequency::Monthly)
        {
            return Err(incompatible("BYYEARDAY"));
        }
        if !options.by_month_day.is_empty() && freq == Frequency::Weekly {
            return Err(incompatible("BYMONTHDAY"));
        }
        if !ordinals.is_empty()
            && (!matches!(freq, Frequency::Monthly | Frequency::Yearly)
                || !options.by_week_no.is_empty())
        {
            return Err(incompatible("BYDAY"));
        }

        let mut rule = Rule {
            freq,
            interval,
            end: options.end,
            week_start: options.week_start.unwrap_or(Weekday::Mon),
            by_second: options.by_second,
            by_minute: options.by_minute,
            by_hour: options.by_hour,
            by_day: options.by_day,
            by_month_day: options.by_month_day,
            by_year_day: options.by_year_day,
            by_week_no: options.by_week_no,
            by_month: options.by_month,
            by_set_pos: options.by_set_pos,
        };

        if !rule.by_set_pos.is_empty() && !rule.has_by_rules() {
            return Err(Error::SetPosWithoutConstraint);
        }

        sort_dedup(&mut rule.by_second);
        sort_dedup(&mut rule.by_minute);
        sort_dedup(&mut rule.by_hour);
        sort_dedup(&mut rule.by_month_day);
        sort_dedup(&mut rule.by_year_day);
        sort_dedup(&mut rule.by_week_no);
        sort_dedup(&mut rule.by_month);
        sort_dedup(&mut rule.by_set_pos);
        rule.by_day
            .sort_unstable_by_key(|day| (day.ordinal, day.weekday.num_days_from_monday()));
        rule.by_day.dedup();

        Ok(rule)
    }

    pub fn freq(&self) -> Frequency {
        self.freq
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn end(&self) -> &End {
        &self.end
    }

    pub fn count(&self) -> Option<u32> {
        match self.end {
            End::Count(count) => Some(count),
            _ => None,
        }
    }

    pub fn until(&self) -> Option<&CalDateTime> {
        match &self.end {
            End::Until(until) => Some(until),
            _ => None,
        }
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    pub fn by_second(&self) -> &[u8] {
        &self.by_second
    }

    pub fn by_minute(&self) -> &[u8] {
        &self.by_minute
    }

    pub fn by_hour(&self) -> &[u8] {
        &self.by_hour
    }

    pub fn by_day(&self) -> &[WeekdayNum] {
        &self.by_day
    }

    pub fn by_month_day(&self) -> &[i8] {
        &self.by_month_day
    }

    pub fn by_year_day(&self) -> &[i16] {
        &self.by_year_day
    }

    pub fn by_week_no(&self) -> &[i8] {
        &self.by_week_no
    }

    pub fn by_month(&self) -> &[u8] {
        &self.by_month
    }

    pub fn by_set_pos(&self) -> &[i16] {
        &self.by_set_pos
    }

    /// Whether any BYxxx part other than BYSETPOS is present.
    pub fn has_by_rules(&self) -> bool {
        !(self.by_second.is_empty()
            && self.by_minute.is_empty()
            && self.by_hour.is_empty()
            && self.by_day.is_empty()
            && self.by_month_day.is_empty()
            && self.by_year_day.is_empty()
            && self.by_week_no.is_empty()
            && self.by_month.is_empty())
    }

    /// Every candidate of the `index`th period the rule visits from `anchor`
    /// (`index * interval` periods on), after BYSETPOS but before any
    /// DTSTART/COUNT/UNTIL bound.
    pub fn candidates_within_period(
        &self,
        anchor: NaiveDateTime,
        index: u64,
    ) -> Vec<NaiveDateTime> {
        let expansion = Expansion::new(self, anchor);
        expansion
            .period(index)
            .map(|period| expansion.candidates(period))
            .unwrap_or_default()
    }
}

const SIGNED_31: &str = "-31..=-1 or 1..=31";
const SIGNED_53: &str = "-53..=-1 or 1..=53";
const SIGNED_366: &str = "-366..=-1 or 1..=366";

// Zero is only valid for ranges that start at it.
fn check_range<T>(
    field: &'static str,
    values: &[T],
    min: i64,
    max: i64,
    expected: &'static str,
) -> Result<()>
where
    T: Copy + Into<i64>,
{
    let allow_zero = min == 0;
    for value in values.iter().map(|&v| v.into()) {
        if value < min || value > max || (!allow_zero && value == 0) {
            return Err(Error::Validation {
                field,
                value,
                expected,
            });
        }
    }
    Ok(())
}

fn sort_dedup<T: Ord>(values: &mut Vec<T>) {
    values.sort_unstable();
    values.dedup();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;

    #[test]
    fn defaults() {
        let rule = Rule::new(Frequency::Daily, Options::default()).unwrap();
        assert_eq!(rule.interval(), 1);
        assert_eq!(rule.week_start(), Weekday::Mon);
        assert_eq!(rule.end(), &End::Never);
        assert!(!rule.has_by_rules());
    }

    #[test]
    fn zero_interval() {
        let options = Options {
            interval: Some(0),
            ..Options::default()
        };
        assert_eq!(Rule::new(Frequency::Daily, options), Err(Error::ZeroInterval));
    }

    #[test]
    fn out_of_range_names_the_field() {
        let options = Options {
            by_month_day: vec![1, 32],
            ..Options::default()
        };
        assert_eq!(
            Rule::new(Frequency::Monthly, options),
            Err(Error::Validation {
                field: "BYMONTHDAY",
                value: 32,
                expected: "-31..=-1 or 1..=31",
            })
        );

        let options = Options {
            by_hour: vec![24],
            ..Options::default()
        };
        assert!(matches!(
            Rule::new(Frequency::Daily, options),
            Err(Error::Validation { field: "BYHOUR", value: 24, .. })
        ));
    }

    #[test]
    fn zero_is_not_an_index() {
        let options = Options {
            by_set_pos: vec![0],
            by_day: vec![Weekday::Mon.into()],
            ..Options::default()
        };
        assert!(matches!(
            Rule::new(Frequency::Monthly, options),
            Err(Error::Validation { field: "BYSETPOS", value: 0, .. })
        ));

        let options = Options {
            by_day: vec![WeekdayNum::nth(0, Weekday::Fri)],
            ..Options::default()
        };
        assert!(matches!(
            Rule::new(Frequency::Monthly, options),
            Err(Error::Validation { field: "BYDAY", value: 0, .. })
        ));
    }

    #[test]
    fn incompatible_parts() {
        let options = Options {
            by_week_no: vec![20],
            ..Options::default()
        };
        assert_eq!(
            Rule::new(Frequency::Monthly, options),
            Err(Error::IncompatibleField {
                field: "BYWEEKNO",
                frequency: Frequency::Monthly,
            })
        );

        let options = Options {
            by_day: vec![WeekdayNum::nth(1, Weekday::Mon)],
            ..Options::default()
        };
        assert!(Rule::new(Frequency::Weekly, options).is_err());

        let options = Options {
            by_month_day: vec![1],
            ..Options::default()
        };
        assert!(Rule::new(Frequency::Weekly, options).is_err());
    }

    #[test]
    fn set_pos_needs_company() {
        let options = Options {
            by_set_pos: vec![-1],
            ..Options::default()
        };
        assert_eq!(
            Rule::new(Frequency::Monthly, options),
            Err(Error::SetPosWithoutConstraint)
        );
    }

    #[test]
    fn lists_are_sorted_and_unique() {
        let options = Options {
            by_hour: vec![17, 9, 9],
            ..Options::default()
        };
        let rule = Rule::new(Frequency::Daily, options).unwrap();
        assert_eq!(rule.by_hour(), &[9, 17]);

        let options = Options {
            by_day: vec![
                Weekday::Fri.into(),
                WeekdayNum::nth(-1, Weekday::Mon),
                Weekday::Mon.into(),
                Weekday::Fri.into(),
                WeekdayNum::nth(-1, Weekday::Mon),
            ],
            ..Options::default()
        };
        let rule = Rule::new(Frequency::Monthly, options).unwrap();
        assert_eq!(
            rule.by_day(),
            &[
                Weekday::Mon.into(),
                Weekday::Fri.into(),
                WeekdayNum::nth(-1, Weekday::Mon),
            ]
        );
    }

    #[test]
    fn candidates_of_a_period() {
        let rule = Rule::new(
            Frequency::Monthly,
            Options {
                by_day: vec![WeekdayNum::every(Weekday::Fri)],
                ..Options::default()
            },
        )
        .unwrap();

        // every Friday of August 2024 at the anchor's time of day
        let candidates = rule.candidates_within_period(ymd_hms(2024, 7, 1, 9, 0, 0), 1);
        assert_eq!(
            candidates,
            vec![
                ymd_hms(2024, 8, 2, 9, 0, 0),
                ymd_hms(2024, 8, 9, 9, 0, 0),
                ymd_hms(2024, 8, 16, 9, 0, 0),
                ymd_hms(2024, 8, 23, 9, 0, 0),
                ymd_hms(2024, 8, 30, 9, 0, 0),
            ]
        );
    }
}
