//! Recurrence expansion for iCalendar (RFC 5545) events.
//!
//! A [`RecurrenceSet`] combines a start date-time with RRULE, EXRULE, RDATE
//! and EXDATE inputs and answers which instants fall inside a [`Window`].
//! Each rule is expanded lazily by a [`TzDateIterator`], which does its date
//! arithmetic on [`CalDateTime`] values resolved through a tz [`Resolver`].

mod datetime;
mod error;
mod period;
mod rrule;
mod set;
#[cfg(test)]
mod test_helpers;
pub mod tz;
mod tz_date_iterator;

pub use chrono::Weekday;
pub use datetime::{CalDateTime, Mode};
pub use error::{Error, Result};
pub use rrule::{Options, Rule, WeekdayNum};
pub use set::{Occurrences, RecurrenceSet, Window};
pub use tz::{Resolver, TimeZone};
pub use tz_date_iterator::{Limits, TzDateIterator};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Frequency {
    Secondly,
    Minutely,
    Hourly,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Frequency::Secondly => "SECONDLY",
            Frequency::Minutely => "MINUTELY",
            Frequency::Hourly => "HOURLY",
            Frequency::Daily => "DAILY",
            Frequency::Weekly => "WEEKLY",
            Frequency::Monthly => "MONTHLY",
            Frequency::Yearly => "YEARLY",
        })
    }
}

/// How a rule stops: COUNT and UNTIL are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum End {
    Count(u32),
    /// Inclusive.
    Until(CalDateTime),
    #[default]
    Never,
}

impl End {
    pub fn is_bounded(&self) -> bool {
        !matches!(self, End::Never)
    }
}
