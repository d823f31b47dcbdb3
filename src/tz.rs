//! Timezone definitions and identifier resolution.
//!
//! The database is the `chrono-tz` table, loaded once into a [`Resolver`]
//! and read-only afterwards. Identifiers that do not match exactly are
//! normalized, then matched by containment, and finally replaced by the
//! resolver's default zone. Every substitution is reported in the returned
//! [`Resolution`].

use chrono::{Duration, FixedOffset, LocalResult, NaiveDateTime, Offset as _, TimeZone as _};
use chrono_tz::Tz;
use std::collections::HashMap;

/// Which offset to pick for a wall clock that occurs twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Disambiguation {
    /// The first occurrence, i.e. the offset in force before the transition.
    #[default]
    Earlier,
    Later,
}

/// How a wall clock maps onto the zone's timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    Unambiguous,
    /// The wall clock occurs twice; the zone's [`Disambiguation`] picked one.
    AmbiguousOverlap,
    /// The wall clock falls in a gap; the reported offset is the one in force
    /// before the gap, which moves the wall clock forward past it.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalOffset {
    pub offset: FixedOffset,
    pub ambiguity: Ambiguity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rules {
    Iana(Tz),
    Fixed(FixedOffset),
}

/// A resolved timezone definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeZone {
    rules: Rules,
    overlap: Disambiguation,
}

impl TimeZone {
    pub fn iana(tz: Tz) -> Self {
        TimeZone {
            rules: Rules::Iana(tz),
            overlap: Disambiguation::default(),
        }
    }

    /// A zone that never changes offset, as described by a VTIMEZONE with a
    /// single observance.
    pub fn fixed(offset: FixedOffset) -> Self {
        TimeZone {
            rules: Rules::Fixed(offset),
            overlap: Disambiguation::default(),
        }
    }

    pub fn utc() -> Self {
        TimeZone::fixed(chrono::Utc.fix())
    }

    pub fn with_disambiguation(self, overlap: Disambiguation) -> Self {
        TimeZone { overlap, ..self }
    }

    pub fn disambiguation(&self) -> Disambiguation {
        self.overlap
    }

    /// The underlying IANA zone, if this definition came from the database.
    pub fn iana_zone(&self) -> Option<Tz> {
        match self.rules {
            Rules::Iana(tz) => Some(tz),
            Rules::Fixed(_) => None,
        }
    }

    /// Offset in force at the given UTC moment.
    pub fn offset_at_utc(&self, utc: &NaiveDateTime) -> FixedOffset {
        match self.rules {
            Rules::Iana(tz) => tz.offset_from_utc_datetime(utc).fix(),
            Rules::Fixed(offset) => offset,
        }
    }

    /// Offset to apply to a wall clock in this zone.
    pub fn offset_at(&self, local: &NaiveDateTime) -> LocalOffset {
        let tz = match self.rules {
            Rules::Fixed(offset) => {
                return LocalOffset {
                    offset,
                    ambiguity: Ambiguity::Unambiguous,
                }
            }
            Rules::Iana(tz) => tz,
        };

        match tz.from_local_datetime(local) {
            LocalResult::Single(dt) => LocalOffset {
                offset: dt.offset().fix(),
                ambiguity: Ambiguity::Unambiguous,
            },
            LocalResult::Ambiguous(earlier, later) => {
                let picked = match self.overlap {
                    Disambiguation::Earlier => earlier,
                    Disambiguation::Later => later,
                };
                LocalOffset {
                    offset: picked.offset().fix(),
                    ambiguity: Ambiguity::AmbiguousOverlap,
                }
            }
            LocalResult::None => {
                // Transitions are months apart, so two days before the gap
                // still observes the offset in force right before it.
                let before = *local - Duration::hours(48);
                LocalOffset {
                    offset: tz.offset_from_utc_datetime(&before).fix(),
                    ambiguity: Ambiguity::Skipped,
                }
            }
        }
    }

    /// Maps a wall clock onto this zone's timeline, returning the UTC moment
    /// and the wall clock actually observed there. The latter differs from
    /// `local` only when `local` fell in a gap.
    pub fn resolve_local(
        &self,
        local: &NaiveDateTime,
    ) -> (NaiveDateTime, NaiveDateTime, FixedOffset) {
        let LocalOffset { offset, ambiguity } = self.offset_at(local);
        let utc = *local - Duration::seconds(i64::from(offset.local_minus_utc()));

        match ambiguity {
            Ambiguity::Skipped => {
                let actual = self.offset_at_utc(&utc);
                let shifted = utc + Duration::seconds(i64::from(actual.local_minus_utc()));
                (utc, shifted, actual)
            }
            _ => (utc, *local, offset),
        }
    }
}

/// How [`Resolver::resolve`] found a zone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Exact,
    /// Matched after stripping vendor prefixes or substituting separators.
    Normalized { matched: String },
    /// Matched a known identifier contained in the requested one.
    Substring { matched: String },
    /// Nothing matched; the resolver's default zone was substituted.
    Default { substituted: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub tzid: String,
    pub zone: TimeZone,
    pub lookup: Lookup,
}

impl Resolution {
    pub fn is_fallback(&self) -> bool {
        matches!(self.lookup, Lookup::Default { .. })
    }
}

const VENDOR_PREFIXES: &[&str] = &["/mozilla.org/", "/softwarestudio.org/", "/citadel.org/"];

/// Read-only table of timezone identifiers.
pub struct Resolver {
    ids: Vec<String>,
    zones: HashMap<String, TimeZone>,
    folded: HashMap<String, String>,
    default: (String, TimeZone),
    overlap: Disambiguation,
}

impl Resolver {
    /// A resolver over the bundled IANA database, falling back to the
    /// process's local zone.
    pub fn new() -> Self {
        let mut resolver = Resolver {
            ids: Vec::with_capacity(chrono_tz::TZ_VARIANTS.len()),
            zones: HashMap::with_capacity(chrono_tz::TZ_VARIANTS.len()),
            folded: HashMap::with_capacity(chrono_tz::TZ_VARIANTS.len()),
            default: (Tz::UTC.name().to_string(), TimeZone::iana(Tz::UTC)),
            overlap: Disambiguation::default(),
        };

        for tz in chrono_tz::TZ_VARIANTS.iter() {
            resolver.insert(tz.name().to_string(), TimeZone::iana(*tz));
        }

        resolver.default = local_tz();
        resolver
    }

    pub fn with_default(mut self, tz: Tz) -> Self {
        self.default = (tz.name().to_string(), TimeZone::iana(tz));
        self
    }

    pub fn with_disambiguation(mut self, overlap: Disambiguation) -> Self {
        self.overlap = overlap;
        self
    }

    /// Adds a custom definition, shadowing a database zone of the same name.
    pub fn register(mut self, tzid: impl Into<String>, zone: TimeZone) -> Self {
        self.insert(tzid.into(), zone);
        self
    }

    pub fn default_zone(&self) -> (&str, TimeZone) {
        (&self.default.0, self.default.1.with_disambiguation(self.overlap))
    }

    /// Exact lookup, without any leniency.
    pub fn get(&self, tzid: &str) -> Option<TimeZone> {
        self.zones
            .get(tzid)
            .map(|zone| zone.with_disambiguation(self.overlap))
    }

    pub fn resolve(&self, tzid: &str) -> Resolution {
        if let Some(zone) = self.get(tzid) {
            return Resolution {
                tzid: tzid.to_string(),
                zone,
                lookup: Lookup::Exact,
            };
        }

        if let Some(matched) = self.normalized(tzid) {
            tracing::debug!(tzid, matched = %matched, "Resolved timezone after normalization");
            return self.found(matched.clone(), Lookup::Normalized { matched });
        }

        if let Some(matched) = self.containing(tzid) {
            tracing::warn!(tzid, matched = %matched, "Resolved timezone by substring match");
            return self.found(matched.clone(), Lookup::Substring { matched });
        }

        let (substituted, zone) = self.default_zone();
        tracing::warn!(tzid, substituted, "Unknown timezone, using the default zone");
        Resolution {
            tzid: substituted.to_string(),
            zone,
            lookup: Lookup::Default {
                substituted: substituted.to_string(),
            },
        }
    }

    fn insert(&mut self, tzid: String, zone: TimeZone) {
        if self.zones.insert(tzid.clone(), zone).is_none() {
            self.ids.push(tzid.clone());
        }
        self.folded.insert(tzid.to_ascii_lowercase(), tzid);
    }

    fn found(&self, tzid: String, lookup: Lookup) -> Resolution {
        let zone = self.get(&tzid).unwrap_or(self.default.1);
        Resolution { tzid, zone, lookup }
    }

    fn normalized(&self, tzid: &str) -> Option<String> {
        let trimmed = tzid.trim().trim_matches('"');
        let stripped = VENDOR_PREFIXES
            .iter()
            .find_map(|prefix| trimmed.strip_prefix(prefix))
            .unwrap_or(trimmed);

        let candidates = [
            stripped.to_string(),
            stripped.replace('-', "/"),
            stripped.replace(' ', "_"),
        ];

        candidates.iter().find_map(|candidate| {
            if self.zones.contains_key(candidate.as_str()) {
                Some(candidate.clone())
            } else {
                self.folded.get(&candidate.to_ascii_lowercase()).cloned()
            }
        })
    }

    // Longest contained identifier wins; ties keep table order.
    fn containing(&self, tzid: &str) -> Option<String> {
        let mut best: Option<&String> = None;
        for known in self.ids.iter().filter(|known| tzid.contains(known.as_str())) {
            if best.map_or(true, |b| known.len() > b.len()) {
                best = Some(known);
            }
        }
        best.cloned()
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Resolver::new()
    }
}

fn local_tz() -> (String, TimeZone) {
    match iana_time_zone::get_timezone() {
        Ok(name) => match name.parse::<Tz>() {
            Ok(tz) => (tz.name().to_string(), TimeZone::iana(tz)),
            Err(_) => {
                tracing::debug!(name = %name, "Local timezone is not in the database, using UTC");
                (Tz::UTC.name().to_string(), TimeZone::iana(Tz::UTC))
            }
        },
        Err(error) => {
            tracing::debug!(error = %error, "Could not determine the local timezone, using UTC");
            (Tz::UTC.name().to_string(), TimeZone::iana(Tz::UTC))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn hours(h: i32) -> FixedOffset {
        FixedOffset::east_opt(h * 3600).unwrap()
    }

    #[test]
    fn exact_identifier() {
        let resolution = Resolver::new().resolve("America/New_York");
        assert_eq!(resolution.lookup, Lookup::Exact);
        assert_eq!(resolution.zone.iana_zone(), Some(Tz::America__New_York));
    }

    #[test]
    fn strips_vendor_prefix() {
        let resolution = Resolver::new().resolve("/mozilla.org/20070129_1/Europe/Berlin");
        // the prefix is followed by a version segment, so only containment finds it
        assert_eq!(resolution.zone.iana_zone(), Some(Tz::Europe__Berlin));

        let resolution = Resolver::new().resolve("/mozilla.org/Europe/Berlin");
        assert_eq!(
            resolution.lookup,
            Lookup::Normalized {
                matched: "Europe/Berlin".to_string()
            }
        );
    }

    #[test]
    fn substitutes_separators() {
        let resolver = Resolver::new();
        assert_eq!(
            resolver.resolve("America-Chicago").zone.iana_zone(),
            Some(Tz::America__Chicago)
        );
        assert_eq!(
            resolver.resolve("america/new york").zone.iana_zone(),
            Some(Tz::America__New_York)
        );
    }

    #[test_log::test]
    fn longest_contained_identifier_wins() {
        let resolution = Resolver::new().resolve("(UTC-05:00) America/Indiana/Indianapolis");
        assert_eq!(
            resolution.lookup,
            Lookup::Substring {
                matched: "America/Indiana/Indianapolis".to_string()
            }
        );
    }

    #[test_log::test]
    fn falls_back_to_default_and_reports_it() {
        let resolver = Resolver::new().with_default(Tz::Europe__Paris);
        let resolution = resolver.resolve("Nowhere Standard Time");
        assert!(resolution.is_fallback());
        assert_eq!(resolution.tzid, "Europe/Paris");
        assert_eq!(
            resolution.lookup,
            Lookup::Default {
                substituted: "Europe/Paris".to_string()
            }
        );
    }

    #[test]
    fn registered_zone_shadows_database() {
        let resolver = Resolver::new().register("Custom/Plus2", TimeZone::fixed(hours(2)));
        let resolution = resolver.resolve("Custom/Plus2");
        assert_eq!(resolution.lookup, Lookup::Exact);
        assert_eq!(resolution.zone.offset_at(&at(2024, 1, 1, 0, 0)).offset, hours(2));
    }

    #[test]
    fn overlap_follows_policy() {
        let zone = TimeZone::iana(Tz::America__New_York);
        let local = at(2024, 11, 3, 1, 30);

        let earlier = zone.offset_at(&local);
        assert_eq!(earlier.ambiguity, Ambiguity::AmbiguousOverlap);
        assert_eq!(earlier.offset, hours(-4));

        let later = zone.with_disambiguation(Disambiguation::Later).offset_at(&local);
        assert_eq!(later.offset, hours(-5));
    }

    #[test]
    fn skipped_wall_clock_moves_forward() {
        let zone = TimeZone::iana(Tz::America__New_York);
        let local = at(2024, 3, 10, 2, 30);

        let LocalOffset { offset, ambiguity } = zone.offset_at(&local);
        assert_eq!(ambiguity, Ambiguity::Skipped);
        assert_eq!(offset, hours(-5));

        let (utc, observed, actual) = zone.resolve_local(&local);
        assert_eq!(utc, at(2024, 3, 10, 7, 30));
        assert_eq!(observed, at(2024, 3, 10, 3, 30));
        assert_eq!(actual, hours(-4));
    }

    #[test]
    fn resolver_policy_is_stamped_on_zones() {
        let resolver = Resolver::new().with_disambiguation(Disambiguation::Later);
        let zone = resolver.resolve("America/New_York").zone;
        assert_eq!(zone.disambiguation(), Disambiguation::Later);
    }
}
