use crate::period::Expansion;
use crate::{CalDateTime, Error, Frequency, Result, Rule};
use chrono::NaiveDateTime;
use std::collections::VecDeque;

/// Bounds on how much work a single generator may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Consecutive periods without a candidate before giving up.
    pub max_empty_periods: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_empty_periods: 10_000,
        }
    }
}

/// A period boundary the generator has already walked past.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    index: u64,
    remaining: Option<u32>,
    last: Option<NaiveDateTime>,
}

impl Checkpoint {
    /// Whether everything emitted before this checkpoint falls below `floor`.
    pub(crate) fn precedes(&self, floor: NaiveDateTime) -> bool {
        self.last.map_or(true, |last| last < floor)
    }

    pub(crate) fn is_past(&self, other: &Checkpoint) -> bool {
        self.index > other.index
    }
}

/// Timezone Aware Date Iterator
///
/// Walks a rule's periods from the one holding the anchor, `interval` periods
/// at a time, and yields every occurrence in increasing order. Wall clocks
/// are resolved in the anchor's zone.
///
/// The anchor counts as the first of COUNT occurrences. When the rule does
/// not produce the anchor itself, it yields one occurrence fewer, leaving
/// that slot to the anchor.
#[derive(Debug, Clone)]
pub struct TzDateIterator {
    expansion: Expansion,
    anchor: CalDateTime,
    anchor_key: NaiveDateTime,
    until: Option<NaiveDateTime>,
    remaining: Option<u32>,
    index: u64,
    pending: VecDeque<CalDateTime>,
    last: Option<NaiveDateTime>,
    floor: Option<NaiveDateTime>,
    resume_point: Option<Checkpoint>,
    sub_daily: bool,
    empty_streak: u64,
    limits: Limits,
    done: bool,
}

impl TzDateIterator {
    pub fn new(rule: &Rule, anchor: &CalDateTime, limits: Limits) -> Self {
        tracing::debug!(
            freq = %rule.freq(),
            interval = rule.interval(),
            anchor = %anchor.naive_local(),
            "expanding rule"
        );

        let remaining = rule.count();
        TzDateIterator {
            expansion: Expansion::new(rule, anchor.naive_local()),
            anchor: anchor.clone(),
            anchor_key: anchor.key_in(anchor),
            until: rule.until().map(|until| until.key_in(anchor)),
            remaining,
            index: 0,
            pending: VecDeque::new(),
            last: None,
            floor: None,
            resume_point: None,
            sub_daily: rule.freq() < Frequency::Daily,
            empty_streak: 0,
            limits,
            done: remaining == Some(0),
        }
    }

    /// Only yield occurrences at or after `min`.
    ///
    /// Without COUNT the generator jumps to the period holding `min`. With
    /// COUNT the earlier periods are still walked so the tally stays right.
    pub fn seek(mut self, min: &CalDateTime) -> Self {
        self.floor = Some(min.key_in(&self.anchor));

        if self.remaining.is_none() {
            let local = min.match_zone(&self.anchor).naive_local();
            // one period of slack for wall clocks shifted by an offset change
            let index = self.expansion.index_at(local).saturating_sub(1);
            self.index = self.index.max(index);
        }
        self
    }

    /// The furthest period boundary reached where nothing at or after the
    /// seek target had been emitted yet.
    pub(crate) fn resume_point(&self) -> Option<Checkpoint> {
        self.resume_point
    }

    /// Picks up from a checkpoint taken by an earlier generator over the
    /// same rule and anchor.
    pub(crate) fn resume(mut self, checkpoint: Checkpoint) -> Self {
        if checkpoint.index > self.index {
            tracing::trace!(index = checkpoint.index, "resuming from checkpoint");
            self.index = checkpoint.index;
            self.remaining = checkpoint.remaining;
            self.last = checkpoint.last;
            self.done = self.remaining == Some(0);
        }
        self
    }

    fn fill(&mut self) -> Result<()> {
        if let Some(floor) = self.floor {
            if self.last.map_or(true, |last| last < floor) {
                self.resume_point = Some(Checkpoint {
                    index: self.index,
                    remaining: self.remaining,
                    last: self.last,
                });
            }
        }

        let Some(period) = self.expansion.period(self.index) else {
            self.done = true;
            return Ok(());
        };
        let candidates = self.expansion.candidates(period);
        tracing::trace!(
            index = self.index,
            ?period,
            candidates = candidates.len(),
            "expanded period"
        );

        // sub-daily rules visit both readings of a repeated wall clock
        let mut occurrences: Vec<(NaiveDateTime, CalDateTime)> = candidates
            .into_iter()
            .flat_map(|local| {
                if self.sub_daily {
                    self.anchor.readings_of(local)
                } else {
                    vec![self.anchor.with_local(local)]
                }
            })
            .map(|occurrence| (occurrence.key_in(&self.anchor), occurrence))
            .collect();
        occurrences.sort_by_key(|(key, _)| *key);

        let mut produced = false;
        for (key, occurrence) in occurrences {
            // before the anchor, or a second wall clock resolving to an
            // instant already seen
            if key < self.anchor_key || self.last.is_some_and(|last| key <= last) {
                continue;
            }
            if self.until.is_some_and(|until| key > until) {
                self.done = true;
                break;
            }
            if let Some(remaining) = &mut self.remaining {
                // the anchor holds the first COUNT slot even when the rule
                // does not produce it
                if self.last.is_none() && key != self.anchor_key {
                    *remaining -= 1;
                    if *remaining == 0 {
                        self.done = true;
                        break;
                    }
                }
                *remaining -= 1;
                if *remaining == 0 {
                    self.done = true;
                }
            }

            produced = true;
            self.last = Some(key);
            if self.floor.map_or(true, |floor| key >= floor) {
                self.pending.push_back(occurrence);
            }
            if self.done {
                break;
            }
        }
        if self.done {
            return Ok(());
        }

        let mut next = self.index + 1;
        if produced {
            self.empty_streak = 0;
        } else {
            self.empty_streak += 1;

            let started = period
                .start()
                .map(|start| self.anchor.with_local(start).key_in(&self.anchor));
            if let (Some(until), Some(started)) = (self.until, started) {
                if started > until {
                    self.done = true;
                    return Ok(());
                }
            }

            if self.empty_streak > self.limits.max_empty_periods {
                tracing::warn!(
                    periods = self.empty_streak,
                    anchor = %self.anchor.naive_local(),
                    "rule produced nothing for too many periods"
                );
                self.done = true;
                return Err(Error::EvaluationLimitExceeded {
                    periods: self.empty_streak,
                });
            }

            if let Some(target) = self.expansion.skip_target(period) {
                next = next.max(self.expansion.index_from(target));
            }
        }

        self.index = next;
        Ok(())
    }
}

impl Iterator for TzDateIterator {
    type Item = Result<CalDateTime>;

    fn next(&mut self) -> Option<Result<CalDateTime>> {
        loop {
            if let Some(occurrence) = self.pending.pop_front() {
                return Some(Ok(occurrence));
            }
            if self.done {
                return None;
            }
            if let Err(error) = self.fill() {
                return Some(Err(error));
            }
        }
    }
}
