use crate::tz_date_iterator::Checkpoint;
use crate::{CalDateTime, Error, Limits, Result, Rule, TzDateIterator};
use chrono::NaiveDateTime;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::iter::Peekable;
use std::sync::{Mutex, PoisonError};

type Stream<'a> = Box<dyn Iterator<Item = Result<CalDateTime>> + 'a>;

/// A half-open range `[from, to)`. A missing side is unbounded.
#[derive(Debug, Clone, Default)]
pub struct Window {
    pub from: Option<CalDateTime>,
    pub to: Option<CalDateTime>,
}

impl Window {
    pub fn between(from: CalDateTime, to: CalDateTime) -> Self {
        Window {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn starting(from: CalDateTime) -> Self {
        Window {
            from: Some(from),
            to: None,
        }
    }

    pub fn ending(to: CalDateTime) -> Self {
        Window {
            from: None,
            to: Some(to),
        }
    }
}

/// The answer to a window query.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrences {
    Found(Vec<CalDateTime>),
    /// `exhausted` is set when the inputs run out before the window's end.
    NoOccurrencesInRange { exhausted: bool },
}

impl Occurrences {
    pub fn as_slice(&self) -> &[CalDateTime] {
        match self {
            Occurrences::Found(found) => found,
            Occurrences::NoOccurrencesInRange { .. } => &[],
        }
    }

    pub fn into_vec(self) -> Vec<CalDateTime> {
        match self {
            Occurrences::Found(found) => found,
            Occurrences::NoOccurrencesInRange { .. } => Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }
}

/// DTSTART plus its RRULE, RDATE, EXRULE and EXDATE inputs.
///
/// DTSTART is always an occurrence unless excluded. Instants from every
/// source are compared in DTSTART's context, so a floating EXDATE removes
/// the zoned occurrence with the same wall clock.
#[derive(Debug)]
pub struct RecurrenceSet {
    dtstart: CalDateTime,
    rrules: Vec<Rule>,
    exrules: Vec<Rule>,
    rdates: Vec<CalDateTime>,
    exdates: Vec<CalDateTime>,
    limits: Limits,
    // one per rrule
    checkpoints: Vec<Mutex<Option<Checkpoint>>>,
}

impl RecurrenceSet {
    pub fn new(dtstart: CalDateTime) -> Self {
        RecurrenceSet {
            dtstart,
            rrules: Vec::new(),
            exrules: Vec::new(),
            rdates: Vec::new(),
            exdates: Vec::new(),
            limits: Limits::default(),
            checkpoints: Vec::new(),
        }
    }

    pub fn rrule(mut self, rule: Rule) -> Self {
        self.rrules.push(rule);
        self.checkpoints.push(Mutex::new(None));
        self
    }

    pub fn exrule(mut self, rule: Rule) -> Self {
        self.exrules.push(rule);
        self
    }

    pub fn rdate(mut self, date: CalDateTime) -> Self {
        self.rdates.push(date);
        self
    }

    pub fn exdate(mut self, date: CalDateTime) -> Self {
        self.exdates.push(date);
        self
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn dtstart(&self) -> &CalDateTime {
        &self.dtstart
    }

    pub fn rrules(&self) -> &[Rule] {
        &self.rrules
    }

    pub fn exrules(&self) -> &[Rule] {
        &self.exrules
    }

    pub fn rdates(&self) -> &[CalDateTime] {
        &self.rdates
    }

    pub fn exdates(&self) -> &[CalDateTime] {
        &self.exdates
    }

    /// Every occurrence in order. Infinite when an RRULE is unbounded.
    pub fn all(&self) -> impl Iterator<Item = Result<CalDateTime>> + '_ {
        self.occurrences(None)
    }

    /// Every occurrence at or after `min`.
    pub fn after(&self, min: &CalDateTime) -> impl Iterator<Item = Result<CalDateTime>> + '_ {
        self.occurrences(Some(min))
    }

    /// The occurrences inside `window`.
    ///
    /// ## Errors
    ///
    /// [`Error::UnboundedQuery`] when the window has no end and an RRULE has
    /// neither COUNT nor UNTIL, [`Error::EvaluationLimitExceeded`] when a
    /// rule goes too long without producing anything.
    pub fn occurrences_in(&self, window: &Window) -> Result<Occurrences> {
        if window.to.is_none() {
            if let Some(rule) = self.rrules.iter().find(|rule| !rule.end().is_bounded()) {
                tracing::debug!(freq = %rule.freq(), "window has no end and the rule never stops");
                return Err(Error::UnboundedQuery);
            }
        }

        let to = window.to.as_ref().map(|to| to.key_in(&self.dtstart));
        let mut exclusions = self.exclusions(window.from.as_ref());
        let mut found = Vec::new();
        let mut exhausted = true;
        for item in self.inclusions(window.from.as_ref()) {
            let (key, occurrence) = item?;
            // bounded ahead of exclusion, since an EXRULE may remove every
            // later inclusion
            if to.is_some_and(|to| key >= to) {
                exhausted = false;
                break;
            }
            if exclusions.admit(key)? {
                found.push(occurrence);
            }
        }

        tracing::debug!(found = found.len(), exhausted, "evaluated window");
        if found.is_empty() {
            Ok(Occurrences::NoOccurrencesInRange { exhausted })
        } else {
            Ok(Occurrences::Found(found))
        }
    }

    fn occurrences(
        &self,
        min: Option<&CalDateTime>,
    ) -> impl Iterator<Item = Result<CalDateTime>> + '_ {
        let mut exclusions = self.exclusions(min);

        self.inclusions(min)
            .filter_map(move |item| {
                item.and_then(|(key, occurrence)| {
                    Ok(exclusions.admit(key)?.then_some(occurrence))
                })
                .transpose()
            })
            // nothing after the first error
            .scan(false, |failed, item| {
                if *failed {
                    return None;
                }
                *failed = item.is_err();
                Some(item)
            })
    }

    fn inclusions(&self, min: Option<&CalDateTime>) -> Merge<'_> {
        let dates = std::iter::once(&self.dtstart).chain(&self.rdates);
        let mut streams: Vec<Stream<'_>> = vec![self.date_stream(dates, min)];
        streams.extend(
            self.rrules
                .iter()
                .zip(&self.checkpoints)
                .map(|(rule, slot)| self.rule_stream(rule, Some(slot), min)),
        );
        Merge::new(self.dtstart.clone(), streams)
    }

    fn exclusions(&self, min: Option<&CalDateTime>) -> Exclusions<'_> {
        let mut streams: Vec<Stream<'_>> = vec![self.date_stream(self.exdates.iter(), min)];
        streams.extend(self.exrules.iter().map(|rule| self.rule_stream(rule, None, min)));
        Exclusions {
            floor: min.map(|min| min.key_in(&self.dtstart)),
            stream: Merge::new(self.dtstart.clone(), streams).peekable(),
        }
    }

    fn date_stream<'a>(
        &self,
        dates: impl Iterator<Item = &'a CalDateTime>,
        min: Option<&CalDateTime>,
    ) -> Stream<'static> {
        let floor = min.map(|min| min.key_in(&self.dtstart));
        let mut dates: Vec<(NaiveDateTime, CalDateTime)> = dates
            .map(|date| (date.key_in(&self.dtstart), date.clone()))
            .filter(|(key, _)| floor.map_or(true, |floor| *key >= floor))
            .collect();
        dates.sort_by_key(|(key, _)| *key);
        Box::new(dates.into_iter().map(|(_, date)| Ok(date)))
    }

    fn rule_stream<'a>(
        &'a self,
        rule: &Rule,
        slot: Option<&'a Mutex<Option<Checkpoint>>>,
        min: Option<&CalDateTime>,
    ) -> Stream<'a> {
        let iter = TzDateIterator::new(rule, &self.dtstart, self.limits);
        let Some(min) = min else {
            return Box::new(iter);
        };

        match slot {
            // only COUNT has to walk from the start, so only COUNT gains from
            // remembering where an earlier query got to
            Some(slot) if rule.count().is_some() => {
                let floor = min.key_in(&self.dtstart);
                let saved = *slot.lock().unwrap_or_else(PoisonError::into_inner);
                let iter = match saved.filter(|checkpoint| checkpoint.precedes(floor)) {
                    Some(checkpoint) => iter.resume(checkpoint),
                    None => iter,
                };
                Box::new(Checkpointed {
                    iter: iter.seek(min),
                    slot,
                })
            }
            _ => Box::new(iter.seek(min)),
        }
    }
}

/// Saves the generator's resume point as it goes.
struct Checkpointed<'a> {
    iter: TzDateIterator,
    slot: &'a Mutex<Option<Checkpoint>>,
}

impl Iterator for Checkpointed<'_> {
    type Item = Result<CalDateTime>;

    fn next(&mut self) -> Option<Result<CalDateTime>> {
        let item = self.iter.next();
        if let Some(checkpoint) = self.iter.resume_point() {
            let mut saved = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
            let further = match *saved {
                Some(previous) => checkpoint.is_past(&previous),
                None => true,
            };
            if further {
                *saved = Some(checkpoint);
            }
        }
        item
    }
}

/// K-way merge of ordered streams, yielding each instant once along with its
/// position on the set's timeline.
struct Merge<'a> {
    context: CalDateTime,
    heap: BinaryHeap<Reverse<IterHolder<'a>>>,
    error: Option<Error>,
}

impl<'a> Merge<'a> {
    fn new(context: CalDateTime, streams: Vec<Stream<'a>>) -> Self {
        let mut merge = Merge {
            context,
            heap: BinaryHeap::with_capacity(streams.len()),
            error: None,
        };
        for (rank, iter) in streams.into_iter().enumerate() {
            merge.advance(rank, iter);
        }
        merge
    }

    fn advance(&mut self, rank: usize, mut iter: Stream<'a>) {
        match iter.next() {
            Some(Ok(cursor)) => self.heap.push(Reverse(IterHolder {
                key: cursor.key_in(&self.context),
                rank,
                cursor,
                iter,
            })),
            Some(Err(error)) => {
                self.error.get_or_insert(error);
            }
            None => {}
        }
    }
}

impl Iterator for Merge<'_> {
    type Item = Result<(NaiveDateTime, CalDateTime)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(error) = self.error.take() {
                self.heap.clear();
                return Some(Err(error));
            }

            let Reverse(IterHolder {
                key,
                rank,
                cursor,
                iter,
            }) = self.heap.pop()?;
            self.advance(rank, iter);
            if self.error.is_some() {
                continue;
            }

            if let Some(Reverse(IterHolder { key: next, .. })) = self.heap.peek() {
                if *next == key {
                    continue;
                }
            }

            return Some(Ok((key, cursor)));
        }
    }
}

/// Holds an iterator and the latest date that came out of it
struct IterHolder<'a> {
    key: NaiveDateTime,
    rank: usize,
    cursor: CalDateTime,
    iter: Stream<'a>,
}

impl Eq for IterHolder<'_> {}

impl PartialEq for IterHolder<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl PartialOrd for IterHolder<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IterHolder<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.key, self.rank).cmp(&(other.key, other.rank))
    }
}

/// Merged EXRULE and EXDATE instants, consumed in step with the inclusions.
struct Exclusions<'a> {
    floor: Option<NaiveDateTime>,
    stream: Peekable<Merge<'a>>,
}

impl Exclusions<'_> {
    /// Whether the inclusion at `key` survives the floor and every exclusion.
    /// Keys must arrive in ascending order.
    fn admit(&mut self, key: NaiveDateTime) -> Result<bool> {
        if self.floor.is_some_and(|floor| key < floor) {
            return Ok(false);
        }
        Ok(!self.contains(key)?)
    }

    fn contains(&mut self, key: NaiveDateTime) -> Result<bool> {
        loop {
            let head = match self.stream.peek() {
                None => return Ok(false),
                Some(Ok((head, _))) => *head,
                Some(Err(_)) => {
                    return match self.stream.next() {
                        Some(Err(error)) => Err(error),
                        _ => Ok(false),
                    }
                }
            };

            match head.cmp(&key) {
                Ordering::Less => {
                    self.stream.next();
                }
                Ordering::Equal => return Ok(true),
                Ordering::Greater => return Ok(false),
            }
        }
    }
}
