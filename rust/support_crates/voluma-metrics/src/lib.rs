//! Timing registry for named sections of work.
//!
//! A [`MetricsContext`] is constructed explicitly at startup, handed to
//! collaborators by reference (or inside an `Arc`), and
//! [`flush`](MetricsContext::flush)ed at shutdown. There is no process-wide
//! instance: whoever creates the context owns its lifecycle. The context
//! only aggregates; rendering the flushed report is the caller's concern.
//!
//! Sections are bracketed either explicitly
//! ([`start`](MetricsContext::start) / [`stop`](MetricsContext::stop)), by
//! scope with the guard from [`time`](MetricsContext::time), or around a
//! single expression with [`time_section!`].

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Aggregated wall-time samples of one named section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SectionStats {
    /// The most recent completed sample.
    pub last: Duration,
    /// Sum of every completed sample.
    pub total: Duration,
    /// Number of completed samples.
    pub count: u64,
    /// Set on every completed sample; cleared by
    /// [`MetricsContext::take_updated`].
    pub updated: bool,
}

impl SectionStats {
    fn record(&mut self, elapsed: Duration) {
        self.last = elapsed;
        self.total += elapsed;
        self.count += 1;
        self.updated = true;
    }

    /// Mean completed sample, or zero before the first sample.
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            Duration::from_nanos((self.total.as_nanos() / self.count as u128) as u64)
        }
    }
}

#[derive(Debug, Default)]
struct SectionEntry {
    /// Open bracket, when a `start` has not been matched by a `stop` yet.
    started: Option<Instant>,
    stats: SectionStats,
}

/// Explicitly constructed registry of named section timings.
///
/// The interior mutex makes concurrent sections from different threads safe;
/// each individual section is still expected to be bracketed by one thread
/// at a time, since `start`/`stop` pairs share a single open bracket per
/// name.
#[derive(Debug, Default)]
pub struct MetricsContext {
    sections: Mutex<HashMap<String, SectionEntry>>,
}

impl MetricsContext {
    /// Creates an empty context.
    pub fn new() -> MetricsContext {
        MetricsContext::default()
    }

    /// Opens a timing bracket for `name`.
    ///
    /// A second `start` before the matching `stop` restarts the bracket;
    /// the first one is discarded.
    pub fn start(&self, name: &str) {
        let mut sections = self.sections.lock().unwrap();
        let entry = sections.entry(name.to_string()).or_default();
        entry.started = Some(Instant::now());
    }

    /// Closes the bracket for `name` and records the elapsed wall time.
    ///
    /// Returns the sample, or `None` when no bracket is open; an unbalanced
    /// stop records nothing.
    pub fn stop(&self, name: &str) -> Option<Duration> {
        let mut sections = self.sections.lock().unwrap();
        let entry = sections.get_mut(name)?;
        let started = entry.started.take()?;
        let elapsed = started.elapsed();
        entry.stats.record(elapsed);
        Some(elapsed)
    }

    /// Records an externally measured sample for `name`.
    pub fn record(&self, name: &str, elapsed: Duration) {
        let mut sections = self.sections.lock().unwrap();
        sections
            .entry(name.to_string())
            .or_default()
            .stats
            .record(elapsed);
    }

    /// Times the scope of the returned guard; the sample is recorded when
    /// the guard drops.
    ///
    /// The guard records directly and does not disturb an open
    /// `start` bracket for the same name.
    pub fn time<'a>(&'a self, name: &str) -> SectionGuard<'a> {
        SectionGuard {
            context: self,
            name: name.to_string(),
            started: Instant::now(),
        }
    }

    /// Returns a copy of the stats for `name`, if the section exists.
    pub fn stats(&self, name: &str) -> Option<SectionStats> {
        self.sections
            .lock()
            .unwrap()
            .get(name)
            .map(|entry| entry.stats)
    }

    /// Returns `true` if `name` completed a sample since the last
    /// [`take_updated`](Self::take_updated).
    pub fn updated(&self, name: &str) -> bool {
        self.sections
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|entry| entry.stats.updated)
    }

    /// Returns a copy of every section's stats, sorted by name.
    pub fn snapshot(&self) -> Vec<(String, SectionStats)> {
        let sections = self.sections.lock().unwrap();
        let mut all: Vec<_> = sections
            .iter()
            .map(|(name, entry)| (name.clone(), entry.stats))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Returns the sections that completed a sample since the last call,
    /// clearing their updated flags. Sorted by name.
    pub fn take_updated(&self) -> Vec<(String, SectionStats)> {
        let mut sections = self.sections.lock().unwrap();
        let mut fresh: Vec<_> = sections
            .iter_mut()
            .filter(|(_, entry)| entry.stats.updated)
            .map(|(name, entry)| {
                entry.stats.updated = false;
                (name.clone(), entry.stats)
            })
            .collect();
        fresh.sort_by(|a, b| a.0.cmp(&b.0));
        fresh
    }

    /// Empties the registry and returns everything measured so far.
    ///
    /// Call once at shutdown. Open brackets are discarded, not force-closed.
    pub fn flush(&self) -> MetricsReport {
        let mut sections = self.sections.lock().unwrap();
        let mut all: Vec<_> = sections
            .drain()
            .map(|(name, entry)| (name, entry.stats))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        MetricsReport { sections: all }
    }
}

/// RAII bracket from [`MetricsContext::time`]; records its lifetime on
/// drop.
#[derive(Debug)]
pub struct SectionGuard<'a> {
    context: &'a MetricsContext,
    name: String,
    started: Instant,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        self.context.record(&self.name, self.started.elapsed());
    }
}

/// Everything a context measured, drained by [`MetricsContext::flush`].
#[derive(Clone, Debug, Default)]
pub struct MetricsReport {
    sections: Vec<(String, SectionStats)>,
}

impl MetricsReport {
    /// Section stats, sorted by name.
    pub fn sections(&self) -> &[(String, SectionStats)] {
        &self.sections
    }

    /// Looks up one section by name.
    pub fn get(&self, name: &str) -> Option<&SectionStats> {
        self.sections
            .binary_search_by(|(section, _)| section.as_str().cmp(name))
            .ok()
            .map(|index| &self.sections[index].1)
    }

    /// Returns `true` when nothing was measured.
    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Evaluates `$expr` while timing it as `$name` on `$ctx`, yielding the
/// expression's value.
#[macro_export]
macro_rules! time_section {
    ($ctx:expr, $name:expr, $expr:expr) => {{
        let _guard = $ctx.time($name);
        $expr
    }};
}
