//! Process-local price caches.
//!
//! Day-ahead and confirmed hourly batches cache per provider per calendar
//! date; real-time feeds cache per 5-minute bucket. Both are authoritative
//! for the life of the process: once a past date is filled it is final.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;

/// Per-calendar-date batch cache. Single writer at a time, any number of
/// readers.
pub struct DayCache<T> {
    inner: RwLock<HashMap<NaiveDate, Arc<T>>>,
}

impl<T> Default for DayCache<T> {
    fn default() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> DayCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, date: NaiveDate) -> Option<Arc<T>> {
        self.inner.read().get(&date).cloned()
    }

    /// Insert and return the cached value. A concurrent writer for the
    /// same date wins by arrival order; both carry identical data.
    pub fn put(&self, date: NaiveDate, value: T) -> Arc<T> {
        let value = Arc::new(value);
        self.inner.write().insert(date, value.clone());
        value
    }
}

/// 5-minute sample cache for real-time feeds, keyed by bucket start.
///
/// Past dates become final once fetched; the current date is refreshed
/// whenever the bucket for "now" has not arrived yet.
#[derive(Default)]
pub struct BucketCache {
    inner: RwLock<BucketInner>,
}

#[derive(Default)]
struct BucketInner {
    samples: BTreeMap<DateTime<Utc>, f64>,
    final_dates: HashSet<NaiveDate>,
}

impl BucketCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Does the given local date need a (re)fetch? `current_bucket` is
    /// the floor-of-now bucket when the caller needs fresh data.
    pub fn needs_fetch(&self, date: NaiveDate, current_bucket: Option<DateTime<Utc>>) -> bool {
        let inner = self.inner.read();
        if inner.final_dates.contains(&date) {
            return false;
        }
        match current_bucket {
            Some(bucket) => !inner.samples.contains_key(&bucket),
            None => true,
        }
    }

    pub fn insert_samples(
        &self,
        date: NaiveDate,
        samples: impl IntoIterator<Item = (DateTime<Utc>, f64)>,
        date_is_final: bool,
    ) {
        let mut inner = self.inner.write();
        for (bucket, value) in samples {
            inner.samples.insert(bucket, value);
        }
        if date_is_final {
            inner.final_dates.insert(date);
        }
    }

    /// Samples with bucket start in `[start, end)`, ascending.
    pub fn samples_in(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<(DateTime<Utc>, f64)> {
        self.inner
            .read()
            .samples
            .range(start..end)
            .map(|(k, v)| (*k, *v))
            .collect()
    }
}
