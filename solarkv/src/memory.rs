//! In-process [`KeyValueStore`] backend.
//!
//! [`MemoryStore`] keeps every key in a `HashMap` behind one
//! `parking_lot::Mutex`. A batch runs entirely under that lock. Each write
//! records the small inverse step that undoes it (a prior field value, the
//! entries a trim dropped), so a failing command rolls the whole batch back
//! without copying whole collections.
//!
//! Keys with a time-to-live are also indexed by deadline. Every batch first
//! drains the index up to the current instant, so expired keys are freed
//! even if nothing touches them again. Reads between batches skip keys whose
//! deadline has passed.
//!
//! Log trimming models the approximate mode of real stores: with
//! [`MaxLen::approx`] a log may grow up to [`APPROX_TRIM_SLACK`] entries past
//! its cap before it is cut back to the cap.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::ops::{Bound, RangeBounds};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::trace;

use crate::batch::{
    Batch, Command, Comparison, MaxLen, Order, Replies, Reply, ScoredMember, StreamEntry,
    StreamId,
};
use crate::error::StoreError;
use crate::kv::KeyValueStore;

/// How far past its cap an approximately trimmed log may grow.
pub const APPROX_TRIM_SLACK: usize = 100;

/// A thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a batch synchronously.
    ///
    /// # Errors
    ///
    /// Returns the first failing command's [`StoreError`]; the batch then has
    /// no effect.
    pub fn apply(&self, batch: Batch) -> Result<Replies, StoreError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(StoreError::Closed);
        }
        inner.run(batch.into_commands()).map(Replies::new)
    }

    /// Remaining time-to-live of `key`, or `None` if it is absent or persistent.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        let inner = self.inner.lock();
        let expires_at = inner.entries.get(key)?.expires_at?;
        expires_at.checked_duration_since(now)
    }

    /// Returns `true` if `key` exists and has not expired.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .get(key)
            .is_some_and(|entry| !entry.is_expired(now))
    }

    /// Number of elements in the collection at `key` (fields, members or
    /// log entries; 1 for a counter), or 0 if absent.
    pub fn len_of(&self, key: &str) -> usize {
        let now = Instant::now();
        let inner = self.inner.lock();
        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.value.len(),
            _ => 0,
        }
    }

    /// Number of live keys.
    pub fn key_count(&self) -> usize {
        let now = Instant::now();
        self.inner
            .lock()
            .entries
            .values()
            .filter(|entry| !entry.is_expired(now))
            .count()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn execute(&self, batch: Batch) -> Result<Replies, StoreError> {
        self.apply(batch)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.lock().closed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    /// Deadlines of keys with a TTL. May hold stale pairs for keys that were
    /// deleted or re-created; draining checks against the live entry.
    expiries: BTreeSet<(Instant, String)>,
    closed: bool,
}

/// Inverse of one applied write, replayed newest first on rollback.
#[derive(Debug)]
enum Undo {
    Entry {
        key: String,
        prior: Option<Entry>,
    },
    Expiry {
        key: String,
        prior: Option<Instant>,
    },
    Counter {
        key: String,
        prior: String,
    },
    HashField {
        key: String,
        field: String,
        prior: Option<String>,
    },
    Member {
        key: String,
        member: String,
        prior: Option<f64>,
    },
    Members {
        key: String,
        removed: Vec<ScoredMember>,
    },
    Append {
        key: String,
        trimmed: Vec<StreamEntry>,
        prior_last: Option<StreamId>,
    },
}

#[derive(Debug)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(value: Value) -> Self {
        Self {
            value,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
enum Value {
    Str(String),
    Hash(HashMap<String, String>),
    SortedSet(SortedSet),
    Stream(Stream),
}

impl Value {
    fn len(&self) -> usize {
        match self {
            Self::Str(_) => 1,
            Self::Hash(hash) => hash.len(),
            Self::SortedSet(set) => set.len(),
            Self::Stream(stream) => stream.entries.len(),
        }
    }

    fn is_empty_collection(&self) -> bool {
        match self {
            Self::Str(_) | Self::Stream(_) => false,
            Self::Hash(hash) => hash.is_empty(),
            Self::SortedSet(set) => set.scores.is_empty(),
        }
    }
}

/// Scores are never NaN, so the total order agrees with `<`.
#[derive(Debug, Clone, Copy)]
struct Score(f64);

impl PartialEq for Score {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Score {}

impl PartialOrd for Score {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Score {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

/// Members ordered by (score, member), with ties broken lexicographically.
#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    order: BTreeSet<(Score, String)>,
}

impl SortedSet {
    fn len(&self) -> usize {
        self.scores.len()
    }

    /// Inserts or re-scores `member`. Returns `true` if it is new.
    fn insert(&mut self, member: String, score: f64) -> bool {
        let is_new = match self.scores.insert(member.clone(), score) {
            Some(old) => {
                self.order.remove(&(Score(old), member.clone()));
                false
            }
            None => true,
        };
        self.order.insert((Score(score), member));
        is_new
    }

    fn remove(&mut self, member: &str) {
        if let Some(score) = self.scores.remove(member) {
            self.order.remove(&(Score(score), member.to_string()));
        }
    }

    fn by_rank(&self, offset: usize, count: usize, order: Order) -> Vec<ScoredMember> {
        let to_member = |(score, member): &(Score, String)| ScoredMember {
            member: member.clone(),
            score: score.0,
        };
        match order {
            Order::Ascending => self
                .order
                .iter()
                .skip(offset)
                .take(count)
                .map(to_member)
                .collect(),
            Order::Descending => self
                .order
                .iter()
                .rev()
                .skip(offset)
                .take(count)
                .map(to_member)
                .collect(),
        }
    }

    fn by_score(&self, bounds: &(Bound<f64>, Bound<f64>)) -> Vec<ScoredMember> {
        self.order
            .iter()
            .filter(|(score, _)| bounds.contains(&score.0))
            .map(|(score, member)| ScoredMember {
                member: member.clone(),
                score: score.0,
            })
            .collect()
    }

    fn rev_rank(&self, member: &str) -> Option<u64> {
        let score = *self.scores.get(member)?;
        let above = self
            .order
            .range((
                Bound::Excluded((Score(score), member.to_string())),
                Bound::Unbounded,
            ))
            .count();
        u64::try_from(above).ok()
    }
}

#[derive(Debug, Default)]
struct Stream {
    entries: VecDeque<StreamEntry>,
    last_id: Option<StreamId>,
}

impl Stream {
    fn append(&mut self, fields: Vec<(String, String)>) -> StreamId {
        let ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        let id = match self.last_id {
            Some(last) if ms <= last.ms => StreamId {
                ms: last.ms,
                seq: last.seq + 1,
            },
            _ => StreamId { ms, seq: 0 },
        };
        self.last_id = Some(id);
        self.entries.push_back(StreamEntry { id, fields });
        id
    }

    /// Drops the oldest entries past the cap and returns them.
    fn trim(&mut self, max_len: MaxLen) -> Vec<StreamEntry> {
        let excess = self.entries.len().saturating_sub(max_len.len);
        if excess == 0 || (max_len.approximate && excess <= APPROX_TRIM_SLACK) {
            return Vec::new();
        }
        self.entries.drain(..excess).collect()
    }
}

fn wrong_type(key: &str, expected: &'static str) -> StoreError {
    StoreError::WrongType {
        key: key.to_string(),
        expected,
    }
}

impl Inner {
    fn run(&mut self, commands: Vec<Command>) -> Result<Vec<Reply>, StoreError> {
        let now = Instant::now();
        self.purge_expired(now);

        let mut undo = Vec::new();
        let mut replies = Vec::with_capacity(commands.len());

        for command in commands {
            let key = command.key().to_string();
            if command.is_write() && !self.entries.contains_key(&key) {
                undo.push(Undo::Entry {
                    key: key.clone(),
                    prior: None,
                });
            }

            match self.apply(command, now, &mut undo) {
                Ok(reply) => replies.push(reply),
                Err(err) => {
                    trace!(%err, steps = undo.len(), "rolling back batch");
                    self.roll_back(undo);
                    return Err(err);
                }
            }

            if self.entries.get(&key).is_some_and(|e| e.value.is_empty_collection()) {
                if let Some(entry) = self.entries.remove(&key) {
                    undo.push(Undo::Entry {
                        key,
                        prior: Some(entry),
                    });
                }
            }
        }

        Ok(replies)
    }

    /// Frees every key whose deadline is at or before `now`.
    fn purge_expired(&mut self, now: Instant) {
        while self.expiries.first().is_some_and(|(at, _)| *at <= now) {
            let Some((at, key)) = self.expiries.pop_first() else {
                break;
            };
            if self.entries.get(&key).is_some_and(|e| e.expires_at == Some(at)) {
                self.entries.remove(&key);
            }
        }
    }

    fn set_expiry(&mut self, key: &str, at: Option<Instant>) {
        let Some(entry) = self.entries.get_mut(key) else {
            return;
        };
        if let Some(old) = std::mem::replace(&mut entry.expires_at, at) {
            self.expiries.remove(&(old, key.to_string()));
        }
        if let Some(at) = at {
            self.expiries.insert((at, key.to_string()));
        }
    }

    fn value_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.entries.get_mut(key).map(|e| &mut e.value)
    }

    fn roll_back(&mut self, undo: Vec<Undo>) {
        for step in undo.into_iter().rev() {
            match step {
                Undo::Entry {
                    key,
                    prior: Some(entry),
                } => {
                    self.entries.insert(key, entry);
                }
                Undo::Entry { key, prior: None } => {
                    self.entries.remove(&key);
                }
                Undo::Expiry { key, prior } => self.set_expiry(&key, prior),
                Undo::Counter { key, prior } => {
                    if let Some(Value::Str(raw)) = self.value_mut(&key) {
                        *raw = prior;
                    }
                }
                Undo::HashField { key, field, prior } => {
                    if let Some(Value::Hash(hash)) = self.value_mut(&key) {
                        match prior {
                            Some(value) => hash.insert(field, value),
                            None => hash.remove(&field),
                        };
                    }
                }
                Undo::Member { key, member, prior } => {
                    if let Some(Value::SortedSet(set)) = self.value_mut(&key) {
                        match prior {
                            Some(score) => {
                                set.insert(member, score);
                            }
                            None => set.remove(&member),
                        }
                    }
                }
                Undo::Members { key, removed } => {
                    if let Some(Value::SortedSet(set)) = self.value_mut(&key) {
                        for scored in removed {
                            set.insert(scored.member, scored.score);
                        }
                    }
                }
                Undo::Append {
                    key,
                    trimmed,
                    prior_last,
                } => {
                    if let Some(Value::Stream(stream)) = self.value_mut(&key) {
                        stream.entries.pop_back();
                        for entry in trimmed.into_iter().rev() {
                            stream.entries.push_front(entry);
                        }
                        stream.last_id = prior_last;
                    }
                }
            }
        }
    }

    /// Applies one command. A failing command leaves the store untouched;
    /// a succeeding write pushes its inverse onto `undo`.
    fn apply(
        &mut self,
        command: Command,
        now: Instant,
        undo: &mut Vec<Undo>,
    ) -> Result<Reply, StoreError> {
        match command {
            Command::Del { key } => match self.entries.remove(&key) {
                Some(entry) => {
                    undo.push(Undo::Entry {
                        key,
                        prior: Some(entry),
                    });
                    Ok(Reply::Integer(1))
                }
                None => Ok(Reply::Integer(0)),
            },
            Command::Expire { key, ttl } => {
                let Some(prior) = self.entries.get(&key).map(|e| e.expires_at) else {
                    return Ok(Reply::Bool(false));
                };
                if ttl.is_zero() {
                    if let Some(entry) = self.entries.remove(&key) {
                        undo.push(Undo::Entry {
                            key,
                            prior: Some(entry),
                        });
                    }
                } else {
                    self.set_expiry(&key, now.checked_add(ttl));
                    undo.push(Undo::Expiry { key, prior });
                }
                Ok(Reply::Bool(true))
            }
            Command::Incr { key } => {
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Str("0".to_string())));
                let Value::Str(raw) = &mut entry.value else {
                    return Err(wrong_type(&key, "string"));
                };
                let next = raw
                    .parse::<i64>()
                    .ok()
                    .and_then(|n| n.checked_add(1))
                    .ok_or_else(|| StoreError::NotAnInteger { key: key.clone() })?;
                let prior = std::mem::replace(raw, next.to_string());
                undo.push(Undo::Counter { key, prior });
                Ok(Reply::Integer(next))
            }
            Command::HSet { key, fields } => {
                let hash = self.hash_mut(&key)?;
                let mut added = 0;
                for (field, value) in fields {
                    let prior = hash.insert(field.clone(), value);
                    if prior.is_none() {
                        added += 1;
                    }
                    undo.push(Undo::HashField {
                        key: key.clone(),
                        field,
                        prior,
                    });
                }
                Ok(Reply::Integer(added))
            }
            Command::HGetAll { key } => match self.entries.get(&key).map(|e| &e.value) {
                None => Ok(Reply::Hash(HashMap::new())),
                Some(Value::Hash(hash)) => Ok(Reply::Hash(hash.clone())),
                Some(_) => Err(wrong_type(&key, "hash")),
            },
            Command::HIncrBy { key, field, delta } => {
                let hash = self.hash_mut(&key)?;
                let current = match hash.get(&field) {
                    Some(raw) => raw.parse::<i64>().ok(),
                    None => Some(0),
                };
                let next = current
                    .and_then(|n| n.checked_add(delta))
                    .ok_or_else(|| StoreError::NotAnInteger { key: key.clone() })?;
                let prior = hash.insert(field.clone(), next.to_string());
                undo.push(Undo::HashField { key, field, prior });
                Ok(Reply::Integer(next))
            }
            Command::HSetIfCompare {
                key,
                field,
                value,
                cmp,
            } => {
                if !value.is_finite() {
                    return Err(StoreError::InvalidScore { key });
                }
                let hash = self.hash_mut(&key)?;
                let replace = hash
                    .get(&field)
                    .and_then(|raw| raw.parse::<f64>().ok())
                    .is_none_or(|current| cmp.holds(value, current));
                if replace {
                    let prior = hash.insert(field.clone(), value.to_string());
                    undo.push(Undo::HashField { key, field, prior });
                }
                Ok(Reply::Bool(replace))
            }
            Command::ZAdd { key, score, member } => {
                if score.is_nan() {
                    return Err(StoreError::InvalidScore { key });
                }
                let set = self.sorted_set_mut(&key)?;
                let prior = set.scores.get(&member).copied();
                set.insert(member.clone(), score);
                undo.push(Undo::Member { key, member, prior });
                Ok(Reply::Integer(i64::from(prior.is_none())))
            }
            Command::ZRange {
                key,
                offset,
                count,
                order,
            } => {
                let members = self
                    .sorted_set(&key)?
                    .map(|set| set.by_rank(offset, count, order))
                    .unwrap_or_default();
                Ok(Reply::Members(members))
            }
            Command::ZRangeByScore { key, min, max } => {
                let members = self
                    .sorted_set(&key)?
                    .map(|set| set.by_score(&(min, max)))
                    .unwrap_or_default();
                Ok(Reply::Members(members))
            }
            Command::ZRemRangeByScore { key, min, max } => {
                let set = self.sorted_set_mut(&key)?;
                let removed = set.by_score(&(min, max));
                for scored in &removed {
                    set.remove(&scored.member);
                }
                let count = i64::try_from(removed.len()).unwrap_or(i64::MAX);
                if !removed.is_empty() {
                    undo.push(Undo::Members { key, removed });
                }
                Ok(Reply::Integer(count))
            }
            Command::ZCard { key } => {
                let len = self.sorted_set(&key)?.map_or(0, SortedSet::len);
                Ok(Reply::Integer(i64::try_from(len).unwrap_or(i64::MAX)))
            }
            Command::ZRevRank { key, member } => Ok(Reply::Rank(
                self.sorted_set(&key)?.and_then(|set| set.rev_rank(&member)),
            )),
            Command::XAdd {
                key,
                fields,
                max_len,
            } => {
                let entry = self
                    .entries
                    .entry(key.clone())
                    .or_insert_with(|| Entry::new(Value::Stream(Stream::default())));
                let Value::Stream(stream) = &mut entry.value else {
                    return Err(wrong_type(&key, "stream"));
                };
                let prior_last = stream.last_id;
                let id = stream.append(fields);
                let trimmed = max_len.map(|m| stream.trim(m)).unwrap_or_default();
                undo.push(Undo::Append {
                    key,
                    trimmed,
                    prior_last,
                });
                Ok(Reply::EntryId(id))
            }
            Command::XRevRange { key, count } => match self.entries.get(&key).map(|e| &e.value) {
                None => Ok(Reply::Entries(Vec::new())),
                Some(Value::Stream(stream)) => Ok(Reply::Entries(
                    stream.entries.iter().rev().take(count).cloned().collect(),
                )),
                Some(_) => Err(wrong_type(&key, "stream")),
            },
        }
    }

    fn hash_mut(&mut self, key: &str) -> Result<&mut HashMap<String, String>, StoreError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::Hash(HashMap::new())));
        match &mut entry.value {
            Value::Hash(hash) => Ok(hash),
            _ => Err(wrong_type(key, "hash")),
        }
    }

    fn sorted_set(&self, key: &str) -> Result<Option<&SortedSet>, StoreError> {
        match self.entries.get(key).map(|e| &e.value) {
            None => Ok(None),
            Some(Value::SortedSet(set)) => Ok(Some(set)),
            Some(_) => Err(wrong_type(key, "sorted set")),
        }
    }

    fn sorted_set_mut(&mut self, key: &str) -> Result<&mut SortedSet, StoreError> {
        let entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Entry::new(Value::SortedSet(SortedSet::default())));
        match &mut entry.value {
            Value::SortedSet(set) => Ok(set),
            _ => Err(wrong_type(key, "sorted set")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(store: &MemoryStore, build: impl FnOnce(&mut Batch)) -> Replies {
        let mut batch = Batch::new();
        build(&mut batch);
        store.apply(batch).unwrap()
    }

    #[test]
    fn test_incr_counts_and_keeps_ttl() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.incr("c");
            b.expire("c", Duration::from_secs(60));
        });
        let mut batch = Batch::new();
        let slot = batch.incr("c");
        assert_eq!(store.apply(batch).unwrap().integer(slot).unwrap(), 2);
        assert!(store.ttl("c").is_some());
    }

    #[test]
    fn test_expire_missing_key_is_false() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        let slot = batch.expire("nope", Duration::from_secs(1));
        let replies = store.apply(batch).unwrap();
        assert!(!replies.flag(slot).unwrap());
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_expired_keys_disappear() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.zadd("z", 1.0, "a");
            b.expire("z", Duration::from_millis(20));
        });
        assert!(store.contains_key("z"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!store.contains_key("z"));

        let mut batch = Batch::new();
        let card = batch.zcard("z");
        assert_eq!(store.apply(batch).unwrap().integer(card).unwrap(), 0);
    }

    #[test]
    fn test_sorted_set_ranges_and_ranks() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.zadd("z", 3.0, "c");
            b.zadd("z", 1.0, "a");
            b.zadd("z", 2.0, "b");
            b.zadd("z", 2.0, "bb");
        });

        let mut batch = Batch::new();
        let asc = batch.zrange("z", 0, 2, Order::Ascending);
        let desc = batch.zrange("z", 1, 10, Order::Descending);
        let top = batch.push(Command::ZRevRank {
            key: "z".into(),
            member: "c".into(),
        });
        let tied = batch.push(Command::ZRevRank {
            key: "z".into(),
            member: "b".into(),
        });
        let absent = batch.push(Command::ZRevRank {
            key: "z".into(),
            member: "zz".into(),
        });
        let mut replies = store.apply(batch).unwrap();

        let names = |m: Vec<ScoredMember>| m.into_iter().map(|s| s.member).collect::<Vec<_>>();
        assert_eq!(names(replies.take_members(asc).unwrap()), ["a", "b"]);
        assert_eq!(names(replies.take_members(desc).unwrap()), ["bb", "b", "a"]);
        assert_eq!(replies.rank(top).unwrap(), Some(0));
        assert_eq!(replies.rank(tied).unwrap(), Some(2));
        assert_eq!(replies.rank(absent).unwrap(), None);
    }

    #[test]
    fn test_rescoring_moves_member() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.zadd("z", 1.0, "a");
            b.zadd("z", 5.0, "b");
            b.zadd("z", 10.0, "a");
        });
        let mut batch = Batch::new();
        let asc = batch.zrange("z", 0, 10, Order::Ascending);
        let mut replies = store.apply(batch).unwrap();
        let members = replies.take_members(asc).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[1].member, "a");
        assert_eq!(members[1].score, 10.0);
    }

    #[test]
    fn test_score_bounds() {
        let store = MemoryStore::new();
        run(&store, |b| {
            for (score, member) in [(0.0, "a"), (1.0, "b"), (2.0, "c"), (3.0, "d")] {
                b.zadd("z", score, member);
            }
        });

        let mut batch = Batch::new();
        let removed = batch.zrem_range_by_score("z", Bound::Unbounded, Bound::Excluded(2.0));
        let left = batch.zrange_by_score("z", Bound::Included(2.0), Bound::Unbounded);
        let mut replies = store.apply(batch).unwrap();
        assert_eq!(replies.integer(removed).unwrap(), 2);
        let left = replies.take_members(left).unwrap();
        assert_eq!(left.len(), 2);
        assert_eq!(left[0].member, "c");
    }

    #[test]
    fn test_nan_score_rolls_back_batch() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.incr("counter");
        batch.zadd("z", f64::NAN, "a");
        let err = store.apply(batch).unwrap_err();
        assert!(matches!(err, StoreError::InvalidScore { .. }));
        assert_eq!(store.key_count(), 0);
    }

    #[test]
    fn test_wrong_type_restores_prior_values() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.incr("counter");
            b.zadd("z", 1.0, "a");
        });

        let mut batch = Batch::new();
        batch.incr("counter");
        batch.del("z");
        batch.zadd("counter", 1.0, "oops");
        let err = store.apply(batch).unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));

        let mut batch = Batch::new();
        let card = batch.zcard("z");
        let counter = batch.incr("counter");
        let replies = store.apply(batch).unwrap();
        assert_eq!(replies.integer(card).unwrap(), 1);
        assert_eq!(replies.integer(counter).unwrap(), 2);
    }

    #[test]
    fn test_expired_keys_are_freed_without_access() {
        let store = MemoryStore::new();
        run(&store, |b| {
            for i in 0..1000 {
                let key = format!("bucket:{i}");
                b.zadd(key.clone(), 1.0, "a");
                b.expire(key, Duration::from_millis(1));
            }
        });
        std::thread::sleep(Duration::from_millis(20));
        run(&store, |b| {
            b.incr("other");
        });

        let inner = store.inner.lock();
        assert_eq!(inner.entries.len(), 1);
        assert!(inner.expiries.is_empty());
    }

    #[test]
    fn test_refreshed_ttl_is_indexed_once() {
        let store = MemoryStore::new();
        for _ in 0..10 {
            run(&store, |b| {
                b.incr("c");
                b.expire("c", Duration::from_millis(10));
            });
        }
        assert_eq!(store.inner.lock().expiries.len(), 1);

        run(&store, |b| {
            b.del("c");
        });
        run(&store, |b| {
            b.incr("c");
        });
        std::thread::sleep(Duration::from_millis(30));
        run(&store, |b| {
            b.incr("other");
        });

        // The deleted key's deadline must not free its successor.
        assert!(store.contains_key("c"));
        assert!(store.inner.lock().expiries.is_empty());
    }

    #[test]
    fn test_failed_batch_restores_fields_members_and_ttl() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.push(Command::HSet {
                key: "h".into(),
                fields: vec![("max".into(), "5".into())],
            });
            b.zadd("z", 1.0, "a");
            b.zadd("z", 2.0, "b");
            b.expire("z", Duration::from_secs(60));
        });

        let mut batch = Batch::new();
        batch.push(Command::HSet {
            key: "h".into(),
            fields: vec![("max".into(), "9".into()), ("new".into(), "1".into())],
        });
        batch.zadd("z", 7.0, "a");
        batch.expire("z", Duration::from_secs(3600));
        batch.push(Command::ZRemRangeByScore {
            key: "z".into(),
            min: Bound::Unbounded,
            max: Bound::Unbounded,
        });
        batch.incr("h");
        assert!(matches!(
            store.apply(batch).unwrap_err(),
            StoreError::WrongType { .. }
        ));

        let mut batch = Batch::new();
        let hash = batch.push(Command::HGetAll { key: "h".into() });
        let members = batch.zrange("z", 0, 10, Order::Ascending);
        let mut replies = store.apply(batch).unwrap();
        let hash = replies.take_hash(hash).unwrap();
        assert_eq!(hash.len(), 1);
        assert_eq!(hash["max"], "5");
        let members = replies.take_members(members).unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!((members[0].member.as_str(), members[0].score), ("a", 1.0));
        assert!(store.ttl("z").unwrap() <= Duration::from_secs(60));
    }

    #[test]
    fn test_failed_append_at_cap_restores_trimmed_entries() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        let ids: Vec<_> = (0..3)
            .map(|i| batch.xadd("log", vec![("n".into(), i.to_string())], Some(MaxLen::exact(3))))
            .collect();
        let replies = store.apply(batch).unwrap();
        let ids: Vec<_> = ids.into_iter().map(|s| replies.entry_id(s).unwrap()).collect();

        let mut batch = Batch::new();
        batch.xadd("log", vec![("n".into(), "3".into())], Some(MaxLen::exact(3)));
        batch.zadd("log", 1.0, "oops");
        assert!(store.apply(batch).is_err());

        let mut batch = Batch::new();
        let newest = batch.xrevrange("log", 10);
        let next = batch.xadd("log", vec![("n".into(), "4".into())], None);
        let mut replies = store.apply(batch).unwrap();
        let entries = replies.take_entries(newest).unwrap();
        let kept: Vec<_> = entries.iter().rev().map(|e| e.id).collect();
        assert_eq!(kept, ids);
        assert!(replies.entry_id(next).unwrap() > ids[2]);
    }

    #[test]
    fn test_hash_commands() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.push(Command::HSet {
            key: "h".into(),
            fields: vec![("max".into(), "5".into()), ("junk".into(), "x".into())],
        });
        let count = batch.push(Command::HIncrBy {
            key: "h".into(),
            field: "count".into(),
            delta: 3,
        });
        let lower = batch.push(Command::HSetIfCompare {
            key: "h".into(),
            field: "max".into(),
            value: 4.0,
            cmp: Comparison::Greater,
        });
        let higher = batch.push(Command::HSetIfCompare {
            key: "h".into(),
            field: "max".into(),
            value: 6.5,
            cmp: Comparison::Greater,
        });
        let absent = batch.push(Command::HSetIfCompare {
            key: "h".into(),
            field: "min".into(),
            value: 9.0,
            cmp: Comparison::Less,
        });
        let garbage = batch.push(Command::HSetIfCompare {
            key: "h".into(),
            field: "junk".into(),
            value: 1.0,
            cmp: Comparison::Less,
        });
        let all = batch.push(Command::HGetAll { key: "h".into() });
        let mut replies = store.apply(batch).unwrap();

        assert_eq!(replies.integer(count).unwrap(), 3);
        assert!(!replies.flag(lower).unwrap());
        assert!(replies.flag(higher).unwrap());
        assert!(replies.flag(absent).unwrap());
        assert!(replies.flag(garbage).unwrap());

        let hash = replies.take_hash(all).unwrap();
        assert_eq!(hash["max"], "6.5");
        assert_eq!(hash["min"], "9");
        assert_eq!(hash["junk"], "1");
        assert_eq!(hash["count"], "3");
    }

    #[test]
    fn test_stream_ids_increase_and_exact_trim() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        let ids: Vec<_> = (0..5)
            .map(|i| batch.xadd("log", vec![("n".into(), i.to_string())], Some(MaxLen::exact(3))))
            .collect();
        let newest = batch.xrevrange("log", 10);
        let mut replies = store.apply(batch).unwrap();

        let ids: Vec<_> = ids.into_iter().map(|s| replies.entry_id(s).unwrap()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));

        let entries = replies.take_entries(newest).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].fields[0].1, "4");
        assert_eq!(entries[2].fields[0].1, "2");
    }

    #[test]
    fn test_approximate_trim_stays_within_slack() {
        let store = MemoryStore::new();
        let cap = 10;
        for i in 0..(cap + APPROX_TRIM_SLACK) * 3 {
            run(&store, |b| {
                b.xadd("log", vec![("n".into(), i.to_string())], Some(MaxLen::approx(cap)));
            });
            assert!(store.len_of("log") <= cap + APPROX_TRIM_SLACK);
        }
        assert!(store.len_of("log") >= cap);
    }

    #[test]
    fn test_empty_collections_are_removed() {
        let store = MemoryStore::new();
        run(&store, |b| {
            b.zadd("z", 1.0, "a");
        });
        run(&store, |b| {
            b.push(Command::ZRemRangeByScore {
                key: "z".into(),
                min: Bound::Unbounded,
                max: Bound::Unbounded,
            });
        });
        assert!(!store.contains_key("z"));
    }

    #[tokio::test]
    async fn test_closed_store_rejects_batches() {
        let store = MemoryStore::new();
        store.close().await.unwrap();
        let mut batch = Batch::new();
        batch.incr("c");
        assert_eq!(store.execute(batch).await.unwrap_err(), StoreError::Closed);
    }
}
