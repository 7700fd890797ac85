//! Typed store commands, their replies, and atomic batches.
//!
//! Components never talk to a backend one command at a time. They push
//! [`Command`]s into a [`Batch`], keep the [`Slot`] handed back for every
//! command whose reply they need, and read typed values out of the
//! [`Replies`] once the whole batch has been applied.
//!
//! ```rust
//! use solarkv::kv::{Batch, Replies, Reply};
//!
//! let mut batch = Batch::new();
//! let count = batch.incr("hits");
//! batch.expire("hits", std::time::Duration::from_secs(60));
//!
//! // A backend answers with one reply per command.
//! let replies = Replies::new(vec![Reply::Integer(1), Reply::Bool(true)]);
//! assert_eq!(replies.integer(count).unwrap(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::ops::Bound;
use std::time::Duration;

use crate::error::StoreError;

/// Comparison used by [`Command::HSetIfCompare`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Replace when the candidate is strictly greater than the stored value.
    Greater,
    /// Replace when the candidate is strictly less than the stored value.
    Less,
}

impl Comparison {
    /// Returns `true` if `candidate` should replace `current`.
    pub fn holds(self, candidate: f64, current: f64) -> bool {
        match self {
            Self::Greater => candidate > current,
            Self::Less => candidate < current,
        }
    }
}

/// Direction of a rank range over a sorted set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Lowest score first.
    Ascending,
    /// Highest score first.
    Descending,
}

/// Length cap applied to a log on append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxLen {
    /// Target number of entries.
    pub len: usize,
    /// Allow the backend to keep somewhat more than `len` entries and trim
    /// lazily. Readers must never depend on an exact length.
    pub approximate: bool,
}

impl MaxLen {
    /// An approximate cap of `len` entries.
    pub fn approx(len: usize) -> Self {
        Self {
            len,
            approximate: true,
        }
    }

    /// An exact cap of `len` entries.
    pub fn exact(len: usize) -> Self {
        Self {
            len,
            approximate: false,
        }
    }
}

/// A single store command.
///
/// Every variant names the `key` it operates on.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Delete a key of any type. Replies [`Reply::Integer`] 1 or 0.
    Del {
        /// Target key.
        key: String,
    },
    /// Set a time-to-live on an existing key. Replies [`Reply::Bool`], `false` if absent.
    Expire {
        /// Target key.
        key: String,
        /// Time until the key is removed. Zero removes it now.
        ttl: Duration,
    },
    /// Increment an integer counter, creating it at 0. Replies the new value.
    Incr {
        /// Target key.
        key: String,
    },
    /// Set hash fields. Replies [`Reply::Integer`] with the number of new fields.
    HSet {
        /// Target key.
        key: String,
        /// Field/value pairs to write.
        fields: Vec<(String, String)>,
    },
    /// Read a whole hash. Replies [`Reply::Hash`], empty if absent.
    HGetAll {
        /// Target key.
        key: String,
    },
    /// Add `delta` to an integer hash field. Replies the new value.
    HIncrBy {
        /// Target key.
        key: String,
        /// Field to increment; starts at 0 if absent.
        field: String,
        /// Amount to add.
        delta: i64,
    },
    /// Set a numeric hash field to `value` if the field is absent, unparsable,
    /// or `cmp` holds against its current value. Evaluated inside the store.
    /// Replies [`Reply::Bool`] telling whether the field was written.
    HSetIfCompare {
        /// Target key.
        key: String,
        /// Field to compare and maybe replace.
        field: String,
        /// Candidate value. Must be finite.
        value: f64,
        /// How the candidate must relate to the stored value.
        cmp: Comparison,
    },
    /// Add or re-score a sorted-set member. Replies [`Reply::Integer`] 1 if new.
    ZAdd {
        /// Target key.
        key: String,
        /// Member score. Must not be NaN.
        score: f64,
        /// Member string.
        member: String,
    },
    /// Up to `count` members starting at rank `offset`. Replies [`Reply::Members`].
    ZRange {
        /// Target key.
        key: String,
        /// Rank of the first member returned.
        offset: usize,
        /// Maximum number of members.
        count: usize,
        /// Which end rank 0 refers to.
        order: Order,
    },
    /// Members with scores inside the bounds, ascending. Replies [`Reply::Members`].
    ZRangeByScore {
        /// Target key.
        key: String,
        /// Lower score bound.
        min: Bound<f64>,
        /// Upper score bound.
        max: Bound<f64>,
    },
    /// Remove members with scores inside the bounds. Replies the removed count.
    ZRemRangeByScore {
        /// Target key.
        key: String,
        /// Lower score bound.
        min: Bound<f64>,
        /// Upper score bound.
        max: Bound<f64>,
    },
    /// Number of members. Replies [`Reply::Integer`].
    ZCard {
        /// Target key.
        key: String,
    },
    /// 0-based rank of a member counted from the highest score. Replies [`Reply::Rank`].
    ZRevRank {
        /// Target key.
        key: String,
        /// Member to locate.
        member: String,
    },
    /// Append an entry to a log, then trim. Replies [`Reply::EntryId`].
    XAdd {
        /// Target key.
        key: String,
        /// Entry fields.
        fields: Vec<(String, String)>,
        /// Cap applied after the append, if any.
        max_len: Option<MaxLen>,
    },
    /// The newest `count` entries, newest first. Replies [`Reply::Entries`].
    XRevRange {
        /// Target key.
        key: String,
        /// Maximum number of entries.
        count: usize,
    },
}

impl Command {
    /// The key the command operates on.
    pub fn key(&self) -> &str {
        match self {
            Self::Del { key }
            | Self::Expire { key, .. }
            | Self::Incr { key }
            | Self::HSet { key, .. }
            | Self::HGetAll { key }
            | Self::HIncrBy { key, .. }
            | Self::HSetIfCompare { key, .. }
            | Self::ZAdd { key, .. }
            | Self::ZRange { key, .. }
            | Self::ZRangeByScore { key, .. }
            | Self::ZRemRangeByScore { key, .. }
            | Self::ZCard { key }
            | Self::ZRevRank { key, .. }
            | Self::XAdd { key, .. }
            | Self::XRevRange { key, .. } => key,
        }
    }

    /// Returns `true` if the command may modify its key.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Self::HGetAll { .. }
                | Self::ZRange { .. }
                | Self::ZRangeByScore { .. }
                | Self::ZCard { .. }
                | Self::ZRevRank { .. }
                | Self::XRevRange { .. }
        )
    }
}

/// A sorted-set member and its score.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredMember {
    /// The member string.
    pub member: String,
    /// Its score.
    pub score: f64,
}

/// Identifier of a log entry: milliseconds plus a sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId {
    /// Unix milliseconds at append time.
    pub ms: u64,
    /// Disambiguates entries appended in the same millisecond.
    pub seq: u64,
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

/// One log entry.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    /// Entry identifier, increasing in append order.
    pub id: StreamId,
    /// Field map in insertion order.
    pub fields: Vec<(String, String)>,
}

/// The reply to one [`Command`].
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    /// Acknowledged with no value.
    Ok,
    /// A count or counter value.
    Integer(i64),
    /// A yes/no outcome.
    Bool(bool),
    /// A rank, absent if the member does not exist.
    Rank(Option<u64>),
    /// Sorted-set members in the requested order.
    Members(Vec<ScoredMember>),
    /// All fields of a hash.
    Hash(HashMap<String, String>),
    /// The id assigned to an appended log entry.
    EntryId(StreamId),
    /// Log entries in the requested order.
    Entries(Vec<StreamEntry>),
}

/// Position of a command inside its [`Batch`], used to find its reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(usize);

impl Slot {
    /// The zero-based command index.
    pub fn index(self) -> usize {
        self.0
    }
}

/// An ordered group of commands applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a command and returns the slot of its reply.
    pub fn push(&mut self, command: Command) -> Slot {
        self.commands.push(command);
        Slot(self.commands.len() - 1)
    }

    /// Number of queued commands.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// The queued commands in order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Consumes the batch, yielding its commands.
    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }

    /// Queues [`Command::Incr`].
    pub fn incr(&mut self, key: impl Into<String>) -> Slot {
        self.push(Command::Incr { key: key.into() })
    }

    /// Queues [`Command::Expire`].
    pub fn expire(&mut self, key: impl Into<String>, ttl: Duration) -> Slot {
        self.push(Command::Expire {
            key: key.into(),
            ttl,
        })
    }

    /// Queues [`Command::Del`].
    pub fn del(&mut self, key: impl Into<String>) -> Slot {
        self.push(Command::Del { key: key.into() })
    }

    /// Queues [`Command::ZAdd`].
    pub fn zadd(&mut self, key: impl Into<String>, score: f64, member: impl Into<String>) -> Slot {
        self.push(Command::ZAdd {
            key: key.into(),
            score,
            member: member.into(),
        })
    }

    /// Queues [`Command::ZRange`].
    pub fn zrange(
        &mut self,
        key: impl Into<String>,
        offset: usize,
        count: usize,
        order: Order,
    ) -> Slot {
        self.push(Command::ZRange {
            key: key.into(),
            offset,
            count,
            order,
        })
    }

    /// Queues [`Command::ZRangeByScore`].
    ///
    /// None of the built-in components read by score; this serves callers
    /// holding time-scored sets, such as a sliding limiter's markers.
    pub fn zrange_by_score(
        &mut self,
        key: impl Into<String>,
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> Slot {
        self.push(Command::ZRangeByScore {
            key: key.into(),
            min,
            max,
        })
    }

    /// Queues [`Command::ZRemRangeByScore`].
    pub fn zrem_range_by_score(
        &mut self,
        key: impl Into<String>,
        min: Bound<f64>,
        max: Bound<f64>,
    ) -> Slot {
        self.push(Command::ZRemRangeByScore {
            key: key.into(),
            min,
            max,
        })
    }

    /// Queues [`Command::ZCard`].
    pub fn zcard(&mut self, key: impl Into<String>) -> Slot {
        self.push(Command::ZCard { key: key.into() })
    }

    /// Queues [`Command::XAdd`].
    pub fn xadd(
        &mut self,
        key: impl Into<String>,
        fields: Vec<(String, String)>,
        max_len: Option<MaxLen>,
    ) -> Slot {
        self.push(Command::XAdd {
            key: key.into(),
            fields,
            max_len,
        })
    }

    /// Queues [`Command::XRevRange`].
    pub fn xrevrange(&mut self, key: impl Into<String>, count: usize) -> Slot {
        self.push(Command::XRevRange {
            key: key.into(),
            count,
        })
    }
}

/// Replies to an executed [`Batch`], one per command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Replies {
    replies: Vec<Reply>,
}

impl Replies {
    /// Wraps backend replies, which must be in command order.
    pub fn new(replies: Vec<Reply>) -> Self {
        Self { replies }
    }

    /// Number of replies.
    pub fn len(&self) -> usize {
        self.replies.len()
    }

    /// Returns `true` if there are no replies.
    pub fn is_empty(&self) -> bool {
        self.replies.is_empty()
    }

    /// The raw reply at `slot`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingReply`] if the slot is out of range.
    pub fn get(&self, slot: Slot) -> Result<&Reply, StoreError> {
        self.replies
            .get(slot.0)
            .ok_or(StoreError::MissingReply { slot: slot.0 })
    }

    /// The integer reply at `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not an integer.
    pub fn integer(&self, slot: Slot) -> Result<i64, StoreError> {
        match self.get(slot)? {
            Reply::Integer(n) => Ok(*n),
            _ => Err(unexpected(slot, "integer")),
        }
    }

    /// The yes/no reply at `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not a boolean.
    pub fn flag(&self, slot: Slot) -> Result<bool, StoreError> {
        match self.get(slot)? {
            Reply::Bool(b) => Ok(*b),
            _ => Err(unexpected(slot, "bool")),
        }
    }

    /// The rank reply at `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not a rank.
    pub fn rank(&self, slot: Slot) -> Result<Option<u64>, StoreError> {
        match self.get(slot)? {
            Reply::Rank(rank) => Ok(*rank),
            _ => Err(unexpected(slot, "rank")),
        }
    }

    /// The entry id reply at `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not an entry id.
    pub fn entry_id(&self, slot: Slot) -> Result<StreamId, StoreError> {
        match self.get(slot)? {
            Reply::EntryId(id) => Ok(*id),
            _ => Err(unexpected(slot, "entry id")),
        }
    }

    /// Moves the member list out of `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not a member list.
    pub fn take_members(&mut self, slot: Slot) -> Result<Vec<ScoredMember>, StoreError> {
        match self.take(slot)? {
            Reply::Members(members) => Ok(members),
            _ => Err(unexpected(slot, "members")),
        }
    }

    /// Moves the hash out of `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not a hash.
    pub fn take_hash(&mut self, slot: Slot) -> Result<HashMap<String, String>, StoreError> {
        match self.take(slot)? {
            Reply::Hash(hash) => Ok(hash),
            _ => Err(unexpected(slot, "hash")),
        }
    }

    /// Moves the log entries out of `slot`.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the reply is missing or not an entry list.
    pub fn take_entries(&mut self, slot: Slot) -> Result<Vec<StreamEntry>, StoreError> {
        match self.take(slot)? {
            Reply::Entries(entries) => Ok(entries),
            _ => Err(unexpected(slot, "entries")),
        }
    }

    fn take(&mut self, slot: Slot) -> Result<Reply, StoreError> {
        self.replies
            .get_mut(slot.0)
            .map(|reply| std::mem::replace(reply, Reply::Ok))
            .ok_or(StoreError::MissingReply { slot: slot.0 })
    }
}

fn unexpected(slot: Slot, expected: &'static str) -> StoreError {
    StoreError::UnexpectedReply {
        slot: slot.0,
        expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slots_follow_push_order() {
        let mut batch = Batch::new();
        assert!(batch.is_empty());
        let a = batch.incr("a");
        let b = batch.expire("a", Duration::from_secs(1));
        let c = batch.zcard("z");
        assert_eq!((a.index(), b.index(), c.index()), (0, 1, 2));
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.commands()[2].key(), "z");
    }

    #[test]
    fn test_is_write() {
        assert!(Command::Incr { key: "k".into() }.is_write());
        assert!(
            Command::HSetIfCompare {
                key: "k".into(),
                field: "f".into(),
                value: 1.0,
                cmp: Comparison::Greater,
            }
            .is_write()
        );
        assert!(!Command::ZCard { key: "k".into() }.is_write());
        assert!(
            !Command::XRevRange {
                key: "k".into(),
                count: 1
            }
            .is_write()
        );
    }

    #[test]
    fn test_comparison() {
        assert!(Comparison::Greater.holds(2.0, 1.0));
        assert!(!Comparison::Greater.holds(1.0, 1.0));
        assert!(Comparison::Less.holds(1.0, 2.0));
        assert!(!Comparison::Less.holds(2.0, 2.0));
    }

    #[test]
    fn test_typed_accessors() {
        let mut batch = Batch::new();
        let n = batch.incr("n");
        let members = batch.zrange("z", 0, 10, Order::Ascending);
        let missing = Slot(7);

        let mut replies = Replies::new(vec![
            Reply::Integer(3),
            Reply::Members(vec![ScoredMember {
                member: "m".into(),
                score: 1.0,
            }]),
        ]);

        assert_eq!(replies.integer(n).unwrap(), 3);
        assert!(matches!(
            replies.integer(members),
            Err(StoreError::UnexpectedReply { slot: 1, .. })
        ));
        assert_eq!(replies.take_members(members).unwrap().len(), 1);
        assert!(matches!(
            replies.rank(missing),
            Err(StoreError::MissingReply { slot: 7 })
        ));
    }

    #[test]
    fn test_stream_id_display() {
        let id = StreamId { ms: 1500, seq: 2 };
        assert_eq!(id.to_string(), "1500-2");
        assert!(id < StreamId { ms: 1500, seq: 3 });
        assert!(id < StreamId { ms: 1501, seq: 0 });
    }
}
