//! The iterator resource cache.
//!
//! A content-addressed, LRU-evicted store of expensive intermediate values
//! (iterator positions, compiled sub-plans), addressed from outside by an
//! opaque printable "ticket" that survives across requests.
//!
//! Cyclic bookkeeping (storable ↔ ticket ↔ LRU list ↔ hash chain) is built
//! as an arena of slots addressed by index, rather than
//! with raw pointers or `Rc` cycles.

use std::any::Any;
use std::rc::Rc;

mod stamp;
pub use stamp::{DeterministicStampSource, StampSource, SystemStampSource};

/// A value that can live in the cache. Implementors provide their own
/// notion of content hash and equality (Equality and hash are
/// type-defined), and their accounted size.
pub trait StorableValue: Any {
    fn resource_size(&self) -> usize;
    fn content_hash(&self) -> u64;
    fn content_eq(&self, other: &dyn StorableValue) -> bool;
    fn type_tag(&self) -> &'static str;
    fn as_any(&self) -> &dyn Any;
}

/// A reference-counted handle to a cached value. Cloning this is exactly
/// the "additional reference" `lookup`/`thaw` hand out: the
/// value stays alive as long as any clone does, independent of whether the
/// cache itself has since evicted its own bookkeeping entry.
pub type StorableRef = Rc<dyn StorableValue>;

/// Sentinel ticket returned when a candidate alone exceeds `max / 2`
/// and can never be admitted.
pub const REJECTED_TICKET: &str = "x";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("allocation failure while storing a {0} byte record")]
    OutOfMemory(usize),
}

struct Slot {
    storable: StorableRef,
    hash: u64,
    ticket: String,
    /// `sizeof(record)` approximation plus `storable.size`, accounted once
    /// on insertion and subtracted unchanged on flush.
    accounted_size: usize,
    used: bool,
    lru_prev: Option<usize>,
    lru_next: Option<usize>,
}

const RECORD_OVERHEAD: usize = std::mem::size_of::<u64>() * 4;

/// The storable cache. `max_bytes` bounds the sum of accounted sizes of
/// records currently indexed; eviction restores the
/// sum to at most `max_bytes / 2`.
pub struct Cache<S: StampSource = SystemStampSource> {
    max_bytes: usize,
    total: usize,
    slots: Vec<Option<Slot>>,
    free_slots: Vec<usize>,
    hash_index: fxhash::FxHashMap<u64, Vec<usize>>,
    ticket_index: fxhash::FxHashMap<String, usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    stamp_source: S,
    stamp_counter: u32,
}

impl Cache<SystemStampSource> {
    pub fn new(max_bytes: usize) -> Self {
        Self::with_stamp_source(max_bytes, SystemStampSource::default())
    }
}

impl<S: StampSource> Cache<S> {
    pub fn with_stamp_source(max_bytes: usize, stamp_source: S) -> Self {
        Self {
            max_bytes,
            total: 0,
            slots: Vec::new(),
            free_slots: Vec::new(),
            hash_index: Default::default(),
            ticket_index: Default::default(),
            lru_head: None,
            lru_tail: None,
            stamp_source,
            stamp_counter: 0,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total
    }

    fn mint_ticket(&mut self) -> String {
        let ticket = stamp::format_ticket(
            self.stamp_source.process_id(),
            self.stamp_source.clock_ms(),
            self.stamp_counter,
        );
        self.stamp_counter = self.stamp_counter.wrapping_add(1);
        ticket
    }

    /// Stores `value`, returning the ticket that names it. If an equal
    /// record already exists (by `content_hash` + `content_eq`), returns its
    /// existing ticket instead of storing a duplicate, and touches that
    /// record to the LRU tail.
    pub fn store(&mut self, value: impl StorableValue + 'static) -> Result<String, Error> {
        let hash = value.content_hash();
        let size = value.resource_size();
        let accounted = RECORD_OVERHEAD + size;

        if let Some(chain) = self.hash_index.get(&hash) {
            for &idx in chain {
                let matches = self.slots[idx]
                    .as_ref()
                    .expect("chain entries are live slots")
                    .storable
                    .content_eq(&value);
                if matches {
                    let ticket = self.slots[idx].as_ref().unwrap().ticket.clone();
                    self.touch_to_tail(idx);
                    tracing::debug!(ticket = %ticket, "cache hit on store");
                    return Ok(ticket);
                }
            }
        }

        if accounted > self.max_bytes / 2 {
            tracing::info!(size = accounted, max = self.max_bytes, "rejecting oversized storable");
            return Ok(REJECTED_TICKET.to_string());
        }

        let ticket = self.mint_ticket();
        let idx = self.alloc_slot(Slot {
            storable: Rc::new(value),
            hash,
            ticket: ticket.clone(),
            accounted_size: accounted,
            used: false,
            lru_prev: None,
            lru_next: None,
        });
        self.hash_index.entry(hash).or_default().push(idx);
        self.ticket_index.insert(ticket.clone(), idx);
        self.push_tail(idx);
        self.total += accounted;

        tracing::info!(ticket = %ticket, size = accounted, total = self.total, "stored");
        self.evict_to_fit();
        Ok(ticket)
    }

    /// Looks up a ticket, returning an additional reference to the storable
    /// if the ticket is live. The first byte of `ticket` must
    /// be ASCII alphanumeric; anything else is treated as a miss, never an
    /// error — cursors must be robust to misses.
    pub fn lookup(&mut self, ticket: &str) -> Option<StorableRef> {
        if !ticket.as_bytes().first().is_some_and(u8::is_ascii_alphanumeric) {
            return None;
        }
        let idx = *self.ticket_index.get(ticket)?;
        let slot = self.slots[idx].as_mut().expect("ticket_index entries are live slots");
        slot.used = true;
        Some(slot.storable.clone())
    }

    /// Consumes a ticket lexeme (hex digits, or the sentinel `x`) from the
    /// front of `input`, looks it up, checks `expected_type` if given, and
    /// returns the storable plus the unconsumed remainder of `input`
    ///.
    pub fn thaw<'a>(
        &mut self,
        input: &'a str,
        expected_type: Option<&'static str>,
    ) -> Option<(StorableRef, &'a str)> {
        let lexeme_len = input
            .bytes()
            .take_while(|b| b.is_ascii_hexdigit() || *b == b'x')
            .count();
        if lexeme_len == 0 {
            return None;
        }
        let (lexeme, rest) = input.split_at(lexeme_len);
        let storable = self.lookup(lexeme)?;
        if let Some(expected) = expected_type {
            if storable.type_tag() != expected {
                return None;
            }
        }
        Some((storable, rest))
    }

    /// Removes the ticket's record from the cache's own bookkeeping. Any
    /// `StorableRef` clones held elsewhere keep the value alive via `Rc`
    /// even after the ticket itself is gone.
    pub fn flush(&mut self, ticket: &str) -> bool {
        let Some(idx) = self.ticket_index.remove(ticket) else {
            return false;
        };
        self.remove_from_lru(idx);

        let slot = self.slots[idx].take().expect("ticket pointed at a live slot");
        if let Some(chain) = self.hash_index.get_mut(&slot.hash) {
            chain.retain(|&i| i != idx);
            if chain.is_empty() {
                self.hash_index.remove(&slot.hash);
            }
        }
        self.total -= slot.accounted_size;
        self.free_slots.push(idx);
        tracing::info!(ticket, total = self.total, "flushed");
        true
    }

    fn alloc_slot(&mut self, slot: Slot) -> usize {
        if let Some(idx) = self.free_slots.pop() {
            self.slots[idx] = Some(slot);
            idx
        } else {
            self.slots.push(Some(slot));
            self.slots.len() - 1
        }
    }

    fn push_tail(&mut self, idx: usize) {
        if let Some(tail) = self.lru_tail {
            self.slots[tail].as_mut().unwrap().lru_next = Some(idx);
        } else {
            self.lru_head = Some(idx);
        }
        self.slots[idx].as_mut().unwrap().lru_prev = self.lru_tail;
        self.slots[idx].as_mut().unwrap().lru_next = None;
        self.lru_tail = Some(idx);
    }

    fn remove_from_lru(&mut self, idx: usize) {
        let (prev, next) = {
            let slot = self.slots[idx].as_ref().unwrap();
            (slot.lru_prev, slot.lru_next)
        };
        match prev {
            Some(p) => self.slots[p].as_mut().unwrap().lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.slots[n].as_mut().unwrap().lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    fn touch_to_tail(&mut self, idx: usize) {
        if self.lru_tail == Some(idx) {
            return;
        }
        self.remove_from_lru(idx);
        self.push_tail(idx);
    }

    /// Evicts from the LRU head while `total > max_bytes`, stopping once
    /// `total <= max_bytes / 2`.
    fn evict_to_fit(&mut self) {
        if self.total <= self.max_bytes {
            return;
        }
        while self.total > self.max_bytes / 2 {
            let Some(head) = self.lru_head else { break };
            let ticket = self.slots[head].as_ref().unwrap().ticket.clone();
            tracing::info!(ticket = %ticket, "evicting from LRU head");
            self.flush(&ticket);
        }
    }
}
