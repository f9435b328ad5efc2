//! Transaction id allocation and lookup.
//!
//! Ids are generation-tagged slot indices: `generation << 32 | slot`. A slot
//! is reused only after its transaction is deregistered, and reuse bumps the
//! generation, so an id from before the reuse never matches again. Freed slots
//! are reused in FIFO order. Generation 0 is never issued, which keeps id 0
//! free for uncorrelated messages.

use std::collections::VecDeque;

use npulink_wire::MessageType;

/// Transaction identifier carried in the message header.
pub type TransactionId = u64;

/// Why a lookup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupError {
    /// No live transaction has this id.
    NotFound,
    /// The id is live but belongs to a different message type.
    TypeMismatch { registered: MessageType },
}

/// The registry is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Exhausted;

struct Slot<T> {
    generation: u32,
    entry: Option<(MessageType, T)>,
}

/// Map from live transaction id to pending transaction.
pub struct Registry<T> {
    slots: Vec<Slot<T>>,
    free: VecDeque<u32>,
    live: usize,
    max: usize,
}

impl<T> Registry<T> {
    /// Create a registry allowing at most `max` live transactions.
    pub fn new(max: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: VecDeque::new(),
            live: 0,
            max: max.min(u32::MAX as usize),
        }
    }

    /// Store `value` under a fresh id.
    pub fn register(
        &mut self,
        msg_type: MessageType,
        value: T,
    ) -> Result<TransactionId, Exhausted> {
        if self.live >= self.max {
            return Err(Exhausted);
        }
        let index = match self.free.pop_front() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 1,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        slot.entry = Some((msg_type, value));
        self.live += 1;
        Ok(make_id(slot.generation, index))
    }

    /// Remove and return the transaction registered under `id`.
    ///
    /// Returns `None` for an id that is not live.
    pub fn deregister(&mut self, id: TransactionId) -> Option<T> {
        let (generation, index) = split_id(id);
        let slot = self.slots.get_mut(index as usize)?;
        if slot.generation != generation {
            return None;
        }
        let (_, value) = slot.entry.take()?;
        slot.generation = next_generation(slot.generation);
        self.free.push_back(index);
        self.live -= 1;
        Some(value)
    }

    /// Look up a live transaction, checking that it has `expected` type.
    pub fn find(
        &mut self,
        id: TransactionId,
        expected: MessageType,
    ) -> Result<&mut T, LookupError> {
        let (generation, index) = split_id(id);
        let slot = self
            .slots
            .get_mut(index as usize)
            .filter(|slot| slot.generation == generation)
            .ok_or(LookupError::NotFound)?;
        match slot.entry.as_mut() {
            Some((msg_type, value)) if *msg_type == expected => Ok(value),
            Some((msg_type, _)) => Err(LookupError::TypeMismatch {
                registered: *msg_type,
            }),
            None => Err(LookupError::NotFound),
        }
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: TransactionId) -> bool {
        let (generation, index) = split_id(id);
        self.slots
            .get(index as usize)
            .is_some_and(|slot| slot.generation == generation && slot.entry.is_some())
    }

    /// Visit every live transaction.
    pub fn for_each_mut(&mut self, mut f: impl FnMut(TransactionId, MessageType, &mut T)) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some((msg_type, value)) = slot.entry.as_mut() {
                f(make_id(slot.generation, index as u32), *msg_type, value);
            }
        }
    }

    /// Deregister every live transaction and return them.
    pub fn drain(&mut self) -> Vec<(TransactionId, T)> {
        let mut drained = Vec::with_capacity(self.live);
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if let Some((_, value)) = slot.entry.take() {
                drained.push((make_id(slot.generation, index as u32), value));
                slot.generation = next_generation(slot.generation);
                self.free.push_back(index as u32);
            }
        }
        self.live = 0;
        drained
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

impl<T> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("live", &self.live)
            .field("slots", &self.slots.len())
            .field("max", &self.max)
            .finish()
    }
}

fn make_id(generation: u32, index: u32) -> TransactionId {
    (u64::from(generation) << 32) | u64::from(index)
}

fn split_id(id: TransactionId) -> (u32, u32) {
    ((id >> 32) as u32, id as u32)
}

fn next_generation(generation: u32) -> u32 {
    match generation.wrapping_add(1) {
        0 => 1,
        next => next,
    }
}
