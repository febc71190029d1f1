//! Index-linked event storage.
//!
//! Every event lives in one slot of a `Vec` and is threaded onto exactly one
//! singly-linked list through its `next` index. Moving an event between sets
//! is a relink, never a copy or an allocation.

use super::{CompletionCallback, EventId};
use crate::AudioBuffer;

pub(crate) type SlotIndex = u32;

/// Which list a slot is linked into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Set {
    Waiting = 0,
    Playing = 1,
    /// Retired, buffer not yet released.
    Retired = 2,
    /// Swept and ready to be revived.
    Free = 3,
    /// Preallocated, never held an event.
    Vacant = 4,
}

const SET_COUNT: usize = 5;

pub(crate) struct Event {
    pub id: EventId,
    pub buffer: Option<AudioBuffer>,
    /// Frames played so far.
    pub position: usize,
    pub onset: u64,
    pub callback: Option<CompletionCallback>,
    pub callback_tick: u64,
    pub fired: bool,
    pub set: Set,
    pub next: Option<SlotIndex>,
}

impl Event {
    fn vacant() -> Self {
        Self {
            id: 0,
            buffer: None,
            position: 0,
            onset: 0,
            callback: None,
            callback_tick: 0,
            fired: false,
            set: Set::Vacant,
            next: None,
        }
    }

    /// Frames in the owned buffer, zero once released.
    #[inline]
    pub fn frames(&self) -> usize {
        self.buffer.as_ref().map_or(0, AudioBuffer::frames)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct List {
    head: Option<SlotIndex>,
    tail: Option<SlotIndex>,
    len: usize,
}

pub(crate) struct EventArena {
    events: Vec<Event>,
    lists: [List; SET_COUNT],
}

impl EventArena {
    pub fn with_capacity(capacity: usize) -> Self {
        let mut arena = Self {
            events: Vec::with_capacity(capacity),
            lists: [List::default(); SET_COUNT],
        };
        for _ in 0..capacity {
            let index = arena.events.len() as SlotIndex;
            arena.events.push(Event::vacant());
            arena.push_back(Set::Vacant, index);
        }
        arena
    }

    #[inline]
    pub fn get(&self, index: SlotIndex) -> &Event {
        &self.events[index as usize]
    }

    #[inline]
    pub fn get_mut(&mut self, index: SlotIndex) -> &mut Event {
        &mut self.events[index as usize]
    }

    #[inline]
    pub fn head(&self, set: Set) -> Option<SlotIndex> {
        self.lists[set as usize].head
    }

    #[inline]
    pub fn len(&self, set: Set) -> usize {
        self.lists[set as usize].len
    }

    pub fn slot_count(&self) -> usize {
        self.events.len()
    }

    /// Take a swept slot, then a never-used one, growing the arena only when
    /// neither is left.
    pub fn acquire(&mut self) -> SlotIndex {
        if let Some(index) = self.pop_front(Set::Free) {
            return index;
        }
        if let Some(index) = self.pop_front(Set::Vacant) {
            return index;
        }
        let index = self.events.len() as SlotIndex;
        self.events.push(Event::vacant());
        index
    }

    pub fn push_back(&mut self, set: Set, index: SlotIndex) {
        {
            let event = self.get_mut(index);
            event.set = set;
            event.next = None;
        }
        let list = self.lists[set as usize];
        match list.tail {
            Some(tail) => self.get_mut(tail).next = Some(index),
            None => self.lists[set as usize].head = Some(index),
        }
        let list = &mut self.lists[set as usize];
        list.tail = Some(index);
        list.len += 1;
    }

    pub fn pop_front(&mut self, set: Set) -> Option<SlotIndex> {
        let head = self.lists[set as usize].head?;
        let next = self.get_mut(head).next.take();
        let list = &mut self.lists[set as usize];
        list.head = next;
        if next.is_none() {
            list.tail = None;
        }
        list.len -= 1;
        Some(head)
    }

    /// Unlink every event in `from` matching `predicate` and append it to `to`,
    /// preserving relative order in both lists.
    pub fn move_where(&mut self, from: Set, to: Set, mut predicate: impl FnMut(&Event) -> bool) {
        let mut prev: Option<SlotIndex> = None;
        let mut cursor = self.head(from);

        while let Some(index) = cursor {
            let next = self.get(index).next;
            if predicate(self.get(index)) {
                match prev {
                    Some(p) => self.get_mut(p).next = next,
                    None => self.lists[from as usize].head = next,
                }
                let list = &mut self.lists[from as usize];
                if list.tail == Some(index) {
                    list.tail = prev;
                }
                list.len -= 1;
                self.push_back(to, index);
            } else {
                prev = Some(index);
            }
            cursor = next;
        }
    }

    /// Slot indices of one list, head first. Allocates; diagnostics only.
    pub fn indices(&self, set: Set) -> Vec<SlotIndex> {
        let mut out = Vec::with_capacity(self.len(set));
        let mut cursor = self.head(set);
        while let Some(index) = cursor {
            out.push(index);
            cursor = self.get(index).next;
        }
        out
    }
}
