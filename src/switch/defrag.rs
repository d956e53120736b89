//! Fragment reassembly store.
//!
//! Collects out-of-order fragment sets keyed by packet ID. Bit 0 of the
//! presence mask is the head; bits 1..15 are fragments. An entry whose
//! total is still zero is waiting to learn the count from its first
//! fragment (heads do not carry it).

use std::collections::HashMap;

use crate::packet::{Fragment, MAX_PACKET_FRAGMENTS, PROTO_MAX_PACKET_LENGTH};

use super::decoder::IncomingPacket;

/// One partially reassembled packet.
struct DefragEntry {
    creation_time: i64,
    /// Total fragments including the head; 0 while unknown.
    total_fragments: u8,
    /// Presence bitmask; bit 0 is the head.
    have: u16,
    head: Option<IncomingPacket>,
    /// Fragment payloads, index 1 stored at slot 0.
    frags: Vec<Option<Vec<u8>>>,
}

impl DefragEntry {
    fn new(now: i64) -> Self {
        Self {
            creation_time: now,
            total_fragments: 0,
            have: 0,
            head: None,
            frags: vec![None; (MAX_PACKET_FRAGMENTS - 1) as usize],
        }
    }

    fn complete(&self) -> bool {
        self.total_fragments > 0 && self.have.count_ones() == u32::from(self.total_fragments)
    }

    /// Append fragments 1..N-1 to the head packet, in index order.
    fn assemble(mut self) -> Option<IncomingPacket> {
        let mut head = self.head.take()?;
        for slot in self.frags.iter().take(self.total_fragments as usize - 1) {
            head.packet_mut().append_bytes(slot.as_deref()?);
        }
        if head.packet().len() > PROTO_MAX_PACKET_LENGTH {
            return None;
        }
        Some(head)
    }
}

/// Reassembly store for all in-flight fragmented packets.
#[derive(Default)]
pub struct DefragQueue {
    entries: HashMap<u64, DefragEntry>,
}

impl DefragQueue {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of partially reassembled packets.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record the head of a fragmented packet.
    ///
    /// Returns the fully assembled packet when this head completed the set.
    /// Duplicate heads are ignored.
    pub fn insert_head(&mut self, head: IncomingPacket, now: i64) -> Option<IncomingPacket> {
        let pid = head.packet().packet_id();
        let entry = self
            .entries
            .entry(pid)
            .or_insert_with(|| DefragEntry::new(now));
        if entry.have & 1 != 0 {
            return None; // duplicate head
        }
        entry.have |= 1;
        entry.head = Some(head);
        if entry.complete() {
            return self.entries.remove(&pid).and_then(DefragEntry::assemble);
        }
        None
    }

    /// Record one fragment.
    ///
    /// Returns the fully assembled packet when this fragment completed the
    /// set. Fragments with nonsensical numbering and duplicates are ignored;
    /// the caller has already validated the sentinel and length floor.
    pub fn insert_fragment(&mut self, fragment: &Fragment, now: i64) -> Option<IncomingPacket> {
        let index = fragment.fragment_number();
        let total = fragment.total_fragments();
        if index == 0 || index >= MAX_PACKET_FRAGMENTS || total < 2 || total > MAX_PACKET_FRAGMENTS
        {
            return None;
        }

        let pid = fragment.packet_id();
        let entry = self
            .entries
            .entry(pid)
            .or_insert_with(|| DefragEntry::new(now));
        let bit = 1u16 << index;
        if entry.have & bit != 0 {
            return None; // duplicate fragment
        }
        entry.have |= bit;
        entry.total_fragments = total;
        entry.frags[(index - 1) as usize] = Some(fragment.payload().to_vec());

        if entry.complete() {
            return self.entries.remove(&pid).and_then(DefragEntry::assemble);
        }
        None
    }

    /// Drop entries older than `timeout`, returning the earliest remaining
    /// deadline (ms from `now`) if any entries survive.
    pub fn expire(&mut self, now: i64, timeout: i64) -> Option<i64> {
        self.entries
            .retain(|_, entry| now - entry.creation_time <= timeout);
        self.entries
            .values()
            .map(|e| (e.creation_time + timeout - now).max(0))
            .min()
    }
}
