//! Parameter change back-channel.
//!
//! The plugin GUI edits parameters on its own thread through the
//! component-handler callbacks; the dispatch thread drains them when the
//! client polls `GetParamChanges`. The two meet in [`ParamRing`], the only
//! shared mutable state in the host.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tracing::trace;
use vst3::Steinberg::Vst::{IComponentHandler, IComponentHandlerTrait, ParamID, ParamValue};
use vst3::Steinberg::{int32, kResultOk, tresult};
use vst3::Class;

use vstbridge_protocol::ParamChange;

/// Ring slot count. One slot is always kept empty to distinguish full from
/// empty, so at most `RING_SLOTS - 1` edits are buffered.
pub const RING_SLOTS: usize = 256;

/// Bounded single-producer single-consumer ring of GUI parameter edits.
///
/// The GUI thread is the only writer of `write` and the only reader of
/// slots it has not yet published; the dispatch thread is the only writer
/// of `read`. A full ring refuses the push, dropping the newest edit and
/// preserving the order of everything already buffered.
pub struct ParamRing {
    slots: Box<[UnsafeCell<ParamChange>]>,
    write: AtomicUsize,
    read: AtomicUsize,
}

// SAFETY: each index has a single writer, and a slot is only written while
// unpublished (producer side) or read after publication (consumer side);
// the release/acquire pairs on the indices order the slot accesses.
unsafe impl Send for ParamRing {}
unsafe impl Sync for ParamRing {}

impl ParamRing {
    pub fn new() -> Self {
        let slots = (0..RING_SLOTS)
            .map(|_| {
                UnsafeCell::new(ParamChange {
                    param_id: 0,
                    value: 0.0,
                })
            })
            .collect();
        Self {
            slots,
            write: AtomicUsize::new(0),
            read: AtomicUsize::new(0),
        }
    }

    /// Producer side. Returns `false` when the ring is full; the edit is
    /// then dropped.
    pub fn push(&self, change: ParamChange) -> bool {
        let write = self.write.load(Ordering::Relaxed);
        let next = (write + 1) % RING_SLOTS;
        if next == self.read.load(Ordering::Acquire) {
            return false;
        }
        unsafe {
            *self.slots[write].get() = change;
        }
        self.write.store(next, Ordering::Release);
        true
    }

    /// Consumer side. Drains at most the producer-consumer distance observed
    /// at entry, so edits arriving mid-drain wait for the next poll.
    pub fn drain(&self, out: &mut Vec<ParamChange>) {
        let write = self.write.load(Ordering::Acquire);
        let mut read = self.read.load(Ordering::Relaxed);
        while read != write {
            out.push(unsafe { *self.slots[read].get() });
            read = (read + 1) % RING_SLOTS;
            self.read.store(read, Ordering::Release);
        }
    }

    /// Buffered edit count, as seen by the consumer.
    pub fn len(&self) -> usize {
        let write = self.write.load(Ordering::Acquire);
        let read = self.read.load(Ordering::Relaxed);
        (write + RING_SLOTS - read) % RING_SLOTS
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ParamRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Host-implemented component handler registered on the edit controller.
///
/// Only `performEdit` touches the ring; begin/end markers and restart
/// requests are acknowledged and otherwise ignored.
pub struct EditHandler {
    ring: Arc<ParamRing>,
}

impl EditHandler {
    pub fn new(ring: Arc<ParamRing>) -> Self {
        Self { ring }
    }
}

impl Class for EditHandler {
    type Interfaces = (IComponentHandler,);
}

impl IComponentHandlerTrait for EditHandler {
    unsafe fn beginEdit(&self, _id: ParamID) -> tresult {
        kResultOk
    }

    unsafe fn performEdit(&self, id: ParamID, value_normalized: ParamValue) -> tresult {
        if !self.ring.push(ParamChange {
            param_id: id,
            value: value_normalized,
        }) {
            trace!(param = id, "edit ring full, dropping newest edit");
        }
        kResultOk
    }

    unsafe fn endEdit(&self, _id: ParamID) -> tresult {
        kResultOk
    }

    unsafe fn restartComponent(&self, flags: int32) -> tresult {
        trace!(flags, "plugin requested component restart (ignored)");
        kResultOk
    }
}

/// Narrows a UTF-16 string slot to 8-bit text by casting each code unit.
/// Non-ASCII titles lose their upper byte; acceptable for the wire's
/// engineer-facing display slots.
pub fn narrow_utf16(units: &[u16]) -> String {
    units
        .iter()
        .take_while(|&&u| u != 0)
        .map(|&u| (u as u8) as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn change(id: u32) -> ParamChange {
        ParamChange {
            param_id: id,
            value: id as f64 / 1000.0,
        }
    }

    #[test]
    fn drains_in_fifo_order() {
        let ring = ParamRing::new();
        for id in 0..10 {
            assert!(ring.push(change(id)));
        }
        let mut out = Vec::new();
        ring.drain(&mut out);
        assert_eq!(out.len(), 10);
        for (i, c) in out.iter().enumerate() {
            assert_eq!(c.param_id, i as u32);
        }
        assert!(ring.is_empty());
    }

    #[test]
    fn overflow_keeps_the_oldest_255_in_order() {
        let ring = ParamRing::new();
        let mut accepted = 0;
        for id in 0..300 {
            if ring.push(change(id)) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, RING_SLOTS - 1);
        assert_eq!(ring.len(), RING_SLOTS - 1);

        let mut out = Vec::new();
        ring.drain(&mut out);
        assert_eq!(out.len(), RING_SLOTS - 1);
        for (i, c) in out.iter().enumerate() {
            assert_eq!(c.param_id, i as u32, "oldest edits survive, in order");
        }
    }

    #[test]
    fn ring_recovers_after_drain() {
        let ring = ParamRing::new();
        for id in 0..400 {
            ring.push(change(id));
        }
        let mut out = Vec::new();
        ring.drain(&mut out);

        assert!(ring.push(change(999)));
        out.clear();
        ring.drain(&mut out);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].param_id, 999);
    }

    #[test]
    fn concurrent_producer_consumer_preserves_order() {
        let ring = Arc::new(ParamRing::new());
        let producer_ring = Arc::clone(&ring);

        let producer = thread::spawn(move || {
            let mut sent = 0u32;
            for id in 0..10_000u32 {
                while !producer_ring.push(change(id)) {
                    thread::yield_now();
                }
                sent += 1;
            }
            sent
        });

        let mut seen = Vec::new();
        while seen.len() < 10_000 {
            ring.drain(&mut seen);
            thread::yield_now();
        }
        let sent = producer.join().unwrap();

        assert_eq!(sent, 10_000);
        for (i, c) in seen.iter().enumerate() {
            assert_eq!(c.param_id, i as u32);
        }
    }

    #[test]
    fn narrowing_is_per_code_unit() {
        let wide: Vec<u16> = "Gain".encode_utf16().chain([0]).collect();
        assert_eq!(narrow_utf16(&wide), "Gain");

        // U+00E9 narrows to 0xE9, U+4E16 to 0x16.
        let lossy = [0x00E9u16, 0x4E16, 0];
        let narrowed = narrow_utf16(&lossy);
        let bytes: Vec<u8> = narrowed.chars().map(|c| c as u8).collect();
        assert_eq!(bytes, [0xE9, 0x16]);
    }
}
