use std::cell::UnsafeCell;

use crate::event::TxEvent;

/// Fixed-capacity event log indexed by `idx mod capacity`.
///
/// The write path takes no lock and performs no allocation. Safety rests on
/// the pipeline's index protocol, not on this type:
///
/// - the ingestor assigns every transaction index exactly once, so two
///   writers never touch the same slot;
/// - a reader only touches indices published to it through a margin channel,
///   and the channel send happens after all appends for those indices, which
///   gives the reader a happens-before edge on the slot contents;
/// - a slot is reclaimed (overwritten after wrap-around) only once every
///   reader's tail has moved past it, which holds as long as
///   `capacity >= longest-horizon blocks x max tx per block`. That bound is
///   an operating precondition, checked by the window runner as ring
///   overrun detection.
pub struct EventRing {
    slots: Box<[UnsafeCell<TxEvent>]>,
}

// Slots are plain data; cross-thread access is serialized by the index
// protocol described above.
unsafe impl Sync for EventRing {}

impl EventRing {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "event ring capacity must be positive");
        EventRing {
            slots: (0..capacity)
                .map(|_| UnsafeCell::new(TxEvent::default()))
                .collect::<Vec<_>>()
                .into_boxed_slice(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Write `ev` at slot `idx mod capacity`. The caller must be the unique
    /// owner of `idx` (the ingestor hands each index to exactly one emit).
    pub fn append(&self, ev: TxEvent, idx: i64) {
        let slot = &self.slots[(idx as u64 as usize) % self.slots.len()];
        unsafe { *slot.get() = ev };
    }

    /// Read slot `idx mod capacity`. The caller must know `idx` is still
    /// inside its live window; the ring does not check.
    pub fn get(&self, idx: i64) -> TxEvent {
        let slot = &self.slots[(idx as u64 as usize) % self.slots.len()];
        unsafe { *slot.get() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_get_and_wrap() {
        let ring = EventRing::new(8);
        for i in 0..8i64 {
            ring.append(
                TxEvent {
                    ts: i,
                    from: i as u64,
                    to: 0,
                    token: 1,
                    amount: i,
                },
                i,
            );
        }
        assert_eq!(ring.get(3).from, 3);

        // idx 8 reclaims slot 0.
        ring.append(
            TxEvent {
                ts: 8,
                from: 8,
                to: 0,
                token: 1,
                amount: 8,
            },
            8,
        );
        assert_eq!(ring.get(8).from, 8);
        assert_eq!(ring.get(0).from, 8);
    }
}
