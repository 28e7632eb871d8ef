//! Elephant Flow Sketch
//!
//! Fixed-memory majority-vote sketch over transport 4-tuples. Each of the
//! `K` slots holds at most one candidate flow; packets hashing to an occupied
//! slot either reinforce the candidate (`yes`) or vote against it (`no`).
//! A candidate is evicted once `no >= λ * yes`.
//!
//! Memory never grows and recording never fails.

use ofs_common::FourTuple;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Number of slots (K)
pub const SKETCH_CAPACITY: usize = 10;

/// Hash modulus (M)
pub const SKETCH_MODULUS: u32 = 10;

/// Eviction ratio (λ)
pub const EVICTION_RATIO: u32 = 8;

// Hash values must index the slot array
const _: () = assert!(SKETCH_CAPACITY == SKETCH_MODULUS as usize);

/// One sketch slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElephantCandidate {
    /// Slot holds a flow
    pub occupied: bool,
    /// Flow in the slot
    pub tuple: FourTuple,
    /// Packets matching the candidate
    pub yes: u32,
    /// Packets contending for the slot
    pub no: u32,
}

/// Effect of recording one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Empty slot taken by this flow
    Claimed,
    /// Same flow seen again
    Reinforced,
    /// Another flow voted against the occupant
    Contended,
    /// Occupant lost the vote and the slot was cleared
    Evicted,
}

/// Serialisable view for external collectors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SketchSnapshot {
    /// Slots in the sketch
    pub capacity: usize,
    /// Contenders needed to evict
    pub eviction_ratio: u32,
    /// Slot contents
    pub candidates: Vec<ElephantCandidate>,
}

impl SketchSnapshot {
    /// JSON encoding
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Occupied slots only
    pub fn elephants(&self) -> impl Iterator<Item = &ElephantCandidate> {
        self.candidates.iter().filter(|c| c.occupied)
    }
}

/// Elephant flow sketch
pub struct ElephantSketch {
    slots: [Mutex<ElephantCandidate>; SKETCH_CAPACITY],
}

impl Default for ElephantSketch {
    fn default() -> Self {
        Self::new()
    }
}

impl ElephantSketch {
    /// Empty sketch
    pub fn new() -> Self {
        Self {
            slots: std::array::from_fn(|_| Mutex::new(ElephantCandidate::default())),
        }
    }

    /// Slot index of a tuple
    #[inline(always)]
    pub fn hash(ft: &FourTuple) -> usize {
        let m = SKETCH_MODULUS;
        let sum = ft.ip_src % m + ft.ip_dst % m + (ft.tcp_src as u32) % m + (ft.tcp_dst as u32) % m;
        (sum % m) as usize
    }

    /// Feed one packet's tuple
    pub fn record(&self, ft: &FourTuple) -> RecordOutcome {
        let mut slot = self.slots[Self::hash(ft)].lock();

        if !slot.occupied {
            *slot = ElephantCandidate {
                occupied: true,
                tuple: *ft,
                yes: 1,
                no: 0,
            };
            return RecordOutcome::Claimed;
        }

        if slot.tuple == *ft {
            slot.yes = slot.yes.saturating_add(1);
            return RecordOutcome::Reinforced;
        }

        slot.no = slot.no.saturating_add(1);
        if slot.no >= slot.yes.saturating_mul(EVICTION_RATIO) {
            Self::clear_node(&mut slot);
            return RecordOutcome::Evicted;
        }
        RecordOutcome::Contended
    }

    /// Reset one slot, ignoring out-of-range indices
    pub fn clear_slot(&self, index: usize) {
        if let Some(slot) = self.slots.get(index) {
            Self::clear_node(&mut slot.lock());
        }
    }

    /// Reset a candidate to the unoccupied state
    pub fn clear_node(candidate: &mut ElephantCandidate) {
        *candidate = ElephantCandidate::default();
    }

    /// Reset every candidate in `array`
    pub fn initialize_array(array: &mut [ElephantCandidate]) {
        array.iter_mut().for_each(Self::clear_node);
    }

    /// Reset the whole sketch
    pub fn reset(&self) {
        for slot in &self.slots {
            Self::clear_node(&mut slot.lock());
        }
    }

    /// Copy of every slot
    pub fn elephant_array(&self) -> [ElephantCandidate; SKETCH_CAPACITY] {
        std::array::from_fn(|i| *self.slots[i].lock())
    }

    /// Serialisable copy of the sketch
    pub fn snapshot(&self) -> SketchSnapshot {
        SketchSnapshot {
            capacity: SKETCH_CAPACITY,
            eviction_ratio: EVICTION_RATIO,
            candidates: self.elephant_array().to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn ft(ip_src: u32, ip_dst: u32, tcp_src: u16, tcp_dst: u16) -> FourTuple {
        FourTuple::new(ip_src, ip_dst, tcp_src, tcp_dst)
    }

    #[test]
    fn test_hash_examples() {
        assert_eq!(ElephantSketch::hash(&ft(1, 2, 3, 4)), 0);
        assert_eq!(ElephantSketch::hash(&ft(11, 12, 13, 14)), 0);
        assert_eq!(ElephantSketch::hash(&ft(5, 0, 0, 0)), 5);
        assert_eq!(ElephantSketch::hash(&ft(u32::MAX, u32::MAX, u16::MAX, u16::MAX)), 0);

        let sketch = ElephantSketch::new();
        let flow = ft(12, 3, 20, 5);
        assert_eq!(ElephantSketch::hash(&flow), 0);
        assert_eq!(sketch.record(&flow), RecordOutcome::Claimed);
        let slot = sketch.elephant_array()[0];
        assert!(slot.occupied);
        assert_eq!(slot.tuple, flow);
        assert_eq!((slot.yes, slot.no), (1, 0));
    }

    #[test]
    fn test_claim_and_reinforce() {
        let sketch = ElephantSketch::new();
        let a = ft(1, 2, 3, 4);

        assert_eq!(sketch.record(&a), RecordOutcome::Claimed);
        assert_eq!(sketch.record(&a), RecordOutcome::Reinforced);
        assert_eq!(sketch.record(&a), RecordOutcome::Reinforced);

        let slot = sketch.elephant_array()[0];
        assert!(slot.occupied);
        assert_eq!(slot.tuple, a);
        assert_eq!((slot.yes, slot.no), (3, 0));
    }

    #[test]
    fn test_eviction_after_lambda_contenders() {
        let sketch = ElephantSketch::new();
        let a = ft(1, 2, 3, 4);
        let b = ft(11, 12, 13, 14);
        sketch.record(&a);

        for _ in 0..(EVICTION_RATIO - 1) {
            assert_eq!(sketch.record(&b), RecordOutcome::Contended);
        }
        assert_eq!(sketch.elephant_array()[0].no, EVICTION_RATIO - 1);
        assert_eq!(sketch.record(&b), RecordOutcome::Evicted);
        assert_eq!(sketch.elephant_array()[0], ElephantCandidate::default());

        // Next packet of either flow claims the empty slot
        assert_eq!(sketch.record(&b), RecordOutcome::Claimed);
        assert_eq!(sketch.elephant_array()[0].tuple, b);
    }

    #[test]
    fn test_reinforcement_delays_eviction() {
        let sketch = ElephantSketch::new();
        let a = ft(1, 2, 3, 4);
        let b = ft(11, 12, 13, 14);
        sketch.record(&a);
        sketch.record(&a);

        for _ in 0..(2 * EVICTION_RATIO - 1) {
            assert_eq!(sketch.record(&b), RecordOutcome::Contended);
        }
        assert_eq!(sketch.record(&b), RecordOutcome::Evicted);
    }

    #[test]
    fn test_clearing() {
        let sketch = ElephantSketch::new();
        sketch.record(&ft(1, 0, 0, 0));
        sketch.record(&ft(2, 0, 0, 0));

        sketch.clear_slot(1);
        sketch.clear_slot(SKETCH_CAPACITY);
        assert!(!sketch.elephant_array()[1].occupied);
        assert!(sketch.elephant_array()[2].occupied);

        sketch.reset();
        assert!(sketch.elephant_array().iter().all(|c| !c.occupied));

        let mut array = [ElephantCandidate {
            occupied: true,
            tuple: ft(1, 1, 1, 1),
            yes: 4,
            no: 2,
        }; 3];
        ElephantSketch::initialize_array(&mut array);
        assert!(array.iter().all(|c| *c == ElephantCandidate::default()));
    }

    #[test]
    fn test_snapshot_json() {
        let sketch = ElephantSketch::new();
        sketch.record(&ft(0x0A000001, 0x0A000002, 1000, 80));

        let snap = sketch.snapshot();
        assert_eq!(snap.candidates.len(), SKETCH_CAPACITY);
        assert_eq!(snap.elephants().count(), 1);

        let json = snap.to_json().unwrap();
        let back: SketchSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn test_concurrent_records_are_counted() {
        let sketch = Arc::new(ElephantSketch::new());
        let a = ft(1, 2, 3, 4);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let sketch = Arc::clone(&sketch);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        sketch.record(&a);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(sketch.elephant_array()[0].yes, 4000);
    }

    proptest! {
        #[test]
        fn prop_hash_in_range(src: u32, dst: u32, sport: u16, dport: u16) {
            prop_assert!(ElephantSketch::hash(&ft(src, dst, sport, dport)) < SKETCH_CAPACITY);
        }

        #[test]
        fn prop_hash_symmetric(src: u32, dst: u32, sport: u16, dport: u16) {
            let t = ft(src, dst, sport, dport);
            prop_assert_eq!(ElephantSketch::hash(&t), ElephantSketch::hash(&t.reverse()));
        }

        #[test]
        fn prop_slot_invariants(flows in prop::collection::vec((0u32..40, 0u16..4), 1..200)) {
            let sketch = ElephantSketch::new();
            for (src, port) in flows {
                sketch.record(&ft(src, 7, port, 80));
                for c in sketch.elephant_array() {
                    if c.occupied {
                        prop_assert!(c.yes >= 1);
                        prop_assert!(c.no < c.yes * EVICTION_RATIO);
                    } else {
                        prop_assert_eq!(c, ElephantCandidate::default());
                    }
                }
            }
        }
    }
}
