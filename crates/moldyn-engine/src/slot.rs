//! Slot machine: the per-node derivative tape behind reverse-mode autodiff.
//!
//! Every coordinate-producing node owns a `SlotMachine`. When a downstream
//! consumer registers a dependency on one of the node's elements, the
//! machine hands back a *slot*: an exclusive block of the accumulator where
//! that consumer will deposit per-output-unit sensitivities during the
//! reverse pass. The tape of `DerivRecord`s then lets the owner gather all
//! deposits back onto its own sensitivity buffer, one atom at a time.

use crate::error::{EngineError, Result};
use moldyn_math::VecArray;

/// Marker for unused entries in fixed-capacity slot lists.
pub const SLOT_SENTINEL: u16 = u16::MAX;

/// A registered dependency as seen by the consumer: which upstream element
/// it reads (`index`) and where it deposits sensitivities (`slot`).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CoordPair {
    /// Element index in the upstream node's output.
    pub index: u32,
    /// Slot-unit offset assigned by the upstream machine.
    pub slot: u32,
}

impl CoordPair {
    /// A pair that has not been through `add_request` yet.
    pub fn new(index: u32) -> Self {
        Self {
            index,
            slot: u32::MAX,
        }
    }
}

/// One tape row per dependency registration.
#[derive(Clone, Copy, Debug)]
pub struct DerivRecord {
    /// Element of the owner this registration depends on.
    pub atom: u32,
    /// Base slot-unit offset of the deposit block.
    pub loc: u32,
    /// Number of slot units in the block (the consumer's output width).
    pub output_width: u32,
}

/// Fixed-capacity record of the slots a consumer term was assigned by up to
/// two input coordinate nodes. Unused entries hold `SLOT_SENTINEL`.
#[derive(Clone, Copy, Debug)]
pub struct AutoDiffParams {
    pub n_slots1: u8,
    pub n_slots2: u8,
    pub slots1: [u16; 6],
    pub slots2: [u16; 5],
}

impl AutoDiffParams {
    /// Build from the slots assigned by the first and second input node.
    pub fn new(slots1: &[u16], slots2: &[u16]) -> Self {
        let mut s1 = [SLOT_SENTINEL; 6];
        let mut s2 = [SLOT_SENTINEL; 5];
        s1[..slots1.len()].copy_from_slice(slots1);
        s2[..slots2.len()].copy_from_slice(slots2);
        Self {
            n_slots1: slots1.len() as u8,
            n_slots2: slots2.len() as u8,
            slots1: s1,
            slots2: s2,
        }
    }

    /// Build from registered pairs (first input only).
    pub fn from_pairs(pairs: &[CoordPair]) -> Self {
        let mut s1 = [0u16; 6];
        for (i, p) in pairs.iter().enumerate() {
            s1[i] = p.slot as u16;
        }
        Self::new(&s1[..pairs.len()], &[])
    }

    /// Slots assigned by the first input, sentinel entries excluded.
    pub fn slots1(&self) -> &[u16] {
        &self.slots1[..self.n_slots1 as usize]
    }

    /// Slots assigned by the second input, sentinel entries excluded.
    pub fn slots2(&self) -> &[u16] {
        &self.slots2[..self.n_slots2 as usize]
    }
}

/// Derivative tape and accumulator owned by one coordinate node.
///
/// The accumulator is a dense column store: slot unit `s` occupies
/// `accum[s*width .. (s+1)*width]`, one float per dimension of the owner.
pub struct SlotMachine {
    width: usize,
    offset: u32,
    tape: Vec<DerivRecord>,
    accum: Vec<f32>,
}

impl SlotMachine {
    /// A machine for a node of element width `width`.
    pub fn new(width: usize) -> Self {
        Self {
            width,
            offset: 0,
            tape: Vec::new(),
            accum: Vec::new(),
        }
    }

    /// Element width of the owning node.
    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    /// Total slot units allocated so far.
    #[inline]
    pub fn n_slot(&self) -> usize {
        self.offset as usize
    }

    /// The recorded tape, in registration order.
    pub fn tape(&self) -> &[DerivRecord] {
        &self.tape
    }

    /// Register a dependency on element `pair.index`. Assigns `pair.slot`
    /// sequentially and grows the accumulator by `output_width * width`
    /// zeroed floats.
    pub fn add_request(&mut self, output_width: usize, pair: &mut CoordPair) {
        let loc = self.offset;
        self.tape.push(DerivRecord {
            atom: pair.index,
            loc,
            output_width: output_width as u32,
        });
        self.offset += output_width as u32;
        self.accum.resize(self.offset as usize * self.width, 0.0);
        pair.slot = loc;
    }

    /// The raw accumulator for the reverse pass.
    pub fn accum_array(&self) -> &[f32] {
        &self.accum
    }

    /// Zero every deposit block.
    pub fn zero_accum(&mut self) {
        self.accum.fill(0.0);
    }

    /// The deposit column for one slot unit.
    #[inline]
    pub fn slot(&self, unit: u32) -> &[f32] {
        let base = unit as usize * self.width;
        &self.accum[base..base + self.width]
    }

    /// Write a consumer's sensitivity column into its slot unit.
    /// `values` must have the owner's width.
    #[inline]
    pub fn deposit(&mut self, unit: u32, values: &[f32]) {
        debug_assert_eq!(values.len(), self.width);
        let base = unit as usize * self.width;
        self.accum[base..base + self.width].copy_from_slice(values);
    }

    /// Check the accumulator matches the tape, then gather every deposit
    /// block onto `sens` (shape `(width, n_elem)` of the owner). This is
    /// the first half of the chain rule: summing all downstream
    /// contributions onto the owner's sensitivity.
    pub fn gather(&self, sens: &mut VecArray) -> Result<()> {
        if self.accum.len() != self.n_slot() * self.width {
            return Err(EngineError::Shape(format!(
                "accumulator holds {} floats but the tape requires {}",
                self.accum.len(),
                self.n_slot() * self.width
            )));
        }
        for rec in &self.tape {
            for r in 0..rec.output_width {
                let col = self.slot(rec.loc + r);
                for (d, v) in col.iter().enumerate() {
                    sens[(d, rec.atom as usize)] += v;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_slot_allocation() {
        // Consumers with output widths 1, 2, 3 get slots 0, 1, 3 and the
        // accumulator ends up 6 units wide.
        let mut m = SlotMachine::new(3);
        let mut p1 = CoordPair::new(0);
        let mut p2 = CoordPair::new(1);
        let mut p3 = CoordPair::new(0);
        m.add_request(1, &mut p1);
        m.add_request(2, &mut p2);
        m.add_request(3, &mut p3);
        assert_eq!(p1.slot, 0);
        assert_eq!(p2.slot, 1);
        assert_eq!(p3.slot, 3);
        assert_eq!(m.n_slot(), 6);
        assert_eq!(m.accum_array().len(), 6 * 3);
    }

    #[test]
    fn test_slots_partition_without_gap() {
        let mut m = SlotMachine::new(2);
        let widths = [2usize, 1, 4, 1];
        let mut next = 0u32;
        for (i, &w) in widths.iter().enumerate() {
            let mut p = CoordPair::new(i as u32);
            m.add_request(w, &mut p);
            assert_eq!(p.slot, next);
            next += w as u32;
        }
        assert_eq!(m.n_slot() as u32, next);
    }

    #[test]
    fn test_gather_sums_deposits_per_atom() {
        let mut m = SlotMachine::new(2);
        let mut pa = CoordPair::new(1);
        let mut pb = CoordPair::new(1);
        m.add_request(1, &mut pa);
        m.add_request(2, &mut pb);
        m.deposit(pa.slot, &[1.0, 2.0]);
        m.deposit(pb.slot, &[10.0, 20.0]);
        m.deposit(pb.slot + 1, &[100.0, 200.0]);

        let mut sens = VecArray::new(2, 3);
        m.gather(&mut sens).unwrap();
        assert_eq!(sens[(0, 1)], 111.0);
        assert_eq!(sens[(1, 1)], 222.0);
        assert_eq!(sens[(0, 0)], 0.0);
    }

    #[test]
    fn test_zero_accum() {
        let mut m = SlotMachine::new(1);
        let mut p = CoordPair::new(0);
        m.add_request(1, &mut p);
        m.deposit(p.slot, &[5.0]);
        m.zero_accum();
        assert_eq!(m.slot(p.slot), &[0.0]);
    }

    #[test]
    fn test_autodiff_params_sentinel() {
        let p = AutoDiffParams::new(&[3, 4, 5], &[7]);
        assert_eq!(p.slots1(), &[3, 4, 5]);
        assert_eq!(p.slots2(), &[7]);
        assert_eq!(p.slots1[3], SLOT_SENTINEL);
        assert_eq!(p.slots2[1], SLOT_SENTINEL);
    }
}
