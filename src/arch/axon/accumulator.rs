use std::sync::Arc;

use super::bank::{BankArray, BankWritePort};
use super::mapper::Snapshot;

/// One lane's partial sum, emitted by the lane array. Consumed the tick it
/// is produced.
#[derive(Debug, Clone, Copy)]
pub struct LaneEvent {
  pub lane_id: u8,
  pub value: i64,
  pub valid: bool,
}

/// Occupied slots between entry and retirement. Stage actions:
///   1 decode (entry)   2 issue read   3 absorb read latency
///   4 sample           5 add          6 write-back (retirement)
/// A record entering at tick T retires at T+5: six ticks in flight.
const SLOTS: usize = 5;

#[derive(Debug, Clone, Copy)]
struct InFlight {
  lane_id: u8,
  bank_id: usize,
  addr: u32,
  value: i64,
  sampled: i64,
  acc: i64,
}

/// Pipelined read-modify-write engine for the 16 output banks.
///
/// An explicit bounded queue of in-flight records, advanced one slot per
/// tick. At most one event enters per tick; the lane array's tap-major
/// emission order keeps records sharing a bank four ticks apart, so
/// concurrent stages never contend for a bank port and a bank's read
/// register is never clobbered before stage 4 samples it.
///
/// No collision arbitration: the mapper never produces two lanes with the
/// same address within one pass.
#[derive(Debug)]
pub struct Accumulator {
  slots: [Option<InFlight>; SLOTS],
}

impl Accumulator {
  pub fn new() -> Self {
    Self {
      slots: [None; SLOTS],
    }
  }

  /// Advance every in-flight record one stage and admit at most one new
  /// event. The bank array must have committed its reads for this tick
  /// before this runs.
  pub fn step(
    &mut self,
    event: Option<LaneEvent>,
    snapshot: Option<&Arc<Snapshot>>,
    banks: &mut BankArray,
  ) {
    // Stage 6: write-back on retirement. All write signals default off,
    // exactly one bank's port is driven.
    if let Some(rec) = self.slots[4].take() {
      let mut port = BankWritePort::default();
      port.enable[rec.bank_id] = true;
      port.addr[rec.bank_id] = rec.addr;
      port.data[rec.bank_id] = rec.acc;
      banks.apply_write(&port);
      log::trace!(
        "accum: lane {} wrote {} to bank {} addr {}",
        rec.lane_id,
        rec.acc,
        rec.bank_id,
        rec.addr
      );
    }

    // Stage 5: add.
    self.slots[4] = self.slots[3].take().map(|mut rec| {
      rec.acc = rec.sampled + rec.value;
      rec
    });

    // Stage 4: sample bank content; a never-written cell reads as zero.
    self.slots[3] = self.slots[2].take().map(|mut rec| {
      let (data, written) = banks.read_result(rec.bank_id);
      rec.sampled = if written { data } else { 0 };
      rec
    });

    // Stage 3: absorb the bank's one-tick read latency.
    self.slots[2] = self.slots[1].take();

    // Stage 2: issue the read.
    self.slots[1] = self.slots[0].take().map(|rec| {
      banks.issue_read(rec.bank_id, rec.addr);
      rec
    });

    // Stage 1: decode the target from the snapshot, gated by valid.
    // Invalid lanes never enter the pipeline, so their writes are
    // suppressed rather than landing at a wrong address.
    self.slots[0] = event.and_then(|ev| {
      if !ev.valid {
        return None;
      }
      let snap = snapshot?;
      let mapping = snap.lanes.get(ev.lane_id as usize)?;
      if !mapping.valid {
        return None;
      }
      Some(InFlight {
        lane_id: ev.lane_id,
        bank_id: mapping.bank_id as usize,
        addr: mapping.bank_address,
        value: ev.value,
        sampled: 0,
        acc: 0,
      })
    });
  }

  /// Records still draining through the pipeline.
  pub fn in_flight(&self) -> usize {
    self.slots.iter().filter(|s| s.is_some()).count()
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight() == 0
  }

  pub fn reset(&mut self) {
    self.slots = [None; SLOTS];
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::arch::axon::layer::{LayerTable, LANES};
  use crate::arch::axon::mapper::{LaneMapping, Snapshot};

  fn snapshot_to(lane: u8, bank: u8, addr: u32) -> Arc<Snapshot> {
    let mut lanes = [LaneMapping {
      valid: false,
      bank_id: 0,
      bank_address: 0,
    }; LANES];
    lanes[lane as usize] = LaneMapping {
      valid: true,
      bank_id: bank,
      bank_address: addr,
    };
    Arc::new(Snapshot {
      row_id: 0,
      tile_id: 0,
      layer_id: 0,
      lanes,
    })
  }

  fn identity_snapshot(addr: u32) -> Arc<Snapshot> {
    let mut lanes = [LaneMapping {
      valid: false,
      bank_id: 0,
      bank_address: 0,
    }; LANES];
    for (i, m) in lanes.iter_mut().enumerate() {
      *m = LaneMapping {
        valid: true,
        bank_id: i as u8,
        bank_address: addr,
      };
    }
    Arc::new(Snapshot {
      row_id: 0,
      tile_id: 0,
      layer_id: 0,
      lanes,
    })
  }

  fn run_idle(accum: &mut Accumulator, banks: &mut BankArray, ticks: usize) {
    for _ in 0..ticks {
      banks.step();
      accum.step(None, None, banks);
    }
  }

  #[test]
  fn write_back_lands_six_ticks_after_entry() {
    let mut banks = BankArray::new(64);
    let mut accum = Accumulator::new();
    let snap = snapshot_to(0, 3, 9);

    banks.step();
    accum.step(
      Some(LaneEvent {
        lane_id: 0,
        value: 5,
        valid: true,
      }),
      Some(&snap),
      &mut banks,
    );
    // Entry tick plus four more: the write must not have landed yet
    run_idle(&mut accum, &mut banks, 4);
    assert_eq!(banks.peek(3, 9), 0, "write must not land early");
    run_idle(&mut accum, &mut banks, 1);
    assert_eq!(banks.peek(3, 9), 5);
    assert!(accum.is_idle());
  }

  #[test]
  fn repeated_sums_accumulate_independent_of_spacing() {
    let mut banks = BankArray::new(64);
    let mut accum = Accumulator::new();
    let values = [3i64, -2, 10, 7, 1];
    let gaps = [6usize, 9, 7, 20, 6];

    for (n, (&v, &gap)) in values.iter().zip(gaps.iter()).enumerate() {
      // Each event arrives under its own pass snapshot
      let snap = snapshot_to(2, 5, 17);
      banks.step();
      accum.step(
        Some(LaneEvent {
          lane_id: 2,
          value: v,
          valid: true,
        }),
        Some(&snap),
        &mut banks,
      );
      run_idle(&mut accum, &mut banks, gap);
      let expected: i64 = values[..=n].iter().sum();
      assert_eq!(banks.peek(5, 17), expected);
    }
  }

  #[test]
  fn invalid_events_and_lanes_never_write() {
    let mut banks = BankArray::new(64);
    let mut accum = Accumulator::new();
    let snap = snapshot_to(0, 1, 4);

    banks.step();
    accum.step(
      Some(LaneEvent {
        lane_id: 0,
        value: 99,
        valid: false,
      }),
      Some(&snap),
      &mut banks,
    );
    // lane 1 has no valid mapping in this snapshot
    banks.step();
    accum.step(
      Some(LaneEvent {
        lane_id: 1,
        value: 99,
        valid: true,
      }),
      Some(&snap),
      &mut banks,
    );
    run_idle(&mut accum, &mut banks, 8);
    assert!(accum.is_idle());
    assert_eq!(banks.peek(1, 4), 0);
  }

  #[test]
  fn sixteen_lanes_drain_through_identity_snapshot() {
    // One pass, 16 valid lanes, value[lane] = lane + 1, banks zeroed:
    // bank[i] ends holding i + 1.
    let mut banks = BankArray::new(64);
    let mut accum = Accumulator::new();
    let snap = identity_snapshot(0);

    // Tap-major emission order, one lane per tick
    for tap in 0..4u8 {
      for off in 0..4u8 {
        let lane = off * 4 + tap;
        banks.step();
        accum.step(
          Some(LaneEvent {
            lane_id: lane,
            value: lane as i64 + 1,
            valid: true,
          }),
          Some(&snap),
          &mut banks,
        );
      }
    }
    run_idle(&mut accum, &mut banks, 6);
    assert!(accum.is_idle());
    for bank in 0..16 {
      assert_eq!(banks.peek(bank, 0), bank as i64 + 1);
    }
  }

  #[test]
  fn real_pass_snapshot_accumulates_across_passes() {
    // Two passes hitting the same cell via the real mapper: tile 0 rows 1
    // and 2 overlap at output_time 2 (taps 3 and 1).
    let table = LayerTable::default();
    let layer = *table.get(0);
    let mut banks = BankArray::new(512);
    let mut accum = Accumulator::new();

    let p1 = Arc::new(crate::arch::axon::mapper::map_pass(1, 0, 0, &layer));
    let p2 = Arc::new(crate::arch::axon::mapper::map_pass(2, 0, 0, &layer));
    assert_eq!(p1.lanes[3].bank_address, p2.lanes[1].bank_address);

    banks.step();
    accum.step(
      Some(LaneEvent {
        lane_id: 3,
        value: 11,
        valid: true,
      }),
      Some(&p1),
      &mut banks,
    );
    run_idle(&mut accum, &mut banks, 6);
    banks.step();
    accum.step(
      Some(LaneEvent {
        lane_id: 1,
        value: 31,
        valid: true,
      }),
      Some(&p2),
      &mut banks,
    );
    run_idle(&mut accum, &mut banks, 6);
    assert_eq!(banks.peek(0, p1.lanes[3].bank_address), 42);
  }
}
