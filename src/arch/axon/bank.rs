use serde::{Deserialize, Serialize};

use super::layer::BANKS;

/// One synchronous SRAM bank. Reads of cells that were never written are
/// reported as such so the consumer can apply its zero-recovery policy
/// instead of propagating undefined state.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Sram {
  data: Vec<i64>,
  written: Vec<bool>,
}

impl Sram {
  fn new(depth: u32) -> Self {
    Self {
      data: vec![0; depth as usize],
      written: vec![false; depth as usize],
    }
  }

  fn read(&self, addr: u32) -> (i64, bool) {
    match self.data.get(addr as usize) {
      Some(&v) => (v, self.written[addr as usize]),
      None => (0, false),
    }
  }

  fn write(&mut self, addr: u32, value: i64) {
    if let Some(cell) = self.data.get_mut(addr as usize) {
      *cell = value;
      self.written[addr as usize] = true;
    }
  }

  fn clear(&mut self) {
    self.data.iter_mut().for_each(|v| *v = 0);
    self.written.iter_mut().for_each(|w| *w = false);
  }
}

/// Write signals for all 16 banks in one tick: defaults everywhere, the
/// producer overrides exactly the ports it drives.
#[derive(Debug, Clone, Copy)]
pub struct BankWritePort {
  pub enable: [bool; BANKS],
  pub addr: [u32; BANKS],
  pub data: [i64; BANKS],
}

impl Default for BankWritePort {
  fn default() -> Self {
    Self {
      enable: [false; BANKS],
      addr: [0; BANKS],
      data: [0; BANKS],
    }
  }
}

/// The 16 output accumulation banks.
///
/// Dual-port behaviour: one internal read port per bank (one-tick latency)
/// used by the accumulator, one shared external read port used by the dump
/// path. The read-address mux is gated by "transmission active": while a
/// dump owns the banks the internal port is disconnected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BankArray {
  banks: Vec<Sram>,
  depth: u32,

  // Internal read port, per bank
  pending_read: [Option<u32>; BANKS],
  read_data: [i64; BANKS],
  read_written: [bool; BANKS],

  // External (dump) read port, shared
  external_mode: bool,
  pending_external: Option<(usize, u32)>,
  external_data: Option<i64>,
}

impl BankArray {
  pub fn new(depth: u32) -> Self {
    Self {
      banks: (0..BANKS).map(|_| Sram::new(depth)).collect(),
      depth,
      pending_read: [None; BANKS],
      read_data: [0; BANKS],
      read_written: [false; BANKS],
      external_mode: false,
      pending_external: None,
      external_data: None,
    }
  }

  pub fn depth(&self) -> u32 {
    self.depth
  }

  /// Commit phase: reads issued last tick become visible this tick.
  pub fn step(&mut self) {
    for bank in 0..BANKS {
      if let Some(addr) = self.pending_read[bank].take() {
        let (v, w) = self.banks[bank].read(addr);
        self.read_data[bank] = v;
        self.read_written[bank] = w;
      }
    }
    self.external_data = self
      .pending_external
      .take()
      .map(|(bank, addr)| self.banks[bank].read(addr).0);
  }

  /// Select the read-address mux: external while a transmission is active.
  pub fn set_read_mux_external(&mut self, external: bool) {
    self.external_mode = external;
  }

  pub fn read_mux_external(&self) -> bool {
    self.external_mode
  }

  /// Issue an internal (accumulator) read; ignored while the dump path
  /// owns the mux.
  pub fn issue_read(&mut self, bank: usize, addr: u32) {
    if !self.external_mode && bank < BANKS {
      self.pending_read[bank] = Some(addr);
    }
  }

  /// Sampled data for the read issued one tick earlier.
  pub fn read_result(&self, bank: usize) -> (i64, bool) {
    (self.read_data[bank], self.read_written[bank])
  }

  /// Issue an external (dump) read; ignored unless the mux is external.
  pub fn issue_external_read(&mut self, bank: usize, addr: u32) {
    if self.external_mode && bank < BANKS {
      self.pending_external = Some((bank, addr));
    }
  }

  pub fn external_result(&mut self) -> Option<i64> {
    self.external_data.take()
  }

  /// Apply one tick's write signals.
  pub fn apply_write(&mut self, port: &BankWritePort) {
    for bank in 0..BANKS {
      if port.enable[bank] {
        self.banks[bank].write(port.addr[bank], port.data[bank]);
      }
    }
  }

  /// Zero every bank and forget written state (layer transition).
  pub fn clear_all(&mut self) {
    for bank in &mut self.banks {
      bank.clear();
    }
  }

  /// Direct peek, for dump formatting and tests only.
  pub fn peek(&self, bank: usize, addr: u32) -> i64 {
    self.banks[bank].read(addr).0
  }
}

/// Flat operand storage: 16 banks of narrow words holding activations or
/// weights. The loader front end writes it, the lane array reads it
/// combinationally during compute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Storage {
  banks: Vec<Vec<i32>>,
}

impl Storage {
  pub fn new(depth: u32) -> Self {
    Self {
      banks: (0..BANKS).map(|_| vec![0; depth as usize]).collect(),
    }
  }

  pub fn read(&self, bank: usize, addr: u32) -> i32 {
    self
      .banks
      .get(bank)
      .and_then(|b| b.get(addr as usize))
      .copied()
      .unwrap_or(0)
  }

  pub fn write(&mut self, bank: usize, addr: u32, value: i32) {
    if let Some(cell) = self.banks.get_mut(bank).and_then(|b| b.get_mut(addr as usize)) {
      *cell = value;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn read_has_one_tick_latency() {
    let mut banks = BankArray::new(16);
    let mut port = BankWritePort::default();
    port.enable[3] = true;
    port.addr[3] = 5;
    port.data[3] = 42;
    banks.apply_write(&port);

    banks.issue_read(3, 5);
    banks.step();
    assert_eq!(banks.read_result(3), (42, true));
  }

  #[test]
  fn unwritten_cells_report_as_such() {
    let mut banks = BankArray::new(16);
    banks.issue_read(0, 7);
    banks.step();
    assert_eq!(banks.read_result(0), (0, false));
  }

  #[test]
  fn internal_reads_blocked_while_dump_owns_mux() {
    let mut banks = BankArray::new(16);
    let mut port = BankWritePort::default();
    port.enable[1] = true;
    port.addr[1] = 0;
    port.data[1] = 9;
    banks.apply_write(&port);

    banks.set_read_mux_external(true);
    banks.issue_read(1, 0);
    banks.step();
    assert_eq!(banks.read_result(1), (0, false));

    banks.issue_external_read(1, 0);
    banks.step();
    assert_eq!(banks.external_result(), Some(9));
  }

  #[test]
  fn clear_resets_data_and_written_state() {
    let mut banks = BankArray::new(8);
    let mut port = BankWritePort::default();
    port.enable[0] = true;
    port.addr[0] = 2;
    port.data[0] = -7;
    banks.apply_write(&port);
    banks.clear_all();

    banks.issue_read(0, 2);
    banks.step();
    assert_eq!(banks.read_result(0), (0, false));
  }

  #[test]
  fn out_of_range_writes_ignored() {
    let mut banks = BankArray::new(4);
    let mut port = BankWritePort::default();
    port.enable[0] = true;
    port.addr[0] = 100;
    port.data[0] = 1;
    banks.apply_write(&port);
    banks.issue_read(0, 3);
    banks.step();
    assert_eq!(banks.read_result(0), (0, false));
  }
}
