use serde::{Deserialize, Serialize};

use super::auto_scheduler::{BatchDone, LayerDone};
use super::bank::BankArray;
use super::layer::{LayerConfig, BANKS};

pub const MAGIC_NOTIFY: u32 = 0xC0DE;
pub const MAGIC_DUMP: u32 = 0xDA7A;
pub const TYPE_NOTIFY: u32 = 1;
pub const TYPE_DUMP: u32 = 2;

/// Ticks the framing layer needs to shift the fixed header out.
const NOTIF_SETTLE: u32 = 15;

/// One message on the shared output channel. Header words: magic, type,
/// batch or layer id, start address, end address, total word count.
/// Notifications carry no payload; a dump carries every bank's output
/// window in bank-major order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transmission {
  pub header: [u32; 6],
  pub payload: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArbiterInputs {
  pub notify: Option<BatchDone>,
  pub layer_done: Option<LayerDone>,
  /// Downstream read-out handshake for an emitted dump.
  pub dump_ack: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ArbiterOutputs {
  pub transmission: Option<Transmission>,
  /// High while a dump owns the banks' read mux.
  pub transmission_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ArbState {
  Idle,
  WaitNotifSettle(u32),
  Dumping,
  WaitDataDone,
}

/// Arbiter for the single shared output channel.
///
/// One pending slot per message kind; a newer event overwrites the slot's
/// payload and the slot persists until serviced. Notifications strictly
/// preempt dumps at arbitration time, so a batch notice is never delayed
/// behind a full bank readout.
#[derive(Debug)]
pub struct OutputArbiter {
  state: ArbState,
  pending_notify: Option<BatchDone>,
  pending_dump: Option<LayerDone>,

  dump_layer: u32,
  words_per_bank: u32,
  issue_index: u32,
  payload: Vec<i64>,
}

impl OutputArbiter {
  pub fn new() -> Self {
    Self {
      state: ArbState::Idle,
      pending_notify: None,
      pending_dump: None,
      dump_layer: 0,
      words_per_bank: 0,
      issue_index: 0,
      payload: Vec::new(),
    }
  }

  fn total_words(&self) -> u32 {
    self.words_per_bank * BANKS as u32
  }

  pub fn step(
    &mut self,
    inp: &ArbiterInputs,
    layer: &LayerConfig,
    banks: &mut BankArray,
  ) -> ArbiterOutputs {
    if let Some(ev) = inp.notify {
      self.pending_notify = Some(ev);
    }
    if let Some(ev) = inp.layer_done {
      self.pending_dump = Some(ev);
    }

    let mut out = ArbiterOutputs::default();

    // Arbitration happens inside the Idle arm so a freshly entered state
    // does not also run its countdown on the entry tick.
    match self.state {
      ArbState::Idle => {
        if let Some(ev) = self.pending_notify.take() {
          out.transmission = Some(Transmission {
            header: [MAGIC_NOTIFY, TYPE_NOTIFY, ev.batch_id, 0, 0, 0],
            payload: Vec::new(),
          });
          self.state = ArbState::WaitNotifSettle(NOTIF_SETTLE);
          log::debug!("arbiter: notified batch {} of layer {}", ev.batch_id, ev.layer_id);
        } else if let Some(ev) = self.pending_dump.take() {
          self.dump_layer = ev.layer_id;
          self.words_per_bank = layer.output_words_per_bank();
          self.payload = Vec::with_capacity(self.total_words() as usize);
          banks.set_read_mux_external(true);
          out.transmission_active = true;
          // First read goes out with the mux grab; the Dumping arm
          // collects it next tick
          banks.issue_external_read(0, 0);
          self.issue_index = 1;
          self.state = ArbState::Dumping;
          log::debug!("arbiter: dumping layer {} ({} words)", ev.layer_id, self.total_words());
        }
      },
      ArbState::WaitNotifSettle(ticks) => {
        self.state = if ticks == 1 {
          ArbState::Idle
        } else {
          ArbState::WaitNotifSettle(ticks - 1)
        };
      },
      ArbState::Dumping => {
        out.transmission_active = true;
        if let Some(word) = banks.external_result() {
          self.payload.push(word);
        }
        if self.issue_index < self.total_words() {
          let bank = (self.issue_index / self.words_per_bank) as usize;
          let addr = self.issue_index % self.words_per_bank;
          banks.issue_external_read(bank, addr);
          self.issue_index += 1;
        } else if self.payload.len() as u32 == self.total_words() {
          let last = self.words_per_bank.saturating_sub(1);
          out.transmission = Some(Transmission {
            header: [
              MAGIC_DUMP,
              TYPE_DUMP,
              self.dump_layer,
              0,
              last,
              self.total_words(),
            ],
            payload: std::mem::take(&mut self.payload),
          });
          self.state = ArbState::WaitDataDone;
        }
      },
      ArbState::WaitDataDone => {
        out.transmission_active = true;
        if inp.dump_ack {
          banks.set_read_mux_external(false);
          self.state = ArbState::Idle;
          out.transmission_active = false;
        }
      },
    }

    out
  }

  pub fn is_idle(&self) -> bool {
    self.state == ArbState::Idle && self.pending_notify.is_none() && self.pending_dump.is_none()
  }

  pub fn reset(&mut self, banks: &mut BankArray) {
    banks.set_read_mux_external(false);
    self.state = ArbState::Idle;
    self.pending_notify = None;
    self.pending_dump = None;
    self.payload.clear();
  }
}
