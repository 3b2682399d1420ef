use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INIT: Once = Once::new();
static ENABLE_LOG: AtomicBool = AtomicBool::new(true);

/// Initialize the global logger. Safe to call more than once; only the
/// first call takes effect. Filter defaults to `info`, override with
/// RUST_LOG.
pub fn init_log() {
  INIT.call_once(|| {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
      .format_timestamp(None)
      .init();
  });
}

/// Set user-facing logging enabled
pub fn set_log(enabled: bool) {
  ENABLE_LOG.store(enabled, Ordering::Relaxed);
}

/// Check if user-facing logging is enabled, default is true
pub fn is_log_enabled() -> bool {
  ENABLE_LOG.load(Ordering::Relaxed)
}

/// Drop everything below error and mute user-facing messages, for quiet
/// runs.
pub fn set_quiet(quiet: bool) {
  if quiet {
    log::set_max_level(log::LevelFilter::Error);
    set_log(false);
  }
}

/// Print a user-facing message with blue [Log] prefix
#[macro_export]
macro_rules! log_info {
  ($($arg:tt)*) => {
    if $crate::simulator::utils::log::is_log_enabled() {
      println!("\x1b[34m[Log]\x1b[0m {}", format!($($arg)*));
    }
  };
}
