//! Ctrl-C handling for long indexing runs
//!
//! The handler only flips a flag; the indexer polls it between embedding
//! batches so an interrupt never leaves a half-published index.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Once;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);
static HANDLER: Once = Once::new();

/// Install the Ctrl-C handler (idempotent).
pub fn setup_signal_handler() {
    HANDLER.call_once(|| {
        if let Err(e) = ctrlc::set_handler(|| {
            INTERRUPTED.store(true, Ordering::SeqCst);
            eprintln!("\nInterrupt received, finishing current batch...");
        }) {
            tracing::warn!(error = %e, "Failed to install Ctrl-C handler");
        }
    });
}

pub fn check_interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

pub fn reset_interrupted() {
    INTERRUPTED.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_roundtrip() {
        reset_interrupted();
        assert!(!check_interrupted());
        INTERRUPTED.store(true, Ordering::SeqCst);
        assert!(check_interrupted());
        reset_interrupted();
        assert!(!check_interrupted());
    }
}
