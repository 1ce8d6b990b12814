//! Signal-triggered cleanup: a background thread blocked on
//! `signal_hook::iterator::Signals::forever`, not an async-signal-context
//! handler — real cleanup (unlinking a file) does not belong inside a raw
//! signal handler.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use log::info;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;

static IN_FLIGHT_TEMP: OnceLock<Mutex<Option<PathBuf>>> = OnceLock::new();

fn slot() -> &'static Mutex<Option<PathBuf>> {
    IN_FLIGHT_TEMP.get_or_init(|| Mutex::new(None))
}

/// Records (or clears, with `None`) the path of the temp source file
/// currently in flight, so the signal-handling thread knows what to unlink
/// if the process is interrupted.
pub fn set_in_flight_temp(path: Option<PathBuf>) {
    *slot().lock().unwrap() = path;
}

/// Installs handlers for interrupt and termination that unlink any
/// in-flight temporary source file before exiting with a conventional
/// signal-related code. Spawns a background thread; returns immediately.
pub fn install() {
    let mut signals = match Signals::new([SIGINT, SIGTERM]) {
        Ok(s) => s,
        Err(e) => {
            log::warn!("failed to install signal handlers: {}", e);
            return;
        }
    };

    std::thread::spawn(move || {
        for signal in signals.forever() {
            info!("received signal {}, cleaning up", signal);
            if let Some(path) = slot().lock().unwrap().take() {
                let _ = std::fs::remove_file(&path);
            }
            std::process::exit(128 + signal);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_round_trips() {
        let p = PathBuf::from("/tmp/crispy-test-marker");
        set_in_flight_temp(Some(p.clone()));
        assert_eq!(slot().lock().unwrap().clone(), Some(p));
        set_in_flight_temp(None);
        assert_eq!(slot().lock().unwrap().clone(), None);
    }
}
