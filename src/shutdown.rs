// src/shutdown.rs

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Cooperative shutdown flag shared by every wishlist thread.
///
/// All deliberate waits in the watcher (inter-page delays, retry backoffs,
/// rate-limiter admission, inter-cycle sleeps) go through [`Shutdown::sleep`]
/// so a ctrl-c wakes them immediately. The flag is only ever consulted
/// between phases of a cycle; a store commit that has begun is never
/// interrupted.
pub struct Shutdown {
    triggered: Mutex<bool>,
    cvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            triggered: Mutex::new(false),
            cvar: Condvar::new(),
        })
    }

    pub fn trigger(&self) {
        let mut flag = self.triggered.lock().unwrap();
        *flag = true;
        self.cvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock().unwrap()
    }

    /// Sleep for up to `dur`. Returns true if shutdown was triggered before
    /// the full duration elapsed.
    pub fn sleep(&self, dur: Duration) -> bool {
        let deadline = Instant::now() + dur;
        let mut flag = self.triggered.lock().unwrap();
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cvar
                .wait_timeout(flag, deadline - now)
                .unwrap();
            flag = guard;
        }
        true
    }
}
