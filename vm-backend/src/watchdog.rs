// This file is part of wvm.

// Copyright (C) 2021-2025 Gear Technologies Inc.
// SPDX-License-Identifier: GPL-3.0-or-later WITH Classpath-exception-2.0

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! A deadline timer for bounding how long a single guest invocation may
//! run, mirroring `eosio::vm::watchdog<Duration>` from the original: arm
//! it before `call`, and it fires its callback exactly once after the
//! duration elapses unless cancelled first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// A one-shot deadline timer running on its own OS thread.
pub struct Watchdog {
    armed: Arc<AtomicBool>,
    cancelled: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Default for Watchdog {
    fn default() -> Self {
        Self::new()
    }
}

impl Watchdog {
    /// An unarmed watchdog.
    pub fn new() -> Self {
        Self {
            armed: Arc::new(AtomicBool::new(false)),
            cancelled: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    /// Arms the watchdog: after `duration`, unless [`Self::cancel`] runs
    /// first, `callback` fires exactly once on the timer thread. The
    /// callback's only sanctioned effect is to request that the
    /// in-flight invocation unwind (e.g. by flipping an
    /// [`crate::context::ExitHandle`]) — it must not touch guest state
    /// directly, since it runs concurrently with the interpreter.
    ///
    /// Re-arming an already-armed watchdog is a programmer error: this
    /// engine runs one invocation per watchdog at a time, same as the
    /// original. The call is ignored (after a debug assertion) rather
    /// than silently replacing the pending timer.
    pub fn arm<F>(&mut self, duration: Duration, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let was_armed = self.armed.swap(true, Ordering::AcqRel);
        debug_assert!(!was_armed, "wvm: watchdog armed while already armed");
        if was_armed {
            return;
        }

        self.cancelled.store(false, Ordering::Release);
        let cancelled = self.cancelled.clone();
        let armed = self.armed.clone();
        self.handle = Some(thread::spawn(move || {
            thread::sleep(duration);
            if !cancelled.load(Ordering::Acquire) {
                log::debug!("wvm: watchdog deadline elapsed after {duration:?}");
                callback();
            }
            armed.store(false, Ordering::Release);
        }));
    }

    /// Disarms the watchdog. Idempotent: safe to call whether or not it
    /// is armed, and safe to call after it has already fired. Blocks
    /// until the timer thread (if any) has observed the cancellation and
    /// exited.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }

    /// Whether the watchdog currently has a pending deadline.
    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use std::time::Instant;

    #[test]
    fn fires_callback_after_duration_elapses() {
        let mut wd = Watchdog::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let start = Instant::now();
        wd.arm(Duration::from_millis(20), move || {
            fired_clone.store(true, Ordering::Release);
        });
        while !fired.load(Ordering::Acquire) && start.elapsed() < Duration::from_secs(2) {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(fired.load(Ordering::Acquire));
    }

    #[test]
    fn cancel_before_deadline_suppresses_callback() {
        let mut wd = Watchdog::new();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_clone = fired.clone();
        wd.arm(Duration::from_millis(200), move || {
            fired_clone.fetch_add(1, Ordering::AcqRel);
        });
        wd.cancel();
        thread::sleep(Duration::from_millis(250));
        assert_eq!(fired.load(Ordering::Acquire), 0);
    }

    #[test]
    fn cancel_is_idempotent() {
        let mut wd = Watchdog::new();
        wd.cancel();
        wd.cancel();
        assert!(!wd.is_armed());
    }
}
