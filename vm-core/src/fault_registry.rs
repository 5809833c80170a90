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

//! Process-wide registry mapping guard-paged memory ranges to a recovery
//! path, plus the SIGSEGV/SIGBUS handler that consults it.
//!
//! Every [`crate::linear_memory::LinearMemory`] registers its `(base, len)`
//! span here while it's alive. A fault landing inside a registered span is
//! redirected to [`run_guarded`]'s panic-based recovery instead of
//! terminating the process; a fault anywhere else re-raises with the
//! default disposition, which is what a process not using this engine
//! would have seen anyway.

use core::ffi::c_void;
use parking_lot::Mutex;
use std::cell::Cell;
use std::sync::Once;

struct Region {
    base: usize,
    len: usize,
}

static REGIONS: Mutex<Vec<Region>> = Mutex::new(Vec::new());
static INSTALL: Once = Once::new();

thread_local! {
    static FAULTED: Cell<bool> = const { Cell::new(false) };
}

/// Registers `[base, base+len)` as a span the fault handler should treat as
/// a recoverable guest memory trap rather than a process-fatal signal.
///
/// Installs the process-wide signal handler on first use.
pub fn register(base: *const u8, len: usize) {
    install_handler();
    log::debug!("wvm-core: registering guarded region at {base:p}, {len} bytes");
    REGIONS.lock().push(Region {
        base: base as usize,
        len,
    });
}

/// Removes a previously registered span. Called from
/// `LinearMemory::drop`.
pub fn unregister(base: *const u8) {
    let base = base as usize;
    REGIONS.lock().retain(|r| r.base != base);
}

fn contains(addr: usize) -> bool {
    REGIONS
        .lock()
        .iter()
        .any(|r| addr >= r.base && addr < r.base + r.len)
}

fn install_handler() {
    INSTALL.call_once(|| unsafe {
        let mut action: libc::sigaction = core::mem::zeroed();
        action.sa_sigaction = segv_handler as usize;
        action.sa_flags = libc::SA_SIGINFO | libc::SA_NODEFER;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGSEGV, &action, core::ptr::null_mut());
        libc::sigaction(libc::SIGBUS, &action, core::ptr::null_mut());
    });
}

extern "C" fn segv_handler(sig: i32, info: *mut libc::siginfo_t, ctx: *mut c_void) {
    let addr = unsafe { (*info).si_addr() as usize };

    if !contains(addr) {
        reraise_default(sig);
        return;
    }

    FAULTED.with(|f| f.set(true));

    #[cfg(all(target_os = "linux", target_arch = "x86_64"))]
    unsafe {
        let ucontext = &mut *(ctx as *mut libc::ucontext_t);
        ucontext.uc_mcontext.gregs[libc::REG_RIP as usize] = trap_trampoline as usize as i64;
        return;
    }

    #[cfg(not(all(target_os = "linux", target_arch = "x86_64")))]
    {
        let _ = ctx;
        reraise_default(sig);
    }
}

fn reraise_default(sig: i32) {
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
}

/// Landing pad the handler redirects the faulting instruction pointer to.
/// Never returns normally: it unwinds the stack back to the nearest
/// [`run_guarded`] call on the same thread.
extern "C" fn trap_trampoline() -> ! {
    panic!("wvm: guarded memory access trapped");
}

/// Runs `f` with panics caused by a guard-page fault on this thread
/// converted into `Some(())`-style recovery rather than propagated.
///
/// Returns `Ok(value)` if `f` completed normally, or `Err(())` if a
/// registered region faulted during `f`. Panics that are *not* attributable
/// to a registered fault are re-propagated, since those are genuine bugs
/// rather than expected guest traps.
pub fn run_guarded<T>(f: impl FnOnce() -> T + std::panic::UnwindSafe) -> Result<T, ()> {
    FAULTED.with(|f| f.set(false));
    let previous_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(|_| {}));
    let result = std::panic::catch_unwind(f);
    std::panic::set_hook(previous_hook);

    match result {
        Ok(value) => Ok(value),
        Err(payload) if FAULTED.with(Cell::get) => {
            FAULTED.with(|f| f.set(false));
            Err(())
        }
        Err(payload) => std::panic::resume_unwind(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unregistered_address_is_not_contained() {
        assert!(!contains(0x1));
    }

    #[test]
    fn register_then_unregister_round_trips() {
        let buf = vec![0u8; 4096].into_boxed_slice();
        let base = buf.as_ptr();
        register(base, buf.len());
        assert!(contains(base as usize));
        unregister(base);
        assert!(!contains(base as usize));
    }
}
