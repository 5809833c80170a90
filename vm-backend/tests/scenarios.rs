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

//! End-to-end scenarios exercising [`wvm_backend::Backend`] the way an
//! embedder would: decode, bind memory, resolve imports, arm a watchdog,
//! call. Each test here corresponds to one of the engine specification's
//! concrete scenarios rather than a single component's unit behavior.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use wvm_backend::host::GuestPtr;
use wvm_backend::{Backend, ExecutionState, HostFunctionRegistry, Value, Watchdog};
use wvm_core::LinearMemory;
use wvm_errors::{EngineError, LinkError, TrapKind};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Host state shared with every registered native function in these
/// tests: a sink for whatever a guest "prints", standing in for stdout so
/// assertions don't depend on capturing the process's actual streams.
#[derive(Default, Clone)]
struct Host {
    printed: Arc<Mutex<Vec<String>>>,
}

impl Host {
    fn print(&self, line: impl Into<String>) {
        self.printed.lock().unwrap().push(line.into());
    }

    fn output(&self) -> String {
        self.printed.lock().unwrap().join("")
    }
}

#[test]
fn print_num_receives_the_sum_of_three_args() {
    init_logger();
    let bytes = wat::parse_str(
        r#"(module
            (import "env" "print_num" (func $print_num (param i64)))
            (func $apply (export "apply") (param i64 i64 i64)
                local.get 0
                local.get 1
                i64.add
                local.get 2
                i64.add
                call $print_num)
        )"#,
    )
    .unwrap();

    let mut backend: Backend<Host> = Backend::new(&bytes).unwrap();
    let mut registry = HostFunctionRegistry::new();
    registry
        .add("env", "print_num", |host: &mut Host, _mem: &LinearMemory, n: i64| {
            host.print(format!("Number : {n}"));
        })
        .unwrap();
    backend.resolve_imports(registry).unwrap();
    backend.set_memory(LinearMemory::new(1, 1).unwrap());

    let mut host = Host::default();
    backend
        .call(&mut host, "", "apply", vec![Value::I64(1), Value::I64(2), Value::I64(3)])
        .unwrap();

    assert_eq!(host.output(), "Number : 6");
}

#[test]
fn failing_eosio_assert_exits_with_its_message() {
    init_logger();
    let bytes = wat::parse_str(
        r#"(module
            (import "env" "eosio_assert" (func $assert (param i32 i32 i32)))
            (memory (export "memory") 1)
            (data (i32.const 0) "nope")
            (func $apply (export "apply")
                i32.const 0
                i32.const 0
                i32.const 4
                call $assert
                (loop
                    br 0))
        )"#,
    )
    .unwrap();

    let mut backend: Backend<Host> = Backend::new(&bytes).unwrap();
    let handle = backend.context().exit_handle();

    let mut registry = HostFunctionRegistry::new();
    registry
        .add(
            "env",
            "eosio_assert",
            move |host: &mut Host, mem: &LinearMemory, cond: bool, ptr: GuestPtr, len: u32| {
                if !cond {
                    let bytes = wvm_backend::host::guest_slice(mem, ptr.0, len).expect("message in bounds");
                    let message = std::str::from_utf8(bytes).unwrap_or("<invalid utf8>").to_string();
                    host.print(&message);
                    handle.request_exit_with_message(message);
                }
            },
        )
        .unwrap();
    backend.resolve_imports(registry).unwrap();
    backend.set_memory(LinearMemory::new(1, 1).unwrap());

    let mut host = Host::default();
    let err = backend.call(&mut host, "", "apply", vec![]).unwrap_err();

    assert_eq!(host.output(), "nope");
    assert!(matches!(err, EngineError::Trap(TrapKind::Exit(ref m)) if m == "nope"));
}

#[test]
fn grown_memory_reads_back_written_byte_and_traps_past_the_end() {
    init_logger();
    let mut memory = LinearMemory::new(1, 4).unwrap();
    let page_size = memory.data_size();
    memory.grow(2).unwrap();

    memory.write(page_size + 7, &[0xAB]);
    let mut out = [0u8; 1];
    memory.read(page_size + 7, &mut out);
    assert_eq!(out, [0xAB]);

    let past_the_end = page_size * 3;
    let result = wvm_core::fault_registry::run_guarded(std::panic::AssertUnwindSafe(|| {
        let mut scratch = [0u8; 1];
        memory.read(past_the_end, &mut scratch);
    }));
    assert!(result.is_err(), "read past the committed+guard region should fault");
}

#[test]
fn watchdog_deadline_interrupts_an_infinite_loop() {
    init_logger();
    let bytes = wat::parse_str(
        r#"(module
            (func $spin (export "spin")
                (loop
                    br 0))
        )"#,
    )
    .unwrap();

    let mut backend: Backend<Host> = Backend::new(&bytes).unwrap();
    backend.resolve_imports(HostFunctionRegistry::new()).unwrap();
    backend.set_memory(LinearMemory::new(1, 1).unwrap());

    let exit_handle = backend.context().exit_handle();
    let mut watchdog = Watchdog::new();
    let deadline = Duration::from_millis(100);
    watchdog.arm(deadline, move || exit_handle.request_exit());

    let mut host = Host::default();
    let started = Instant::now();
    let err = backend.call(&mut host, "", "spin", vec![]).unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, EngineError::Trap(TrapKind::DeadlineExceeded)));
    assert!(elapsed >= deadline);
    assert!(elapsed < deadline + Duration::from_secs(2), "deadline should be observed promptly: {elapsed:?}");
    assert!(matches!(backend.context().state(), ExecutionState::Trapped(TrapKind::DeadlineExceeded)));
}

#[test]
fn unregistered_import_fails_resolution_with_both_names() {
    init_logger();
    let bytes = wat::parse_str(
        r#"(module
            (import "env" "missing_fn" (func $missing))
            (func $apply (export "apply"))
        )"#,
    )
    .unwrap();

    let mut backend: Backend<Host> = Backend::new(&bytes).unwrap();
    let registry: HostFunctionRegistry<Host> = HostFunctionRegistry::new();
    let err = backend.resolve_imports(registry).unwrap_err();

    assert!(matches!(
        err,
        EngineError::Link(LinkError::Unresolved { ref module, ref field })
            if module == "env" && field == "missing_fn"
    ));
}
