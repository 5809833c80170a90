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

//! Thin CLI driver around `wvm-backend`, demonstrating the embedder's side
//! of the engine: load a module, register the two host functions the
//! engine's own test modules call (`print_num`, `eosio_assert`), bind a
//! linear memory, optionally arm a watchdog, and invoke an exported
//! function by name. This binary is deliberately minimal — a real embedder
//! supplies its own host-function set; this one only exists to exercise
//! the public surface end to end from outside the workspace's own tests.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;

use wvm_backend::host::GuestPtr;
use wvm_backend::{Backend, HostFunctionRegistry, Value};
use wvm_core::LinearMemory;
use wvm_errors::{EngineError, TrapKind};

/// Host state available to every function this driver registers.
#[derive(Default)]
struct Host;

#[derive(Parser, Debug)]
#[command(name = "wvm-hello", about = "Invoke an exported function in a WASM module through wvm")]
struct Args {
    /// Path to the `.wasm` module to load.
    module: std::path::PathBuf,
    /// Name of the exported function to call.
    export: String,
    /// i32 arguments to pass to the export, in order.
    #[arg(long = "arg", value_name = "I32")]
    args: Vec<i32>,
    /// Initial page count to commit to the guest's linear memory.
    #[arg(long, default_value_t = 1)]
    pages: u32,
    /// Maximum page count the guest's linear memory may grow to.
    #[arg(long, default_value_t = 16)]
    max_pages: u32,
    /// Abort the call after this many milliseconds, if it hasn't returned.
    #[arg(long)]
    deadline_ms: Option<u64>,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("wvm-hello: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let bytes = std::fs::read(&args.module)
        .with_context(|| format!("reading {}", args.module.display()))?;

    let mut backend: Backend<Host> = Backend::new(&bytes).context("decoding module")?;

    let mut registry = HostFunctionRegistry::new();
    registry
        .add("env", "print_num", |_host: &mut Host, _mem: &LinearMemory, n: i64| {
            println!("Number : {n}");
        })
        .expect("print_num is registered exactly once");
    registry
        .add(
            "env",
            "eosio_assert",
            |_host: &mut Host, mem: &LinearMemory, cond: bool, ptr: GuestPtr, len: u32| {
                if !cond {
                    if let Ok(bytes) = wvm_backend::host::guest_slice(mem, ptr.0, len) {
                        let message = String::from_utf8_lossy(bytes);
                        println!("{message}");
                    }
                }
            },
        )
        .expect("eosio_assert is registered exactly once");

    backend.resolve_imports(registry).context("resolving imports")?;
    backend.set_memory(LinearMemory::new(args.pages, args.max_pages).context("allocating guest memory")?);

    let watchdog_guard = args.deadline_ms.map(|ms| {
        let exit_handle = backend.context().exit_handle();
        let mut watchdog = wvm_backend::Watchdog::new();
        watchdog.arm(Duration::from_millis(ms), move || exit_handle.request_exit());
        watchdog
    });

    let mut host = Host;
    let call_args = args.args.into_iter().map(Value::I32).collect();
    let result = backend.call(&mut host, "env", &args.export, call_args);
    drop(watchdog_guard);

    match result {
        Ok(Some(value)) => {
            println!("{value:?}");
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(EngineError::Trap(TrapKind::Exit(message))) => {
            bail!("export `{}` exited: {message}", args.export)
        }
        Err(EngineError::Trap(trap)) => bail!("export `{}` trapped: {trap}", args.export),
        Err(err) => Err(err).with_context(|| format!("calling `{}`", args.export)),
    }
}
