//! WebAssembly rule scripts
//!
//! A rule script is a WebAssembly module (binary or text format) that exports
//! `memory` and a no-argument `approve` function. It talks to the host
//! through imports in the `env` namespace:
//!
//! | import | signature | meaning |
//! |---|---|---|
//! | `request_has` | `(k, klen) -> i32` | 1 if the request field exists |
//! | `request_number` | `(k, klen) -> f64` | numeric request field, NaN if absent |
//! | `request_string` | `(k, klen, buf, cap) -> i32` | copies a string field, returns its full length or -1 |
//! | `state_has` | `(k, klen) -> i32` | 1 if the state key exists |
//! | `state_number` | `(k, klen) -> f64` | numeric state value, NaN if absent |
//! | `state_bool` | `(k, klen) -> i32` | 0 or 1, -1 if absent |
//! | `state_string` | `(k, klen, buf, cap) -> i32` | like `request_string` |
//! | `state_set_number` | `(k, klen, f64)` | |
//! | `state_set_bool` | `(k, klen, i32)` | nonzero is true |
//! | `state_set_string` | `(k, klen, v, vlen)` | |
//! | `state_remove` | `(k, klen)` | |
//! | `message` | `(p, len)` | log a message for this evaluation |
//! | `verdict` | `(p, len)` | `Approved`, `Denied` or `Error`; the last call wins |
//!
//! Each evaluation runs in a fresh store with bounded fuel and memory. A
//! trap, fuel exhaustion or a missing verdict yields no decision.

use super::{Decision, PolicyRule, PolicyState, RequestContext, RuleOutcome, StateValue};
use crate::errors::{Result, StakeSignError};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::debug;
use wasmtime::{
    Caller, Config, Engine, Extern, ExternType, Linker, Memory, Module, Store, StoreLimits,
    StoreLimitsBuilder, Trap,
};

/// Exported function invoked once per evaluation
pub const ENTRY_POINT: &str = "approve";

const MAX_HOST_STRING: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WasmLimits {
    pub max_fuel: u64,
    pub max_memory_bytes: usize,
}

impl Default for WasmLimits {
    fn default() -> Self {
        Self {
            max_fuel: 10_000_000,
            max_memory_bytes: 1 << 20,
        }
    }
}

/// Shared compilation engine for rule scripts
#[derive(Clone)]
pub struct WasmRuntime {
    engine: Engine,
    limits: WasmLimits,
}

impl WasmRuntime {
    pub fn new(limits: WasmLimits) -> Result<Self> {
        let mut cfg = Config::new();
        cfg.consume_fuel(true);
        let engine = Engine::new(&cfg)
            .map_err(|e| StakeSignError::InternalError(format!("wasm engine: {}", e)))?;
        Ok(Self { engine, limits })
    }

    /// Load a rule script from disk
    pub fn load(&self, name: &str, path: &Path) -> Result<WasmRule> {
        let source = fs::read(path).map_err(|e| {
            StakeSignError::ConfigError(format!(
                "rule {}: cannot read script {}: {}",
                name,
                path.display(),
                e
            ))
        })?;
        self.compile(name, &source)
    }

    /// Compile a rule script and check its exports
    pub fn compile(&self, name: &str, source: &[u8]) -> Result<WasmRule> {
        let invalid =
            |msg: String| StakeSignError::ConfigError(format!("rule {}: {}", name, msg));

        let module = Module::new(&self.engine, source).map_err(|e| invalid(e.to_string()))?;
        match module.get_export(ENTRY_POINT) {
            Some(ExternType::Func(_)) => {}
            _ => return Err(invalid(format!("missing {} export", ENTRY_POINT))),
        }
        match module.get_export("memory") {
            Some(ExternType::Memory(_)) => {}
            _ => return Err(invalid("missing memory export".to_string())),
        }

        let mut linker = Linker::new(&self.engine);
        define_host_abi(&mut linker).map_err(|e| invalid(e.to_string()))?;

        Ok(WasmRule {
            name: name.to_string(),
            engine: self.engine.clone(),
            module,
            linker,
            limits: self.limits,
        })
    }
}

struct HostState {
    request: RequestContext,
    state: PolicyState,
    messages: Vec<String>,
    verdict: Option<String>,
    store_limits: StoreLimits,
}

/// A compiled rule script
pub struct WasmRule {
    name: String,
    engine: Engine,
    module: Module,
    linker: Linker<HostState>,
    limits: WasmLimits,
}

impl fmt::Debug for WasmRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WasmRule")
            .field("name", &self.name)
            .field("limits", &self.limits)
            .finish()
    }
}

impl WasmRule {
    fn failure(&self, err: anyhow::Error) -> StakeSignError {
        if matches!(err.downcast_ref::<Trap>(), Some(Trap::OutOfFuel)) {
            StakeSignError::PolicyFailed(format!("rule {} ran out of fuel", self.name))
        } else {
            StakeSignError::PolicyFailed(format!("rule {}: {:#}", self.name, err))
        }
    }
}

impl PolicyRule for WasmRule {
    fn evaluate(&self, request: &RequestContext, state: &mut PolicyState) -> Result<RuleOutcome> {
        let store_limits = StoreLimitsBuilder::new()
            .memory_size(self.limits.max_memory_bytes)
            .build();
        let mut store = Store::new(
            &self.engine,
            HostState {
                request: request.clone(),
                state: state.clone(),
                messages: Vec::new(),
                verdict: None,
                store_limits,
            },
        );
        store.limiter(|host| &mut host.store_limits);
        store
            .set_fuel(self.limits.max_fuel)
            .map_err(|e| self.failure(e))?;

        let instance = self
            .linker
            .instantiate(&mut store, &self.module)
            .map_err(|e| self.failure(e))?;
        let approve = instance
            .get_typed_func::<(), ()>(&mut store, ENTRY_POINT)
            .map_err(|e| self.failure(e))?;
        let called = approve.call(&mut store, ());

        let host = store.into_data();
        if let Err(e) = called {
            for message in &host.messages {
                debug!(rule = %self.name, "{}", message);
            }
            return Err(self.failure(e));
        }

        *state = host.state;
        let decision = host
            .verdict
            .as_deref()
            .map(Decision::from_verdict)
            .unwrap_or_default();
        Ok(RuleOutcome {
            decision,
            messages: host.messages,
        })
    }
}

fn define_host_abi(linker: &mut Linker<HostState>) -> anyhow::Result<()> {
    linker.func_wrap(
        "env",
        "request_has",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            Ok(caller.data().request.contains(&key) as i32)
        },
    )?;
    linker.func_wrap(
        "env",
        "request_number",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<f64> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            Ok(caller.data().request.number(&key).unwrap_or(f64::NAN))
        },
    )?;
    linker.func_wrap(
        "env",
        "request_string",
        |mut caller: Caller<'_, HostState>,
         ptr: i32,
         len: i32,
         buf: i32,
         cap: i32|
         -> anyhow::Result<i32> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            let value = caller.data().request.string(&key).map(str::to_owned);
            write_guest_string(&mut caller, value, buf, cap)
        },
    )?;

    linker.func_wrap(
        "env",
        "state_has",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            Ok(caller.data().state.contains(&key) as i32)
        },
    )?;
    linker.func_wrap(
        "env",
        "state_number",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<f64> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            Ok(caller.data().state.number(&key).unwrap_or(f64::NAN))
        },
    )?;
    linker.func_wrap(
        "env",
        "state_bool",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<i32> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            Ok(match caller.data().state.boolean(&key) {
                Some(b) => b as i32,
                None => -1,
            })
        },
    )?;
    linker.func_wrap(
        "env",
        "state_string",
        |mut caller: Caller<'_, HostState>,
         ptr: i32,
         len: i32,
         buf: i32,
         cap: i32|
         -> anyhow::Result<i32> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            let value = caller.data().state.string(&key).map(str::to_owned);
            write_guest_string(&mut caller, value, buf, cap)
        },
    )?;
    linker.func_wrap(
        "env",
        "state_set_number",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, value: f64| -> anyhow::Result<()> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            caller.data_mut().state.set(key, StateValue::Number(value));
            Ok(())
        },
    )?;
    linker.func_wrap(
        "env",
        "state_set_bool",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32, value: i32| -> anyhow::Result<()> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            caller.data_mut().state.set(key, StateValue::Bool(value != 0));
            Ok(())
        },
    )?;
    linker.func_wrap(
        "env",
        "state_set_string",
        |mut caller: Caller<'_, HostState>,
         ptr: i32,
         len: i32,
         value_ptr: i32,
         value_len: i32|
         -> anyhow::Result<()> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            let value = read_guest_str(&mut caller, value_ptr, value_len)?;
            caller.data_mut().state.set(key, StateValue::String(value));
            Ok(())
        },
    )?;
    linker.func_wrap(
        "env",
        "state_remove",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let key = read_guest_str(&mut caller, ptr, len)?;
            caller.data_mut().state.remove(&key);
            Ok(())
        },
    )?;

    linker.func_wrap(
        "env",
        "message",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let message = read_guest_str(&mut caller, ptr, len)?;
            caller.data_mut().messages.push(message);
            Ok(())
        },
    )?;
    linker.func_wrap(
        "env",
        "verdict",
        |mut caller: Caller<'_, HostState>, ptr: i32, len: i32| -> anyhow::Result<()> {
            let verdict = read_guest_str(&mut caller, ptr, len)?;
            caller.data_mut().verdict = Some(verdict);
            Ok(())
        },
    )?;
    Ok(())
}

fn guest_memory(caller: &mut Caller<'_, HostState>) -> anyhow::Result<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Ok(memory),
        _ => Err(anyhow::anyhow!("missing exported memory")),
    }
}

/// Bounds-checked `(offset, len)` range inside guest memory
fn guest_range(
    caller: &mut Caller<'_, HostState>,
    memory: &Memory,
    ptr: i32,
    len: i32,
) -> anyhow::Result<(usize, usize)> {
    if ptr < 0 || len < 0 {
        return Err(anyhow::anyhow!("negative pointer/length"));
    }
    let ptr = ptr as usize;
    let len = len as usize;
    let end = ptr
        .checked_add(len)
        .ok_or_else(|| anyhow::anyhow!("pointer overflow"))?;
    if end > memory.data_size(&mut *caller) {
        return Err(anyhow::anyhow!("memory access out-of-bounds"));
    }
    Ok((ptr, len))
}

fn read_guest_memory(
    caller: &mut Caller<'_, HostState>,
    ptr: i32,
    len: i32,
) -> anyhow::Result<Vec<u8>> {
    let memory = guest_memory(caller)?;
    let (ptr, len) = guest_range(caller, &memory, ptr, len)?;
    if len > MAX_HOST_STRING {
        return Err(anyhow::anyhow!("string of {} bytes exceeds host limit", len));
    }
    let mut data = vec![0_u8; len];
    memory.read(&mut *caller, ptr, &mut data)?;
    Ok(data)
}

fn read_guest_str(caller: &mut Caller<'_, HostState>, ptr: i32, len: i32) -> anyhow::Result<String> {
    let data = read_guest_memory(caller, ptr, len)?;
    String::from_utf8(data).map_err(|_| anyhow::anyhow!("string is not valid utf-8"))
}

/// Copy up to `cap` bytes of `value` to the guest; returns the full length or -1
fn write_guest_string(
    caller: &mut Caller<'_, HostState>,
    value: Option<String>,
    buf: i32,
    cap: i32,
) -> anyhow::Result<i32> {
    let Some(value) = value else {
        return Ok(-1);
    };
    let full_len = i32::try_from(value.len())?;
    let memory = guest_memory(caller)?;
    let (buf, cap) = guest_range(caller, &memory, buf, cap)?;
    let n = value.len().min(cap);
    memory.write(&mut *caller, buf, &value.as_bytes()[..n])?;
    Ok(full_len)
}
