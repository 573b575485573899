//! Host boundary
//!
//! The host runtime sees the bridge as a native module named
//! `Elixir.ExDawn.Native` exporting five functions. This module decodes host
//! terms into bridge arguments, dispatches by name and arity, and encodes the
//! outcome as `{ok, Value}`, `ok` or `{error, Reason}`.
//!
//! [`NifModule::load`] is the load hook: it registers the resource types and
//! fails the whole load if any registration fails. [`load`] and [`call`] do
//! the same against a process-wide module that can be loaded exactly once.

mod term;

pub use term::Term;

use std::sync::{Arc, OnceLock};

use rustc_hash::FxHashMap;

use crate::bridge::Bridge;
use crate::errors::{BridgeError, Result};
use crate::native::NativeApi;
use crate::registry::ResourceHandle;
use crate::settings::BridgeSettings;

/// Host-visible module name.
pub const MODULE_NAME: &str = "Elixir.ExDawn.Native";

pub type NifFn = fn(&Bridge, &[Term]) -> Result<Term>;

/// One exported function.
#[derive(Clone, Copy)]
pub struct NifFunc {
    pub name: &'static str,
    pub arity: usize,
    pub fun: NifFn,
}

/// Export table.
pub const NIF_FUNCS: [NifFunc; 5] = [
    NifFunc { name: "create_instance", arity: 0, fun: nif_create_instance },
    NifFunc { name: "create_adapter", arity: 1, fun: nif_create_adapter },
    NifFunc { name: "create_device", arity: 1, fun: nif_create_device },
    NifFunc { name: "create_buffer", arity: 3, fun: nif_create_buffer },
    NifFunc { name: "write_buffer", arity: 3, fun: nif_write_buffer },
];

// ============================================================================
// Argument decoding
// ============================================================================

fn resource(term: &Term, invalid: BridgeError) -> Result<&ResourceHandle> {
    match term {
        Term::Resource(handle) => Ok(handle),
        _ => Err(invalid),
    }
}

fn size(term: &Term) -> Result<u64> {
    match term {
        Term::Int(value) => u64::try_from(*value).map_err(|_| BridgeError::InvalidSize),
        _ => Err(BridgeError::InvalidSize),
    }
}

fn usage_tokens(term: &Term) -> Result<Vec<&str>> {
    let Term::List(items) = term else {
        return Err(BridgeError::InvalidUsage(format!("{term:?}")));
    };
    items
        .iter()
        .map(|item| item.as_text().ok_or_else(|| BridgeError::InvalidUsage(format!("{item:?}"))))
        .collect()
}

fn binary(term: &Term) -> Result<&[u8]> {
    match term {
        Term::Binary(bytes) => Ok(bytes),
        other => Err(BridgeError::WriteFailed(format!("expected a binary, got {other:?}"))),
    }
}

// ============================================================================
// Exported functions
// ============================================================================

fn nif_create_instance(bridge: &Bridge, _args: &[Term]) -> Result<Term> {
    bridge.create_instance().map(Term::ok_resource)
}

fn nif_create_adapter(bridge: &Bridge, args: &[Term]) -> Result<Term> {
    let instance = resource(&args[0], BridgeError::InvalidInstance)?;
    bridge.create_adapter(instance).map(Term::ok_resource)
}

fn nif_create_device(bridge: &Bridge, args: &[Term]) -> Result<Term> {
    let adapter = resource(&args[0], BridgeError::InvalidAdapter)?;
    bridge.create_device(adapter).map(Term::ok_resource)
}

fn nif_create_buffer(bridge: &Bridge, args: &[Term]) -> Result<Term> {
    let device = resource(&args[0], BridgeError::InvalidDevice)?;
    let size = size(&args[1])?;
    let usage = usage_tokens(&args[2])?;
    bridge.create_buffer(device, size, usage).map(Term::ok_resource)
}

fn nif_write_buffer(bridge: &Bridge, args: &[Term]) -> Result<Term> {
    let device = resource(&args[0], BridgeError::InvalidDevice)?;
    let buffer = resource(&args[1], BridgeError::InvalidBuffer)?;
    let data = binary(&args[2])?;
    bridge.write_buffer(device, buffer, data).map(|()| Term::atom("ok"))
}

// ============================================================================
// Module
// ============================================================================

/// A loaded native module: the bridge plus its export table.
pub struct NifModule {
    bridge: Bridge,
    exports: FxHashMap<&'static str, NifFunc>,
}

impl NifModule {
    /// Load hook. Any resource-type registration failure aborts the load.
    pub fn load(api: Arc<dyn NativeApi>, settings: BridgeSettings) -> Result<Self> {
        let bridge = Bridge::load(api, settings)?;
        let exports = NIF_FUNCS
            .iter()
            .map(|f| (f.name, *f))
            .collect();
        log::info!("{MODULE_NAME} loaded with {} exports", NIF_FUNCS.len());
        Ok(Self { bridge, exports })
    }

    #[must_use]
    pub fn bridge(&self) -> &Bridge {
        &self.bridge
    }

    /// Calls an exported function. Every failure comes back as a term.
    #[must_use]
    pub fn call(&self, name: &str, args: &[Term]) -> Term {
        let Some(func) = self
            .exports
            .get(name)
            .filter(|func| func.arity == args.len())
        else {
            let err = BridgeError::UnknownFunction {
                name: name.to_string(),
                arity: args.len(),
            };
            log::warn!("{err}");
            return Term::error(&err);
        };
        (func.fun)(&self.bridge, args).unwrap_or_else(|err| {
            log::debug!("{name}/{} -> {err}", args.len());
            Term::error(&err)
        })
    }
}

static MODULE: OnceLock<NifModule> = OnceLock::new();

/// Loads the process-wide module. A second load is refused.
pub fn load(api: Arc<dyn NativeApi>, settings: BridgeSettings) -> Result<&'static NifModule> {
    if MODULE.get().is_some() {
        return Err(BridgeError::NotLoaded("module already loaded".to_string()));
    }
    let module = NifModule::load(api, settings)?;
    MODULE
        .set(module)
        .map_err(|_| BridgeError::NotLoaded("module already loaded".to_string()))?;
    module_ref()
}

fn module_ref() -> Result<&'static NifModule> {
    MODULE
        .get()
        .ok_or_else(|| BridgeError::NotLoaded("module not loaded".to_string()))
}

/// Calls into the process-wide module.
#[must_use]
pub fn call(name: &str, args: &[Term]) -> Term {
    match module_ref() {
        Ok(module) => module.call(name, args),
        Err(err) => Term::error(&err),
    }
}
