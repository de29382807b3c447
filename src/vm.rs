//! Owned VM state: functions, packages, constants and the runtime stack.
//!
//! The [`Vm`] is the single explicit container for everything a running
//! program needs (design §5: no global mutable state, multiple `Vm`s share
//! nothing). Function and constant tables are append-only once published,
//! so every index handed out is permanent for the lifetime of the `Vm`.

use crate::bytecode::Instruction;
use crate::config::VmConfig;
use crate::error::{Error, Location, Result};
use crate::fnv;
use crate::value::Value;

/// Sentinel package "main" function index meaning "anonymous package, no
/// entry function registered yet".
const NO_MAIN: u32 = u32::MAX;

/// Index into [`Vm::functions`]. A thin newtype so a function index can
/// never be silently passed where a [`PkgId`] was expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

/// Index into [`Vm::packages`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PkgId(pub u32);

/// A compiled function: its own instruction array plus enough metadata to
/// set up a call frame for it.
#[derive(Debug, Clone, Default)]
pub struct Function {
    code: Vec<Instruction>,
    package: u32,
    arity: u8,
}

impl Function {
    pub(crate) fn new(package: u32, arity: u8) -> Self {
        Self {
            code: Vec::new(),
            package,
            arity,
        }
    }

    pub fn code(&self) -> &[Instruction] {
        &self.code
    }

    pub(crate) fn code_mut(&mut self) -> &mut Vec<Instruction> {
        &mut self.code
    }

    pub fn package(&self) -> u32 {
        self.package
    }

    pub fn arity(&self) -> u8 {
        self.arity
    }

    /// Set once parsing has seen the full parameter list, which happens
    /// after `new_function` has already handed out this function's id.
    pub(crate) fn set_arity(&mut self, arity: u8) {
        self.arity = arity;
    }

    /// Instruction count, i.e. the program counter value one past the end
    /// of this function — used to validate jump targets (design §8).
    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

/// A named package: the FNV-1a hash of its name, plus the function index of
/// its `main` entry point once one has been parsed into it.
#[derive(Debug, Clone, Copy)]
pub struct Package {
    name_hash: u64,
    main: u32,
}

impl Package {
    pub fn name_hash(&self) -> u64 {
        self.name_hash
    }

    pub fn main(&self) -> Option<FuncId> {
        (self.main != NO_MAIN).then_some(FuncId(self.main))
    }
}

/// Owns every growable table a running program needs: packages, functions,
/// deduplicated numeric constants and the runtime value stack.
pub struct Vm {
    config: VmConfig,
    packages: Vec<Package>,
    functions: Vec<Function>,
    constants: Vec<f64>,
    stack: Vec<Value>,
    /// Most recent error, held while unwinding (design §7). Surfaced to
    /// embedders mostly for parity with the C-shaped `Option<Error>`
    /// contract; Rust callers get the error back directly via `Result`.
    last_error: Option<Error>,
}

impl Vm {
    pub fn new() -> Self {
        Self::with_config(VmConfig::default())
    }

    pub fn with_config(config: VmConfig) -> Self {
        let stack = vec![Value::NIL; config.stack_size];
        Self {
            config,
            packages: Vec::new(),
            functions: Vec::new(),
            constants: Vec::new(),
            stack,
            last_error: None,
        }
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Register a new, empty package and return its id. `name` may be empty
    /// for an anonymous package (e.g. a REPL chunk); such packages still get
    /// a distinct id, they just hash the empty string.
    pub fn new_package(&mut self, name: &str) -> PkgId {
        let id = PkgId(self.packages.len() as u32);
        self.packages.push(Package {
            name_hash: fnv::hash(name.as_bytes()),
            main: NO_MAIN,
        });
        tracing::debug!(package = name, id = id.0, "registered package");
        id
    }

    pub fn package(&self, id: PkgId) -> &Package {
        &self.packages[id.0 as usize]
    }

    pub(crate) fn set_package_main(&mut self, id: PkgId, main: FuncId) {
        self.packages[id.0 as usize].main = main.0;
    }

    /// Allocate a new function owned by `package`, returning its permanent
    /// index.
    pub(crate) fn new_function(&mut self, package: PkgId, arity: u8) -> FuncId {
        let id = FuncId(self.functions.len() as u32);
        self.functions.push(Function::new(package.0, arity));
        id
    }

    pub fn function(&self, id: FuncId) -> &Function {
        &self.functions[id.0 as usize]
    }

    pub(crate) fn function_mut(&mut self, id: FuncId) -> &mut Function {
        &mut self.functions[id.0 as usize]
    }

    pub fn function_count(&self) -> usize {
        self.functions.len()
    }

    /// Intern a numeric constant, deduplicating by exact bit pattern (so
    /// `-0.0` and `0.0` are distinct, matching the IEEE distinction the
    /// interpreter itself preserves). Bounded by
    /// [`VmConfig::max_constants`] so the index always fits the 16-bit
    /// instruction field that carries it.
    pub(crate) fn intern_constant(&mut self, value: f64, at: Location) -> Result<u16> {
        if let Some(idx) = self
            .constants
            .iter()
            .position(|c| c.to_bits() == value.to_bits())
        {
            return Ok(idx as u16);
        }
        if self.constants.len() >= self.config.max_constants {
            return Err(Error::parse("too many constants", at));
        }
        self.constants.push(value);
        Ok((self.constants.len() - 1) as u16)
    }

    pub fn constant(&self, idx: u16) -> f64 {
        self.constants[idx as usize]
    }

    pub fn constant_count(&self) -> usize {
        self.constants.len()
    }

    pub(crate) fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub(crate) fn stack_mut(&mut self) -> &mut [Value] {
        &mut self.stack
    }

    /// Read back a top-level local by its slot after `run_string`/`run_file`
    /// returns: `run_string` itself only reports success or an `Error`, so a
    /// host that wants a script's bindings (a config file, a REPL chunk) has
    /// to reach in here rather than get a return value threaded out.
    pub fn stack_value(&self, slot: usize) -> Value {
        self.stack[slot]
    }

    pub(crate) fn set_last_error(&mut self, err: Error) {
        self.last_error = Some(err);
    }

    /// The most recently raised error, if any. Cleared by neither parsing
    /// nor running; callers interested in fresh status should inspect the
    /// `Result` returned by `parse`/`run_string` directly.
    pub fn last_error(&self) -> Option<&Error> {
        self.last_error.as_ref()
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constants_are_deduplicated() {
        let mut vm = Vm::new();
        let a = vm.intern_constant(3.0, Location::unknown()).unwrap();
        let b = vm.intern_constant(3.0, Location::unknown()).unwrap();
        let c = vm.intern_constant(4.0, Location::unknown()).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(vm.constant_count(), 2);
    }

    #[test]
    fn negative_zero_is_distinct_from_zero() {
        let mut vm = Vm::new();
        let a = vm.intern_constant(0.0, Location::unknown()).unwrap();
        let b = vm.intern_constant(-0.0, Location::unknown()).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn anonymous_package_has_no_main_until_set() {
        let mut vm = Vm::new();
        let pkg = vm.new_package("");
        assert!(vm.package(pkg).main().is_none());
        let f = vm.new_function(pkg, 0);
        vm.set_package_main(pkg, f);
        assert_eq!(vm.package(pkg).main(), Some(f));
    }
}
