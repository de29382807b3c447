//! A register-based, NaN-boxed-value bytecode interpreter with a tracing
//! JIT compiler for a small scripting language.
//!
//! [`Vm`] is the single owned container for everything a running program
//! needs — packages, functions, constants, the runtime stack — matching the
//! single-container embedding style the design favors over global mutable
//! state. A host drives it through four calls: [`Vm::new_package`] to
//! register a compilation unit, [`Vm::parse`] to compile source into it,
//! [`Vm::run_string`] to compile and run in one step, and (behind the
//! `std-io` feature) [`Vm::run_file`] as a thin convenience over the two.
//!
//! ```
//! use tracelang::Vm;
//!
//! let mut vm = Vm::new();
//! let pkg = vm.new_package("main");
//! vm.run_string(pkg, b"let a = 1 + 2;").unwrap();
//! ```

mod bytecode;
mod config;
mod error;
mod fnv;
mod interpreter;
mod ir;
mod jit;
mod lexer;
mod parser;
mod trace;
mod value;
mod vm;

pub use bytecode::{Args, Instruction, Opcode};
pub use config::VmConfig;
pub use error::{Error, Location, Result};
pub use value::{Primitive, Value};
pub use vm::{FuncId, PkgId, Vm};

impl Vm {
    /// Compile `source` as the body of `pkg`'s `main` function. On success,
    /// `self.package(pkg).main()` is populated. The VM's function and
    /// constant tables are not rolled back if this returns `Err` — see
    /// the design notes on that open question.
    pub fn parse(&mut self, pkg: PkgId, file: Option<String>, source: &[u8]) -> Result<()> {
        parser::parse(self, pkg, file, source)
    }

    /// Compile and immediately run `source` as `pkg`'s `main` function.
    pub fn run_string(&mut self, pkg: PkgId, source: &[u8]) -> Result<()> {
        self.parse(pkg, None, source)?;
        let main = self.package(pkg).main().expect("parse always sets a package's main on success");
        interpreter::run(self, main)?;
        Ok(())
    }

    /// Read `path`, then [`Vm::run_string`] it. A thin `std::fs::read`
    /// wrapper: the core itself never touches the filesystem, matching the
    /// embedding contract's "no persistent on-disk formats" boundary — this
    /// exists purely so a CLI host doesn't have to repeat the glue.
    #[cfg(feature = "std-io")]
    pub fn run_file(&mut self, pkg: PkgId, path: impl AsRef<std::path::Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read(path).map_err(|e| {
            Error::runtime(e.to_string(), Location::unknown().with_file(path.display().to_string()))
        })?;
        self.parse(pkg, Some(path.display().to_string()), &source)?;
        let main = self.package(pkg).main().expect("parse always sets a package's main on success");
        interpreter::run(self, main)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_string_compiles_and_executes() {
        let mut vm = Vm::new();
        let pkg = vm.new_package("main");
        vm.run_string(pkg, b"let a = 1 + 2 * 3;").unwrap();
    }

    #[test]
    fn parse_error_surfaces_file_and_line() {
        let mut vm = Vm::new();
        let pkg = vm.new_package("main");
        let err = vm.parse(pkg, Some("main.tl".into()), b"let = 1;").unwrap_err();
        assert_eq!(err.file(), Some("main.tl"));
    }

    #[cfg(feature = "std-io")]
    #[test]
    fn run_file_reports_a_runtime_error_for_a_missing_file() {
        let mut vm = Vm::new();
        let pkg = vm.new_package("main");
        assert!(vm.run_file(pkg, "/nonexistent/path/does/not/exist.tl").is_err());
    }
}
