//! Harness configuration.
//!
//! This module defines the immutable record every component is constructed from.
//! It provides:
//! 1. **Defaults:** Tool names, fixture locations, target flags, and timeouts.
//! 2. **Structures:** Toolchain, target, simulator, path, memory, comparison, and limit settings.
//! 3. **Loading:** Defaults, then an optional JSON file, then environment overrides.
//! 4. **Preflight:** Resolution of every tool and directory before any case runs.
//!
//! A config is built once at process start and passed by reference afterwards;
//! nothing in the harness looks up tools or directories on its own.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::common::{MemoryLayout, MissingPath, SetupError};
use crate::compare::ExitStatusPolicy;
use crate::sim::TextEncoding;

/// Default configuration constants for the harness.
mod defaults {
    /// Cross-compiler driver.
    pub const COMPILER: &str = "riscv32-unknown-elf-gcc";

    /// Cross-assembler.
    pub const ASSEMBLER: &str = "riscv32-unknown-elf-as";

    /// Reference simulator.
    pub const ORACLE: &str = "spike";

    /// Simulator under test.
    pub const UNDER_TEST: &str = "rvsim";

    /// Directory holding the bare-metal runtime.
    pub const RUNTIME_DIR: &str = "runtime";

    /// Linker script, relative to the runtime directory.
    pub const LINKER_SCRIPT: &str = "kernel.lds";

    /// Runtime sources linked into every program, in link order.
    ///
    /// The entry trampoline must come first so it lands at the start of `.text`.
    pub const RUNTIME_FILES: [&str; 3] = ["init.S", "htif.c", "util.c"];

    /// Directory holding one subdirectory per test program.
    pub const PROGRAMS_DIR: &str = "programs";

    /// Directory compiled images are written to.
    pub const SCRATCH_DIR: &str = "target/difftest";

    /// Base ISA string.
    pub const MARCH: &str = "rv32im";

    /// Code model; `medany` lets the image live anywhere in the low 2 GiB.
    pub const CODE_MODEL: &str = "medany";

    /// Flags for a freestanding static link.
    pub const FREESTANDING: [&str; 2] = ["-nostdlib", "-static"];

    /// Preprocessor defines for every program.
    pub const DEFINES: [&str; 1] = ["KERNEL"];

    /// Upper bound on one compiler invocation, in milliseconds.
    pub const COMPILE_TIMEOUT_MS: u64 = 60_000;

    /// Upper bound on one simulator run, in milliseconds.
    pub const SIMULATE_TIMEOUT_MS: u64 = 10_000;

    /// Runs per simulator and case.
    pub const REPEAT: u32 = 1;
}

/// Environment variables that override configured paths.
pub mod env {
    /// Cross-compiler driver.
    pub const COMPILER: &str = "RISCV_UNKNOWN_ELF_GCC";
    /// Cross-assembler.
    pub const ASSEMBLER: &str = "RISCV_UNKNOWN_ELF_AS";
    /// Reference simulator executable.
    pub const ORACLE: &str = "RISCV_SPIKE";
    /// Simulator-under-test executable.
    pub const UNDER_TEST: &str = "RVSIM";
    /// Runtime fixture directory.
    pub const RUNTIME_DIR: &str = "RUNTIME_DIR";
    /// Test program directory.
    pub const PROGRAMS_DIR: &str = "PROGRAMS_DIR";
    /// Directory compiled images are written to.
    pub const SCRATCH_DIR: &str = "BINARY_DIR";
}

/// Top-level harness configuration.
///
/// Every field has a default, so an empty JSON object is a complete config.
///
/// # Example
///
/// ```
/// use rvsim_difftest::Config;
///
/// let config: Config = serde_json::from_str(r#"{
///     "target": { "march": "rv32imc" },
///     "limits": { "max_cycles": 1000000 }
/// }"#).unwrap();
///
/// assert_eq!(config.target.oracle_isa(), "RV32IMC");
/// assert_eq!(config.limits.max_cycles, Some(1_000_000));
/// assert_eq!(config.comparison.repeat, 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Compiler, assembler, and runtime fixtures.
    #[serde(default)]
    pub toolchain: ToolchainPaths,
    /// Flags selecting the target ISA and link mode.
    #[serde(default)]
    pub target: TargetFlags,
    /// Simulator executables.
    #[serde(default)]
    pub simulators: SimulatorPaths,
    /// Program and scratch directories.
    #[serde(default)]
    pub paths: PathsConfig,
    /// Memory map handed to both simulators.
    #[serde(default)]
    pub memory: MemoryLayout,
    /// How outputs are decoded and compared.
    #[serde(default)]
    pub comparison: ComparisonConfig,
    /// Timeouts and cycle bounds.
    #[serde(default)]
    pub limits: LimitsConfig,
}

/// Cross-toolchain and runtime fixture locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainPaths {
    /// Compiler driver; a bare name is looked up on `PATH`.
    #[serde(default = "ToolchainPaths::default_compiler")]
    pub compiler: PathBuf,

    /// Assembler; checked by preflight so a half-installed toolchain is caught early.
    #[serde(default = "ToolchainPaths::default_assembler")]
    pub assembler: PathBuf,

    /// Directory with the runtime sources, headers, and linker script.
    #[serde(default = "ToolchainPaths::default_runtime_dir")]
    pub runtime_dir: PathBuf,

    /// Linker script, relative to `runtime_dir` unless absolute.
    #[serde(default = "ToolchainPaths::default_linker_script")]
    pub linker_script: PathBuf,

    /// Runtime sources in link order, relative to `runtime_dir` unless absolute.
    #[serde(default = "ToolchainPaths::default_runtime_files")]
    pub runtime_files: Vec<PathBuf>,
}

impl ToolchainPaths {
    fn default_compiler() -> PathBuf {
        PathBuf::from(defaults::COMPILER)
    }

    fn default_assembler() -> PathBuf {
        PathBuf::from(defaults::ASSEMBLER)
    }

    fn default_runtime_dir() -> PathBuf {
        PathBuf::from(defaults::RUNTIME_DIR)
    }

    fn default_linker_script() -> PathBuf {
        PathBuf::from(defaults::LINKER_SCRIPT)
    }

    fn default_runtime_files() -> Vec<PathBuf> {
        defaults::RUNTIME_FILES.iter().map(PathBuf::from).collect()
    }

    /// Full path of the linker script.
    pub fn linker_script_path(&self) -> PathBuf {
        self.runtime_dir.join(&self.linker_script)
    }

    /// Full paths of the runtime sources, in link order.
    pub fn runtime_file_paths(&self) -> Vec<PathBuf> {
        self.runtime_files
            .iter()
            .map(|file| self.runtime_dir.join(file))
            .collect()
    }
}

impl Default for ToolchainPaths {
    fn default() -> Self {
        Self {
            compiler: Self::default_compiler(),
            assembler: Self::default_assembler(),
            runtime_dir: Self::default_runtime_dir(),
            linker_script: Self::default_linker_script(),
            runtime_files: Self::default_runtime_files(),
        }
    }
}

/// Compiler flags that select the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFlags {
    /// Value of `-march`.
    #[serde(default = "TargetFlags::default_march")]
    pub march: String,

    /// Value of `-mabi`; omitted from the command line when unset.
    #[serde(default)]
    pub mabi: Option<String>,

    /// Value of `-mcmodel`.
    #[serde(default = "TargetFlags::default_code_model")]
    pub code_model: String,

    /// Flags for a freestanding link.
    #[serde(default = "TargetFlags::default_freestanding")]
    pub freestanding: Vec<String>,

    /// Names passed as `-D<name>`.
    #[serde(default = "TargetFlags::default_defines")]
    pub defines: Vec<String>,

    /// Additional flags appended after the defines.
    #[serde(default)]
    pub extra_flags: Vec<String>,

    /// ISA string for the oracle; derived from `march` when unset.
    #[serde(default)]
    pub oracle_isa: Option<String>,
}

impl TargetFlags {
    fn default_march() -> String {
        defaults::MARCH.to_string()
    }

    fn default_code_model() -> String {
        defaults::CODE_MODEL.to_string()
    }

    fn default_freestanding() -> Vec<String> {
        defaults::FREESTANDING.iter().map(ToString::to_string).collect()
    }

    fn default_defines() -> Vec<String> {
        defaults::DEFINES.iter().map(ToString::to_string).collect()
    }

    /// The ISA string handed to the oracle, e.g. `RV32IM` for `-march=rv32im`.
    pub fn oracle_isa(&self) -> String {
        self.oracle_isa
            .clone()
            .unwrap_or_else(|| self.march.to_uppercase())
    }
}

impl Default for TargetFlags {
    fn default() -> Self {
        Self {
            march: Self::default_march(),
            mabi: None,
            code_model: Self::default_code_model(),
            freestanding: Self::default_freestanding(),
            defines: Self::default_defines(),
            extra_flags: Vec::new(),
            oracle_isa: None,
        }
    }
}

/// Simulator executables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulatorPaths {
    /// Reference simulator; a bare name is looked up on `PATH`.
    #[serde(default = "SimulatorPaths::default_oracle")]
    pub oracle: PathBuf,

    /// Simulator under test; a bare name is looked up on `PATH`.
    #[serde(default = "SimulatorPaths::default_under_test")]
    pub under_test: PathBuf,
}

impl SimulatorPaths {
    fn default_oracle() -> PathBuf {
        PathBuf::from(defaults::ORACLE)
    }

    fn default_under_test() -> PathBuf {
        PathBuf::from(defaults::UNDER_TEST)
    }
}

impl Default for SimulatorPaths {
    fn default() -> Self {
        Self {
            oracle: Self::default_oracle(),
            under_test: Self::default_under_test(),
        }
    }
}

/// Where programs are found and images are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// One subdirectory per test program.
    #[serde(default = "PathsConfig::default_programs_dir")]
    pub programs_dir: PathBuf,

    /// Compiled images; created by preflight if missing.
    #[serde(default = "PathsConfig::default_scratch_dir")]
    pub scratch_dir: PathBuf,
}

impl PathsConfig {
    fn default_programs_dir() -> PathBuf {
        PathBuf::from(defaults::PROGRAMS_DIR)
    }

    fn default_scratch_dir() -> PathBuf {
        PathBuf::from(defaults::SCRATCH_DIR)
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            programs_dir: Self::default_programs_dir(),
            scratch_dir: Self::default_scratch_dir(),
        }
    }
}

/// Output decoding and comparison settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonConfig {
    /// Encoding stdout is decoded with.
    #[serde(default)]
    pub encoding: TextEncoding,

    /// Whether an exit-status divergence fails a case.
    #[serde(default)]
    pub exit_status: ExitStatusPolicy,

    /// Runs per simulator and case; above one, runs must agree exactly.
    #[serde(default = "ComparisonConfig::default_repeat")]
    pub repeat: u32,
}

impl ComparisonConfig {
    fn default_repeat() -> u32 {
        defaults::REPEAT
    }

    /// Effective repetition count; zero is treated as one.
    pub fn runs(&self) -> u32 {
        self.repeat.max(1)
    }
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            encoding: TextEncoding::default(),
            exit_status: ExitStatusPolicy::default(),
            repeat: defaults::REPEAT,
        }
    }
}

/// Time and cycle bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Upper bound on one compiler invocation, in milliseconds.
    #[serde(default = "LimitsConfig::default_compile_timeout_ms")]
    pub compile_timeout_ms: u64,

    /// Upper bound on one simulator run, in milliseconds.
    #[serde(default = "LimitsConfig::default_simulate_timeout_ms")]
    pub simulate_timeout_ms: u64,

    /// Cycle bound passed to the simulator under test; unbounded when unset.
    #[serde(default)]
    pub max_cycles: Option<u64>,
}

impl LimitsConfig {
    fn default_compile_timeout_ms() -> u64 {
        defaults::COMPILE_TIMEOUT_MS
    }

    fn default_simulate_timeout_ms() -> u64 {
        defaults::SIMULATE_TIMEOUT_MS
    }

    /// Compile timeout as a [`Duration`].
    pub const fn compile_timeout(&self) -> Duration {
        Duration::from_millis(self.compile_timeout_ms)
    }

    /// Simulation timeout as a [`Duration`].
    pub const fn simulate_timeout(&self) -> Duration {
        Duration::from_millis(self.simulate_timeout_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            compile_timeout_ms: defaults::COMPILE_TIMEOUT_MS,
            simulate_timeout_ms: defaults::SIMULATE_TIMEOUT_MS,
            max_cycles: None,
        }
    }
}

impl Config {
    /// Reads a config from a JSON file; missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self, SetupError> {
        let text = fs::read_to_string(path).map_err(|source| SetupError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| SetupError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds the config for a run: defaults or `path`, then process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, SetupError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env(|name| std::env::var_os(name)))
    }

    /// Applies path overrides from an environment.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the value of a variable, or `None` if unset. Empty values are ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let targets: [(&str, &mut PathBuf); 7] = [
            (env::COMPILER, &mut self.toolchain.compiler),
            (env::ASSEMBLER, &mut self.toolchain.assembler),
            (env::ORACLE, &mut self.simulators.oracle),
            (env::UNDER_TEST, &mut self.simulators.under_test),
            (env::RUNTIME_DIR, &mut self.toolchain.runtime_dir),
            (env::PROGRAMS_DIR, &mut self.paths.programs_dir),
            (env::SCRATCH_DIR, &mut self.paths.scratch_dir),
        ];
        for (name, slot) in targets {
            if let Some(value) = lookup(name).filter(|value| !value.is_empty()) {
                debug!(variable = name, value = ?value, "environment override");
                *slot = PathBuf::from(value);
            }
        }
        self
    }

    /// Checks that every tool and directory exists and returns a resolved copy.
    ///
    /// Tools given as bare names are looked up on `PATH` and replaced by absolute
    /// paths. All missing paths are collected and reported together. The scratch
    /// directory is created if it does not exist.
    ///
    /// # Returns
    ///
    /// The resolved config, or [`SetupError::MissingPaths`] listing everything absent.
    pub fn preflight(&self) -> Result<Self, SetupError> {
        let mut resolved = self.clone();
        let mut missing = Vec::new();

        let tools: [(&'static str, &mut PathBuf); 4] = [
            ("compiler", &mut resolved.toolchain.compiler),
            ("assembler", &mut resolved.toolchain.assembler),
            ("oracle simulator", &mut resolved.simulators.oracle),
            ("simulator under test", &mut resolved.simulators.under_test),
        ];
        for (role, slot) in tools {
            match resolve_tool(slot) {
                Some(path) => *slot = path,
                None => missing.push(MissingPath {
                    role,
                    path: slot.clone(),
                }),
            }
        }

        if !resolved.toolchain.runtime_dir.is_dir() {
            missing.push(MissingPath {
                role: "runtime directory",
                path: resolved.toolchain.runtime_dir.clone(),
            });
        } else {
            let script = resolved.toolchain.linker_script_path();
            if !script.is_file() {
                missing.push(MissingPath {
                    role: "linker script",
                    path: script,
                });
            }
            for file in resolved.toolchain.runtime_file_paths() {
                if !file.is_file() {
                    missing.push(MissingPath {
                        role: "runtime file",
                        path: file,
                    });
                }
            }
        }

        if !resolved.paths.programs_dir.is_dir() {
            missing.push(MissingPath {
                role: "programs directory",
                path: resolved.paths.programs_dir.clone(),
            });
        }

        if !missing.is_empty() {
            return Err(SetupError::MissingPaths(missing));
        }

        let scratch = &resolved.paths.scratch_dir;
        fs::create_dir_all(scratch).map_err(|source| SetupError::Scratch {
            path: scratch.clone(),
            source,
        })?;

        debug!(
            compiler = %resolved.toolchain.compiler.display(),
            oracle = %resolved.simulators.oracle.display(),
            under_test = %resolved.simulators.under_test.display(),
            "preflight passed"
        );
        Ok(resolved)
    }
}

/// Resolves a tool to an absolute path; bare names go through `PATH`.
fn resolve_tool(tool: &Path) -> Option<PathBuf> {
    if tool.as_os_str().is_empty() {
        return None;
    }
    if tool.components().count() == 1 && !tool.is_absolute() {
        return which::which(tool).ok();
    }
    if tool.is_file() {
        std::path::absolute(tool).ok()
    } else {
        None
    }
}
