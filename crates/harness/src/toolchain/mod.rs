//! Cross-compilation of test programs.
//!
//! The toolchain invoker turns one test source plus the fixed runtime into a
//! bare-metal ELF image. It performs:
//! 1. **Input checks:** The source, every runtime file, and the linker script must exist.
//! 2. **Invocation:** One compiler process with a fixed argument order and a timeout.
//! 3. **Validation:** The output must parse as a 32-bit RISC-V executable; anything
//!    else is removed so no simulator ever sees it.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::common::{CommandLine, CompileError, ExitState};
use crate::config::Config;

/// ELF validation of compiler output.
pub mod elf;

pub use elf::{ElfImage, LoadSegment};

/// Everything needed for one compiler invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationRequest {
    /// The test program.
    pub source: PathBuf,
    /// Where the image is written.
    pub output: PathBuf,
    /// Runtime sources linked before the test program, in order.
    pub runtime_files: Vec<PathBuf>,
    /// Linker script placing the image in memory.
    pub linker_script: PathBuf,
    /// Header search directories.
    pub include_dirs: Vec<PathBuf>,
    /// Target, link-mode, define, and extra flags, in order.
    pub flags: Vec<String>,
}

impl CompilationRequest {
    /// Compiler arguments, excluding the compiler itself.
    ///
    /// Order: flags, `-I <dir>` per include directory, `-Wl,-T <script>`,
    /// the runtime files, the source, then `-o <output>`. Paths are always
    /// standalone arguments so commas in them reach the compiler intact.
    pub fn arguments(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.flags.iter().map(OsString::from).collect();
        for dir in &self.include_dirs {
            args.push(OsString::from("-I"));
            args.push(dir.as_os_str().to_owned());
        }
        args.push(OsString::from("-Wl,-T"));
        args.push(self.linker_script.as_os_str().to_owned());
        args.extend(self.runtime_files.iter().map(|file| file.as_os_str().to_owned()));
        args.push(self.source.as_os_str().to_owned());
        args.push(OsString::from("-o"));
        args.push(self.output.as_os_str().to_owned());
        args
    }

    /// Checks that every input file exists.
    pub fn check_inputs(&self) -> Result<(), CompileError> {
        let inputs = std::iter::once(("source file", &self.source))
            .chain(self.runtime_files.iter().map(|file| ("runtime file", file)))
            .chain(std::iter::once(("linker script", &self.linker_script)));
        for (role, path) in inputs {
            if !path.is_file() {
                return Err(CompileError::MissingInput {
                    role,
                    path: path.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Compiles test programs with the configured cross-compiler.
#[derive(Debug, Clone)]
pub struct Toolchain {
    compiler: PathBuf,
    runtime_dir: PathBuf,
    runtime_files: Vec<PathBuf>,
    linker_script: PathBuf,
    flags: Vec<String>,
    timeout: Duration,
}

impl Toolchain {
    /// Creates an invoker from the resolved configuration.
    pub fn new(config: &Config) -> Self {
        let target = &config.target;
        let mut flags = vec![format!("-march={}", target.march)];
        if let Some(abi) = &target.mabi {
            flags.push(format!("-mabi={abi}"));
        }
        flags.push(format!("-mcmodel={}", target.code_model));
        flags.extend(target.freestanding.iter().cloned());
        flags.extend(target.defines.iter().map(|define| format!("-D{define}")));
        flags.extend(target.extra_flags.iter().cloned());

        Self {
            compiler: config.toolchain.compiler.clone(),
            runtime_dir: config.toolchain.runtime_dir.clone(),
            runtime_files: config.toolchain.runtime_file_paths(),
            linker_script: config.toolchain.linker_script_path(),
            flags,
            timeout: config.limits.compile_timeout(),
        }
    }

    /// Builds the request compiling `source` into `output` with the fixed runtime.
    pub fn request(&self, source: &Path, output: &Path) -> CompilationRequest {
        CompilationRequest {
            source: source.to_path_buf(),
            output: output.to_path_buf(),
            runtime_files: self.runtime_files.clone(),
            linker_script: self.linker_script.clone(),
            include_dirs: vec![self.runtime_dir.clone()],
            flags: self.flags.clone(),
        }
    }

    /// The exact command line [`Toolchain::compile`] would run for `request`.
    pub fn command_line(&self, request: &CompilationRequest) -> CommandLine {
        let mut command = CommandLine::new(&self.compiler);
        command.extend(request.arguments());
        command
    }

    /// Compiles `request` and validates the result.
    ///
    /// Any stale output is removed first and the output directory is created.
    /// On every failure path the output is removed again, so a failed compile
    /// never leaves an image behind.
    ///
    /// # Arguments
    ///
    /// * `request` - Source, runtime, and output paths plus flags.
    ///
    /// # Returns
    ///
    /// The validated image, or the [`CompileError`] describing why there is none.
    pub fn compile(&self, request: &CompilationRequest) -> Result<ElfImage, CompileError> {
        request.check_inputs()?;
        let output = &request.output;
        remove_stale(output)?;
        if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| CompileError::Output {
                path: output.clone(),
                source,
            })?;
        }

        let command = self.command_line(request);
        debug!(command = %command, "compiling");
        let captured = command
            .run(self.timeout)
            .map_err(|source| CompileError::Spawn {
                program: self.compiler.clone(),
                source,
            })?;

        let result = match captured.status {
            ExitState::TimedOut => Err(CompileError::TimedOut {
                timeout: self.timeout,
            }),
            status if !status.success() => {
                let stream = if captured.stderr.is_empty() {
                    &captured.stdout
                } else {
                    &captured.stderr
                };
                Err(CompileError::Failed {
                    status,
                    stderr: String::from_utf8_lossy(stream).into_owned(),
                })
            }
            _ => ElfImage::read(output),
        };

        if result.is_err() {
            let _ = fs::remove_file(output);
        }
        result
    }
}

fn remove_stale(output: &Path) -> Result<(), CompileError> {
    match fs::remove_file(output) {
        Ok(()) => {
            debug!(output = %output.display(), "removed stale output");
            Ok(())
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(CompileError::Output {
            path: output.to_path_buf(),
            source,
        }),
    }
}
