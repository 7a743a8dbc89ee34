//! Compiler collaborator interface and the Cython toolchain implementation
//!
//! A [`Compiler`] turns exactly one compile unit into a native extension
//! module. It is invoked once per unit and never batched, so one unit's
//! failure cannot leak into another's.

use crate::error::{BuildError, BuildResult};
use crate::plan::CompileUnit;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

/// Optimization and safety directives passed to the translator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompilerDirectives {
    pub language_level: u8,
    pub boundscheck: bool,
    pub wraparound: bool,
    pub initializedcheck: bool,
    pub nonecheck: bool,
    pub cdivision: bool,
    pub infer_types: bool,
    pub embedsignature: bool,
}

impl Default for CompilerDirectives {
    fn default() -> Self {
        Self {
            language_level: 3,
            boundscheck: false,
            wraparound: false,
            initializedcheck: false,
            nonecheck: false,
            cdivision: true,
            infer_types: true,
            embedsignature: true,
        }
    }
}

impl CompilerDirectives {
    /// Comma-separated `name=Value` list as understood by `cython --directive`
    pub fn to_directive_arg(&self) -> String {
        let flag = |b: bool| if b { "True" } else { "False" };
        [
            ("boundscheck", self.boundscheck),
            ("wraparound", self.wraparound),
            ("initializedcheck", self.initializedcheck),
            ("nonecheck", self.nonecheck),
            ("cdivision", self.cdivision),
            ("infer_types", self.infer_types),
            ("embedsignature", self.embedsignature),
        ]
        .iter()
        .map(|(name, value)| format!("{}={}", name, flag(*value)))
        .collect::<Vec<_>>()
        .join(",")
    }
}

/// Everything a compiler needs for one unit
#[derive(Debug, Clone, Copy)]
pub struct CompileRequest<'a> {
    pub unit: &'a CompileUnit,
    /// Scratch directory for intermediate files, shared by all units
    pub temp_dir: &'a Path,
    pub directives: &'a CompilerDirectives,
}

/// Structured compiler diagnostic
///
/// `message` always holds the compiler's output verbatim; `line`, `column`
/// and `context` are extracted from it when the compiler reports a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: Option<u32>,
    pub column: Option<u32>,
    pub context: Option<String>,
}

impl Diagnostic {
    /// Unlocated diagnostic
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: None,
            column: None,
            context: None,
        }
    }

    /// Diagnostic for a unit whose source vanished before dispatch
    pub fn source_not_found(path: &Path) -> Self {
        Self::new(format!("source file not found: {}", path.display()))
    }

    /// Parse captured compiler output
    ///
    /// Locations in Python sources are preferred over locations in generated
    /// C files, since only the former mean something to the user.
    pub fn from_compiler_output(output: &str) -> Self {
        let output = output.trim();
        let mut diagnostic = Self::new(if output.is_empty() {
            "unknown compiler error"
        } else {
            output
        });

        let locations: Vec<_> = output.lines().filter_map(parse_location).collect();
        let best = locations
            .iter()
            .find(|loc| loc.file.ends_with(".py") || loc.file.ends_with(".pyx"))
            .or_else(|| locations.first());

        if let Some(loc) = best {
            diagnostic.line = Some(loc.line);
            diagnostic.column = loc.column;
        }
        diagnostic.context = extract_context(output);
        diagnostic
    }

    /// Attach a line number explicitly
    pub fn with_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }

    /// The most informative single line of the message
    pub fn headline(&self) -> &str {
        self.message
            .lines()
            .find(|l| parse_location(l).is_some())
            .or_else(|| self.message.lines().find(|l| !l.trim().is_empty()))
            .unwrap_or("")
            .trim()
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

struct Location<'a> {
    file: &'a str,
    line: u32,
    column: Option<u32>,
}

/// Parse `file:line[:col]: message`
fn parse_location(line: &str) -> Option<Location<'_>> {
    let (head, _) = line.trim().split_once(": ")?;
    let mut parts = head.rsplitn(3, ':');
    let last = parts.next()?;
    let middle = parts.next()?;
    match parts.next() {
        Some(file) if !file.is_empty() => Some(Location {
            file,
            line: middle.parse().ok()?,
            column: Some(last.parse().ok()?),
        }),
        _ if !middle.is_empty() => Some(Location {
            file: middle,
            line: last.parse().ok()?,
            column: None,
        }),
        _ => None,
    }
}

/// Source excerpt printed between two `-----` rulers
fn extract_context(output: &str) -> Option<String> {
    let is_ruler = |l: &str| {
        let t = l.trim();
        t.len() >= 10 && t.chars().all(|c| c == '-')
    };
    let mut lines = output.lines().skip_while(|l| !is_ruler(l));
    lines.next()?;
    let block: Vec<_> = lines.take_while(|l| !is_ruler(l)).collect();
    let text = block.join("\n");
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

/// Turns one compile unit into a native artifact
pub trait Compiler: Send + Sync {
    /// Compile a single unit, returning the path of the produced artifact
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic>;
}

impl<C: Compiler + ?Sized> Compiler for &C {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic> {
        (**self).compile(request)
    }
}

/// External executables used by [`CythonCompiler`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toolchain {
    pub cython: PathBuf,
    pub cc: PathBuf,
    pub python: PathBuf,
    pub cflags: Vec<String>,
}

impl Default for Toolchain {
    fn default() -> Self {
        Self {
            cython: PathBuf::from("cython"),
            cc: PathBuf::from("cc"),
            python: PathBuf::from("python3"),
            cflags: vec!["-O2".to_string()],
        }
    }
}

const PYTHON_LAYOUT_QUERY: &str = "import sysconfig; \
print(sysconfig.get_paths()['include']); \
print(sysconfig.get_config_var('EXT_SUFFIX') or '.so')";

/// Compiles units with `cython` followed by the system C compiler
#[derive(Debug, Clone)]
pub struct CythonCompiler {
    toolchain: Toolchain,
    include_dir: PathBuf,
    ext_suffix: String,
}

impl CythonCompiler {
    /// Query the Python installation for headers and the extension suffix
    pub fn detect(toolchain: Toolchain) -> BuildResult<Self> {
        let output = Command::new(&toolchain.python)
            .arg("-c")
            .arg(PYTHON_LAYOUT_QUERY)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| {
                BuildError::Toolchain(format!("cannot run {}: {}", toolchain.python.display(), e))
            })?;

        if !output.status.success() {
            return Err(BuildError::Toolchain(format!(
                "{} failed to report its layout: {}",
                toolchain.python.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut lines = stdout.lines().map(str::trim);
        let (Some(include), Some(suffix)) = (lines.next(), lines.next()) else {
            return Err(BuildError::Toolchain(format!(
                "unexpected layout output from {}: {}",
                toolchain.python.display(),
                stdout.trim()
            )));
        };

        Ok(Self::with_layout(toolchain, include, suffix))
    }

    /// Use a known Python header directory and extension suffix
    pub fn with_layout(
        toolchain: Toolchain,
        include_dir: impl Into<PathBuf>,
        ext_suffix: impl Into<String>,
    ) -> Self {
        Self {
            toolchain,
            include_dir: include_dir.into(),
            ext_suffix: ext_suffix.into(),
        }
    }

    /// File name suffix of produced extension modules, e.g. `.cpython-312-x86_64-linux-gnu.so`
    pub fn ext_suffix(&self) -> &str {
        &self.ext_suffix
    }

    /// Intermediate C file for a unit
    pub fn c_file_path(&self, request: &CompileRequest<'_>) -> PathBuf {
        request
            .temp_dir
            .join("c")
            .join(format!("{}.c", request.unit.module))
    }

    /// Artifact location inside the scratch directory, mirroring the project layout
    pub fn artifact_path(&self, request: &CompileRequest<'_>) -> PathBuf {
        let file_name = format!("{}{}", request.unit.short_name(), self.ext_suffix);
        match request.unit.relative.parent() {
            Some(parent) => request.temp_dir.join("lib").join(parent).join(file_name),
            None => request.temp_dir.join("lib").join(file_name),
        }
    }

    fn translate(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic> {
        let c_file = self.c_file_path(request);
        ensure_parent(&c_file)?;

        let mut cmd = tool_command(&self.toolchain.cython);
        cmd.arg(format!("-{}", request.directives.language_level))
            .arg("--directive")
            .arg(request.directives.to_directive_arg())
            .arg("--module-name")
            .arg(&request.unit.module)
            .arg("-o")
            .arg(&c_file)
            .arg(&request.unit.source);
        run_tool(&mut cmd, &self.toolchain.cython)?;

        Ok(c_file)
    }

    fn build_extension(
        &self,
        request: &CompileRequest<'_>,
        c_file: &Path,
    ) -> Result<PathBuf, Diagnostic> {
        let artifact = self.artifact_path(request);
        ensure_parent(&artifact)?;

        let mut cmd = tool_command(&self.toolchain.cc);
        cmd.arg("-shared").arg("-fPIC");
        if cfg!(target_os = "macos") {
            cmd.args(["-undefined", "dynamic_lookup"]);
        }
        cmd.args(&self.toolchain.cflags)
            .arg("-I")
            .arg(&self.include_dir)
            .arg("-o")
            .arg(&artifact)
            .arg(c_file);
        run_tool(&mut cmd, &self.toolchain.cc)?;

        Ok(artifact)
    }
}

impl Compiler for CythonCompiler {
    fn compile(&self, request: &CompileRequest<'_>) -> Result<PathBuf, Diagnostic> {
        let c_file = self.translate(request)?;
        self.build_extension(request, &c_file)
    }
}

fn ensure_parent(path: &Path) -> Result<(), Diagnostic> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| {
            Diagnostic::new(format!("cannot create {}: {}", parent.display(), e))
        }),
        None => Ok(()),
    }
}

/// Command for a per-unit tool
///
/// On Unix the child gets its own process group, so a terminal Ctrl-C only
/// reaches pyshield and running units finish on their own.
fn tool_command(program: &Path) -> Command {
    let mut cmd = Command::new(program);
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    cmd
}

/// Run an external tool, turning a non-zero exit into a diagnostic
fn run_tool(cmd: &mut Command, tool: &Path) -> Result<(), Diagnostic> {
    let output = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Diagnostic::new(format!("cannot run {}: {}", tool.display(), e)))?
        .wait_with_output()
        .map_err(|e| Diagnostic::new(format!("{} did not finish: {}", tool.display(), e)))?;

    if output.status.success() {
        return Ok(());
    }

    let mut text = String::from_utf8_lossy(&output.stderr).to_string();
    let stdout = String::from_utf8_lossy(&output.stdout);
    if !stdout.trim().is_empty() {
        if !text.is_empty() {
            text.push('\n');
        }
        text.push_str(&stdout);
    }
    if text.trim().is_empty() {
        text = format!(
            "{} exited with status {}",
            tool.display(),
            output.status.code().unwrap_or(1)
        );
    }
    Err(Diagnostic::from_compiler_output(&text))
}
