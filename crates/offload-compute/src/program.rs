//! Kernel programs: build from source text or load a precompiled container.
//!
//! Building is a pluggable strategy selected by the target device:
//!
//! - [`SourceCompiler`] takes kernel text, substitutes `{{NAME}}` build
//!   defines and discovers `@compute` entry points.
//! - [`BinaryLoader`] takes a precompiled container produced by
//!   [`Program::to_binary`]. Fixed-function accelerators accept nothing else.
//!
//! # Container layout (little-endian)
//!
//! ```text
//! b"OFKB" | u16 version | u8 device kind | u16 entry count
//! { u16 len | utf-8 name } * entry count
//! u32 payload len | payload (resolved kernel text)
//! ```

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::{Cursor, Read, Write};
use std::path::Path;
use std::sync::OnceLock;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use regex::Regex;
use tracing::{debug, trace};

use crate::backend::Backend;
use crate::device::DeviceKind;
use crate::{ComputeError, ComputeResult};

/// Container magic.
pub const BINARY_MAGIC: &[u8; 4] = b"OFKB";
/// Container format version.
pub const BINARY_VERSION: u16 = 1;

/// Program input as handed to a compiler.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgramSource {
    /// Kernel source text.
    Text { label: String, source: String },
    /// Precompiled program container.
    Binary { label: String, bytes: Vec<u8> },
}

impl ProgramSource {
    pub fn text(label: impl Into<String>, source: impl Into<String>) -> Self {
        Self::Text { label: label.into(), source: source.into() }
    }

    pub fn binary(label: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self::Binary { label: label.into(), bytes }
    }

    /// Read kernel text from a file.
    pub fn load_text<P: AsRef<Path>>(path: P) -> ComputeResult<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        Ok(Self::text(path.display().to_string(), source))
    }

    /// Read a precompiled container from a file.
    pub fn load_binary<P: AsRef<Path>>(path: P) -> ComputeResult<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)?;
        Ok(Self::binary(path.display().to_string(), bytes))
    }

    pub fn label(&self) -> &str {
        match self {
            Self::Text { label, .. } | Self::Binary { label, .. } => label,
        }
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Self::Binary { .. })
    }
}

/// Build defines substituted into `{{NAME}}` placeholders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOptions {
    defines: BTreeMap<String, String>,
}

impl BuildOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a define.
    pub fn define(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.defines.insert(name.into(), value.to_string());
        self
    }

    /// Parse `NAME=VALUE`.
    pub fn define_str(self, pair: &str) -> ComputeResult<Self> {
        let (name, value) = pair
            .split_once('=')
            .ok_or_else(|| ComputeError::InvalidArgument(format!("define must be NAME=VALUE, got '{pair}'")))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(ComputeError::InvalidArgument(format!("empty define name in '{pair}'")));
        }
        Ok(self.define(name, value.trim()))
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.defines.get(name).map(String::as_str)
    }

    pub fn defines(&self) -> impl Iterator<Item = (&str, &str)> {
        self.defines.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// What a program is being built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetDescriptor {
    pub kind: DeviceKind,
    pub backend: Backend,
    /// Only precompiled containers are accepted.
    pub requires_binary: bool,
}

/// Handle to a program built inside a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub(crate) usize);

/// A built program: resolved kernel text plus its entry points.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    label: String,
    kind: DeviceKind,
    entry_points: Vec<String>,
    source: String,
    local_size: Option<usize>,
    from_binary: bool,
}

impl Program {
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Device kind the program was built for.
    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn entry_points(&self) -> &[String] {
        &self.entry_points
    }

    pub fn has_entry_point(&self, name: &str) -> bool {
        self.entry_points.iter().any(|e| e == name)
    }

    /// Kernel text with all defines resolved.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Work-group size baked in through `LOCAL_SIZE`, if any.
    pub fn local_size(&self) -> Option<usize> {
        self.local_size
    }

    pub fn is_from_binary(&self) -> bool {
        self.from_binary
    }

    /// Stable fingerprint of the resolved text, for pipeline caches.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.source.hash(&mut hasher);
        hasher.finish()
    }

    /// Serialize to a precompiled container.
    pub fn to_binary(&self) -> ComputeResult<Vec<u8>> {
        let mut out = Vec::with_capacity(self.source.len() + 64);
        out.write_all(BINARY_MAGIC)?;
        out.write_u16::<LittleEndian>(BINARY_VERSION)?;
        out.write_u8(self.kind.tag())?;
        let count = u16::try_from(self.entry_points.len())
            .map_err(|_| ComputeError::ProgramBuild("too many entry points".into()))?;
        out.write_u16::<LittleEndian>(count)?;
        for entry in &self.entry_points {
            let len = u16::try_from(entry.len())
                .map_err(|_| ComputeError::ProgramBuild(format!("entry point name too long: {entry}")))?;
            out.write_u16::<LittleEndian>(len)?;
            out.write_all(entry.as_bytes())?;
        }
        let payload_len = u32::try_from(self.source.len())
            .map_err(|_| ComputeError::ProgramBuild("kernel text exceeds 4 GB".into()))?;
        out.write_u32::<LittleEndian>(payload_len)?;
        out.write_all(self.source.as_bytes())?;
        Ok(out)
    }
}

/// Program build strategy.
pub trait ProgramCompiler: Send + Sync {
    /// Strategy name for logs.
    fn name(&self) -> &'static str;

    /// Turn `input` into an executable program for `target`.
    fn compile(&self, input: &ProgramSource, target: &TargetDescriptor, options: &BuildOptions) -> ComputeResult<Program>;
}

/// Builds programs from kernel text.
#[derive(Debug, Default, Clone, Copy)]
pub struct SourceCompiler;

/// Loads precompiled program containers.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryLoader;

/// Strategy for a target: containers for fixed-function devices, source
/// otherwise.
pub fn compiler_for(target: &TargetDescriptor) -> Box<dyn ProgramCompiler> {
    if target.requires_binary {
        Box::new(BinaryLoader)
    } else {
        Box::new(SourceCompiler)
    }
}

const ENTRY_POINT_PATTERN: &str = r"(?s)@compute\b.*?\bfn\s+([A-Za-z_][A-Za-z0-9_]*)\s*\(";
const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";
const LOCAL_SIZE_PATTERN: &str = r"const\s+LOCAL_SIZE\s*:\s*u32\s*=\s*([0-9]+)u?\s*;";

fn cached_regex(cell: &'static OnceLock<Regex>, pattern: &str) -> ComputeResult<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern).map_err(|e| ComputeError::ProgramBuild(format!("invalid pattern: {e}")))?;
    Ok(cell.get_or_init(|| re))
}

/// Entry points declared in kernel text, in declaration order.
pub fn scan_entry_points(source: &str) -> ComputeResult<Vec<String>> {
    static RE: OnceLock<Regex> = OnceLock::new();
    Ok(cached_regex(&RE, ENTRY_POINT_PATTERN)?
        .captures_iter(source)
        .map(|c| c[1].to_string())
        .collect())
}

fn parse_local_size(options: &BuildOptions) -> ComputeResult<Option<usize>> {
    options
        .get("LOCAL_SIZE")
        .map(|v| {
            v.parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or_else(|| ComputeError::ProgramBuild(format!("LOCAL_SIZE must be a positive integer, got '{v}'")))
        })
        .transpose()
}

impl ProgramCompiler for SourceCompiler {
    fn name(&self) -> &'static str {
        "source"
    }

    fn compile(&self, input: &ProgramSource, target: &TargetDescriptor, options: &BuildOptions) -> ComputeResult<Program> {
        trace!(label = input.label(), "SourceCompiler::compile");
        let ProgramSource::Text { label, source } = input else {
            return Err(ComputeError::ProgramBuild(format!(
                "'{}' is a precompiled binary; the source compiler needs kernel text",
                input.label()
            )));
        };
        if target.requires_binary {
            return Err(ComputeError::ProgramBuild(format!(
                "{} devices only load precompiled programs",
                target.kind
            )));
        }

        let mut missing = Vec::new();
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let resolved = cached_regex(&PLACEHOLDER, PLACEHOLDER_PATTERN)?.replace_all(source, |caps: &regex::Captures| {
            match options.get(&caps[1]) {
                Some(value) => value.to_string(),
                None => {
                    missing.push(caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });
        if !missing.is_empty() {
            return Err(ComputeError::ProgramBuild(format!(
                "{label}: unresolved build define(s): {}",
                missing.join(", ")
            )));
        }

        let entry_points = scan_entry_points(&resolved)?;
        if entry_points.is_empty() {
            return Err(ComputeError::ProgramBuild(format!("{label}: no @compute entry points")));
        }

        debug!(label = %label, entries = ?entry_points, "program built from source");
        Ok(Program {
            label: label.clone(),
            kind: target.kind,
            entry_points,
            source: resolved.into_owned(),
            local_size: parse_local_size(options)?,
            from_binary: false,
        })
    }
}

impl BinaryLoader {
    fn decode(label: &str, bytes: &[u8]) -> ComputeResult<(DeviceKind, Vec<String>, String)> {
        let corrupt = |what: &str| ComputeError::ProgramBuild(format!("{label}: corrupt program binary ({what})"));
        let mut cur = Cursor::new(bytes);

        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic).map_err(|_| corrupt("truncated header"))?;
        if &magic != BINARY_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let version = cur.read_u16::<LittleEndian>().map_err(|_| corrupt("truncated header"))?;
        if version != BINARY_VERSION {
            return Err(ComputeError::ProgramBuild(format!(
                "{label}: unsupported program binary version {version}"
            )));
        }
        let tag = cur.read_u8().map_err(|_| corrupt("truncated header"))?;
        let kind = DeviceKind::from_tag(tag).ok_or_else(|| corrupt("unknown device kind"))?;

        let count = cur.read_u16::<LittleEndian>().map_err(|_| corrupt("truncated entry table"))?;
        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = cur.read_u16::<LittleEndian>().map_err(|_| corrupt("truncated entry table"))?;
            let mut name = vec![0u8; len as usize];
            cur.read_exact(&mut name).map_err(|_| corrupt("truncated entry name"))?;
            entries.push(String::from_utf8(name).map_err(|_| corrupt("entry name is not utf-8"))?);
        }

        let payload_len = cur.read_u32::<LittleEndian>().map_err(|_| corrupt("truncated payload"))? as usize;
        let remaining = bytes.len().saturating_sub(cur.position() as usize);
        if payload_len > remaining {
            return Err(corrupt("truncated payload"));
        }
        let mut payload = vec![0u8; payload_len];
        cur.read_exact(&mut payload).map_err(|_| corrupt("truncated payload"))?;
        let source = String::from_utf8(payload).map_err(|_| corrupt("payload is not utf-8"))?;

        Ok((kind, entries, source))
    }
}

impl ProgramCompiler for BinaryLoader {
    fn name(&self) -> &'static str {
        "binary"
    }

    fn compile(&self, input: &ProgramSource, target: &TargetDescriptor, _options: &BuildOptions) -> ComputeResult<Program> {
        trace!(label = input.label(), "BinaryLoader::compile");
        let ProgramSource::Binary { label, bytes } = input else {
            return Err(ComputeError::ProgramBuild(format!(
                "'{}' is kernel text; the binary loader needs a precompiled program",
                input.label()
            )));
        };

        let (kind, entry_points, source) = Self::decode(label, bytes)?;
        if kind != target.kind {
            return Err(ComputeError::ProgramBuild(format!(
                "{label}: binary was built for {kind} devices, target is {}",
                target.kind
            )));
        }
        if entry_points.is_empty() {
            return Err(ComputeError::ProgramBuild(format!("{label}: binary has no entry points")));
        }

        // Defines were resolved when the container was produced.
        let local_size = baked_local_size(&source);

        debug!(label = %label, entries = ?entry_points, "program loaded from binary");
        Ok(Program {
            label: label.clone(),
            kind,
            entry_points,
            source,
            local_size,
            from_binary: true,
        })
    }
}

/// Reads `const LOCAL_SIZE: u32 = <n>u;` from resolved kernel text.
fn baked_local_size(source: &str) -> Option<usize> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = cached_regex(&RE, LOCAL_SIZE_PATTERN).ok()?;
    re.captures(source).and_then(|c| c[1].parse().ok())
}

/// Build `input` for `target` with the strategy [`compiler_for`] picks.
pub fn build_program(input: &ProgramSource, target: &TargetDescriptor, options: &BuildOptions) -> ComputeResult<Program> {
    let compiler = compiler_for(target);
    debug!(strategy = compiler.name(), label = input.label(), "building program");
    compiler.compile(input, target, options)
}

/// Build kernel text into a container for `kind` devices, the way an
/// offline compiler prepares a board image.
pub fn precompile(input: &ProgramSource, kind: DeviceKind, options: &BuildOptions) -> ComputeResult<Vec<u8>> {
    let target = TargetDescriptor { kind, backend: Backend::Cpu, requires_binary: false };
    SourceCompiler.compile(input, &target, options)?.to_binary()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"
const LOCAL_SIZE: u32 = {{LOCAL_SIZE}}u;

@compute @workgroup_size(LOCAL_SIZE)
fn first(@builtin(global_invocation_id) id: vec3<u32>) {}

fn helper() {}

@compute
@workgroup_size(1)
fn second() {}
"#;

    fn cpu_target() -> TargetDescriptor {
        TargetDescriptor { kind: DeviceKind::Cpu, backend: Backend::Cpu, requires_binary: false }
    }

    fn acc_target() -> TargetDescriptor {
        TargetDescriptor { kind: DeviceKind::Accelerator, backend: Backend::Cpu, requires_binary: true }
    }

    #[test]
    fn test_scan_entry_points_skips_helpers() {
        assert_eq!(scan_entry_points(SRC).unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_defines_substituted() {
        let opts = BuildOptions::new().define("LOCAL_SIZE", 32);
        let program = build_program(&ProgramSource::text("t", SRC), &cpu_target(), &opts).unwrap();
        assert!(program.source().contains("const LOCAL_SIZE: u32 = 32u;"));
        assert_eq!(program.local_size(), Some(32));
        assert!(!program.is_from_binary());
    }

    #[test]
    fn test_unresolved_define_fails() {
        let err = build_program(&ProgramSource::text("t", SRC), &cpu_target(), &BuildOptions::new()).unwrap_err();
        assert!(err.to_string().contains("LOCAL_SIZE"), "{err}");
    }

    #[test]
    fn test_no_entry_points_fails() {
        let err = build_program(&ProgramSource::text("t", "fn helper() {}"), &cpu_target(), &BuildOptions::new());
        assert!(matches!(err, Err(ComputeError::ProgramBuild(_))));
    }

    #[test]
    fn test_accelerator_requires_binary() {
        let opts = BuildOptions::new().define("LOCAL_SIZE", 16);
        let err = SourceCompiler.compile(&ProgramSource::text("t", SRC), &acc_target(), &opts);
        assert!(matches!(err, Err(ComputeError::ProgramBuild(_))));
        // And build_program routes text to the loader, which refuses it.
        let err = build_program(&ProgramSource::text("t", SRC), &acc_target(), &opts);
        assert!(matches!(err, Err(ComputeError::ProgramBuild(_))));
    }

    #[test]
    fn test_precompiled_binary_loads_on_accelerator() {
        let opts = BuildOptions::new().define("LOCAL_SIZE", 16);
        let bytes = precompile(&ProgramSource::text("t", SRC), DeviceKind::Accelerator, &opts).unwrap();
        assert_eq!(&bytes[..4], BINARY_MAGIC);

        let program = build_program(&ProgramSource::binary("t.ofkb", bytes), &acc_target(), &BuildOptions::new()).unwrap();
        assert!(program.is_from_binary());
        assert_eq!(program.entry_points(), ["first", "second"]);
        assert_eq!(program.local_size(), Some(16));
    }

    #[test]
    fn test_binary_target_mismatch() {
        let opts = BuildOptions::new().define("LOCAL_SIZE", 16);
        let bytes = precompile(&ProgramSource::text("t", SRC), DeviceKind::Gpu, &opts).unwrap();
        let err = BinaryLoader.compile(&ProgramSource::binary("t", bytes), &acc_target(), &BuildOptions::new());
        assert!(err.unwrap_err().to_string().contains("built for gpu"));
    }

    #[test]
    fn test_corrupt_binary() {
        let err = BinaryLoader.compile(&ProgramSource::binary("t", b"NOPE".to_vec()), &acc_target(), &BuildOptions::new());
        assert!(err.unwrap_err().to_string().contains("bad magic"));
        let err = BinaryLoader.compile(&ProgramSource::binary("t", b"OFKB\x01".to_vec()), &acc_target(), &BuildOptions::new());
        assert!(err.unwrap_err().to_string().contains("truncated"));
    }

    #[test]
    fn test_define_str() {
        let opts = BuildOptions::new().define_str("LOCAL_SIZE = 8").unwrap();
        assert_eq!(opts.get("LOCAL_SIZE"), Some("8"));
        assert!(BuildOptions::new().define_str("nope").is_err());
        assert!(BuildOptions::new().define_str("=3").is_err());
    }
}
