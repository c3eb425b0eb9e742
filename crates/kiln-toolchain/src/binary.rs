//! Executable-format inspection.

use std::fs;
use std::path::Path;

use goblin::elf::header::{EM_386, EM_AARCH64, EM_ARM, EM_PPC64, EM_RISCV, EM_S390, EM_X86_64};
use goblin::mach::cputype::{CPU_TYPE_ARM64, CPU_TYPE_X86_64};
use goblin::mach::Mach;
use goblin::Object;
use kiln_triple::{Arch, Environment, Os, Triple};

use crate::error::{Result, ToolchainError};

/// `EM_LOONGARCH`.
const EM_LOONGARCH: u16 = 258;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryFormat {
    Elf,
    MachO,
}

/// What the loader needs to know about a binary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryInfo {
    pub format: BinaryFormat,
    /// Architectures present; more than one only for fat Mach-O files.
    pub architectures: Vec<Arch>,
    /// `PT_INTERP`, for dynamically linked ELF executables.
    pub interpreter: Option<String>,
    /// `DT_NEEDED` entries.
    pub needed: Vec<String>,
    /// `DT_RUNPATH` followed by `DT_RPATH` entries, split on `:`.
    pub search_paths: Vec<String>,
    /// Whether the file is a shared object rather than an executable.
    pub is_shared_object: bool,
}

impl BinaryInfo {
    /// A triple describing the platform the binary runs on.
    ///
    /// The environment is inferred from the interpreter name; statically
    /// linked ELF files are assumed to be gnu.
    pub fn platform(&self) -> Option<Triple> {
        let arch = self.architectures.first()?.clone();
        let triple = match self.format {
            BinaryFormat::MachO => Triple::new(arch, Os::Darwin).with_vendor("apple"),
            BinaryFormat::Elf => {
                let musl = self.interpreter.as_deref().is_some_and(|i| i.contains("musl"));
                let env = match (&arch, musl) {
                    (Arch::Arm(_), true) => Environment::MuslEabiHf,
                    (Arch::Arm(_), false) => Environment::GnuEabiHf,
                    (_, true) => Environment::Musl,
                    (_, false) => Environment::Gnu,
                };
                Triple::new(arch, Os::Linux)
                    .with_vendor("unknown")
                    .with_environment(env)
            }
        };
        Some(triple)
    }
}

/// Parse the headers of the executable at `path`.
pub fn inspect(path: &Path) -> Result<BinaryInfo> {
    let bytes = fs::read(path).map_err(ToolchainError::io(format!("reading {}", path.display())))?;
    inspect_bytes(&bytes).map_err(|message| ToolchainError::BinaryFormat {
        path: path.to_path_buf(),
        message,
    })
}

pub fn inspect_bytes(bytes: &[u8]) -> std::result::Result<BinaryInfo, String> {
    match Object::parse(bytes).map_err(|e| e.to_string())? {
        Object::Elf(elf) => {
            let arch = elf_arch(elf.header.e_machine, elf.is_64, elf.little_endian);
            let mut search_paths = Vec::new();
            for entry in elf.runpaths.iter().chain(elf.rpaths.iter()) {
                search_paths.extend(entry.split(':').filter(|p| !p.is_empty()).map(str::to_string));
            }
            Ok(BinaryInfo {
                format: BinaryFormat::Elf,
                architectures: arch.into_iter().collect(),
                interpreter: elf.interpreter.map(str::to_string),
                needed: elf.libraries.iter().map(|s| s.to_string()).collect(),
                search_paths,
                is_shared_object: elf.is_lib && elf.interpreter.is_none(),
            })
        }
        Object::Mach(Mach::Binary(macho)) => Ok(BinaryInfo {
            format: BinaryFormat::MachO,
            architectures: mach_arch(macho.header.cputype).into_iter().collect(),
            interpreter: None,
            needed: macho.libs.iter().filter(|l| **l != "self").map(|s| s.to_string()).collect(),
            search_paths: macho.rpaths.iter().map(|s| s.to_string()).collect(),
            is_shared_object: macho.header.filetype == goblin::mach::header::MH_DYLIB,
        }),
        Object::Mach(Mach::Fat(multi)) => {
            let mut architectures = Vec::new();
            for arch in multi.iter_arches() {
                let arch = arch.map_err(|e| e.to_string())?;
                architectures.extend(mach_arch(arch.cputype));
            }
            Ok(BinaryInfo {
                format: BinaryFormat::MachO,
                architectures,
                interpreter: None,
                needed: Vec::new(),
                search_paths: Vec::new(),
                is_shared_object: false,
            })
        }
        _ => Err("not an ELF or Mach-O file".to_string()),
    }
}

fn elf_arch(machine: u16, is_64: bool, little_endian: bool) -> Option<Arch> {
    Some(match machine {
        EM_X86_64 => Arch::X86_64,
        EM_386 => Arch::X86("i686".to_string()),
        EM_AARCH64 => Arch::Aarch64,
        EM_ARM => Arch::Arm("arm".to_string()),
        EM_RISCV if is_64 => Arch::Riscv64,
        EM_PPC64 if little_endian => Arch::Powerpc64le,
        EM_S390 if is_64 => Arch::S390x,
        EM_LOONGARCH if is_64 => Arch::Loongarch64,
        _ => return None,
    })
}

fn mach_arch(cputype: u32) -> Option<Arch> {
    match cputype {
        CPU_TYPE_X86_64 => Some(Arch::X86_64),
        CPU_TYPE_ARM64 => Some(Arch::Aarch64),
        _ => None,
    }
}

/// Whether `bytes` start with the ELF magic.
pub fn is_elf(bytes: &[u8]) -> bool {
    bytes.starts_with(b"\x7fELF")
}
