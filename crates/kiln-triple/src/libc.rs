//! C library family dispatch and the names that follow from it.

use serde::{Deserialize, Serialize};

use crate::error::{Result, TripleError};
use crate::triple::{Arch, Environment, Triple};

/// glibc version used when a gnu triple carries no explicit version suffix.
pub const DEFAULT_GLIBC_VERSION: &str = "2.38";

/// The two C library families a sysroot can be built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LibcFamily {
    Glibc,
    Musl,
}

impl LibcFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibcFamily::Glibc => "glibc",
            LibcFamily::Musl => "musl",
        }
    }
}

impl std::fmt::Display for LibcFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Triple {
    /// The C library family selected by the (canonical) environment.
    pub fn libc(&self) -> Result<LibcFamily> {
        match self.environment.or_else(|| self.default_environment()) {
            Some(Environment::Gnu | Environment::GnuEabi | Environment::GnuEabiHf) => {
                Ok(LibcFamily::Glibc)
            }
            Some(Environment::Musl | Environment::MuslEabi | Environment::MuslEabiHf) => {
                Ok(LibcFamily::Musl)
            }
            _ => Err(TripleError::UnsupportedEnvironment {
                triple: self.to_string(),
            }),
        }
    }

    pub fn is_musl(&self) -> bool {
        matches!(self.libc(), Ok(LibcFamily::Musl))
    }

    /// Whether the environment is one of the gnu variants.
    pub fn is_gnu(&self) -> bool {
        matches!(self.libc(), Ok(LibcFamily::Glibc))
    }

    /// The glibc version to build for this triple: the environment suffix if
    /// one was given, otherwise [`DEFAULT_GLIBC_VERSION`]. `None` for non-glibc
    /// triples.
    pub fn glibc_version(&self) -> Option<&str> {
        if !self.is_gnu() {
            return None;
        }
        Some(
            self.environment_version
                .as_deref()
                .unwrap_or(DEFAULT_GLIBC_VERSION),
        )
    }

    /// File name of the dynamic linker for this triple.
    ///
    /// glibc: `ld-linux-<arch>.so.<N>` (`N` is 2 on x86_64, 1 elsewhere).
    /// musl: `ld-musl-<arch>.so.1`.
    pub fn dynamic_linker_name(&self) -> Result<String> {
        let hard_float = self
            .environment
            .or_else(|| self.default_environment())
            .is_some_and(|env| env.is_hard_float());

        match self.libc()? {
            LibcFamily::Glibc => {
                let (arch, n) = match &self.architecture {
                    Arch::X86_64 => ("x86-64".to_string(), 2),
                    Arch::Arm(_) if hard_float => ("armhf".to_string(), 1),
                    other => (other.as_str().to_string(), 1),
                };
                Ok(format!("ld-linux-{arch}.so.{n}"))
            }
            LibcFamily::Musl => {
                let arch = match &self.architecture {
                    Arch::Arm(_) if hard_float => "armhf".to_string(),
                    Arch::Arm(_) => "arm".to_string(),
                    Arch::X86(_) => "i386".to_string(),
                    other => other.as_str().to_string(),
                };
                Ok(format!("ld-musl-{arch}.so.1"))
            }
        }
    }
}
