//! Target triple parsing, rendering and canonicalization.
//!
//! A triple is `architecture[-vendor]-os[-environment]`, two to four
//! hyphen-separated components. Parsing keeps exactly the components the
//! input carried so that rendering is lossless; [`Triple::canonicalize`]
//! fills in the defaults for the operating system.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TripleError};

/// Instruction set architecture.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Arch {
    X86_64,
    /// 32-bit x86 (`i386` through `i686`), keeping the exact spelling.
    X86(String),
    Aarch64,
    /// Any `arm*` token (`arm`, `armv6`, `armv7l`, ...), keeping the exact spelling.
    Arm(String),
    Riscv64,
    Powerpc64le,
    S390x,
    Loongarch64,
}

impl Arch {
    fn parse(token: &str) -> Option<Self> {
        let arch = match token {
            "x86_64" | "amd64" => Arch::X86_64,
            "aarch64" | "arm64" => Arch::Aarch64,
            "riscv64" | "riscv64gc" => Arch::Riscv64,
            "powerpc64le" | "ppc64le" => Arch::Powerpc64le,
            "s390x" => Arch::S390x,
            "loongarch64" => Arch::Loongarch64,
            "i386" | "i486" | "i586" | "i686" => Arch::X86(token.to_string()),
            t if t.starts_with("arm") => Arch::Arm(t.to_string()),
            _ => return None,
        };
        Some(arch)
    }

    /// The architecture token as it appears in a triple.
    pub fn as_str(&self) -> &str {
        match self {
            Arch::X86_64 => "x86_64",
            Arch::X86(name) | Arch::Arm(name) => name,
            Arch::Aarch64 => "aarch64",
            Arch::Riscv64 => "riscv64",
            Arch::Powerpc64le => "powerpc64le",
            Arch::S390x => "s390x",
            Arch::Loongarch64 => "loongarch64",
        }
    }

    /// The `ARCH=` value the Linux kernel build expects for this architecture.
    pub fn kernel_arch(&self) -> &str {
        match self {
            Arch::Aarch64 => "arm64",
            Arch::Arm(_) => "arm",
            Arch::X86(_) => "x86",
            Arch::Riscv64 => "riscv",
            Arch::Powerpc64le => "powerpc",
            Arch::Loongarch64 => "loongarch",
            other => other.as_str(),
        }
    }

    /// Pointer width in bits.
    pub fn pointer_width(&self) -> u32 {
        match self {
            Arch::X86(_) | Arch::Arm(_) => 32,
            _ => 64,
        }
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operating system component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Os {
    Linux,
    Darwin,
    FreeBsd,
    /// Bare metal.
    None,
}

impl Os {
    /// Split an os token into the os and any trailing version (`darwin23.1.0`).
    fn parse(token: &str) -> Option<(Self, Option<String>)> {
        let split = token
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(token.len());
        let (name, version) = token.split_at(split);
        let os = match name {
            "linux" => Os::Linux,
            "darwin" | "macos" | "macosx" => Os::Darwin,
            "freebsd" => Os::FreeBsd,
            "none" => Os::None,
            _ => return None,
        };
        let version = (!version.is_empty()).then(|| version.to_string());
        Some((os, version))
    }

    /// The canonical os token.
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::FreeBsd => "freebsd",
            Os::None => "none",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ABI / C library environment component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Environment {
    Gnu,
    GnuEabi,
    GnuEabiHf,
    Musl,
    MuslEabi,
    MuslEabiHf,
    Eabi,
    EabiHf,
    /// Bare-metal ELF (`aarch64-none-elf`).
    Elf,
}

impl Environment {
    /// Split an environment token into the environment and a trailing version
    /// (`gnu2.17`).
    fn parse(token: &str) -> Option<(Self, Option<String>)> {
        let split = token
            .find(|c: char| c.is_ascii_digit())
            .unwrap_or(token.len());
        let (name, version) = token.split_at(split);
        let env = match name {
            "gnu" => Environment::Gnu,
            "gnueabi" => Environment::GnuEabi,
            "gnueabihf" => Environment::GnuEabiHf,
            "musl" => Environment::Musl,
            "musleabi" => Environment::MuslEabi,
            "musleabihf" => Environment::MuslEabiHf,
            "eabi" => Environment::Eabi,
            "eabihf" => Environment::EabiHf,
            "elf" => Environment::Elf,
            _ => return None,
        };
        let version = (!version.is_empty()).then(|| version.to_string());
        Some((env, version))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Gnu => "gnu",
            Environment::GnuEabi => "gnueabi",
            Environment::GnuEabiHf => "gnueabihf",
            Environment::Musl => "musl",
            Environment::MuslEabi => "musleabi",
            Environment::MuslEabiHf => "musleabihf",
            Environment::Eabi => "eabi",
            Environment::EabiHf => "eabihf",
            Environment::Elf => "elf",
        }
    }

    /// Whether this environment uses the hard-float calling convention.
    pub fn is_hard_float(&self) -> bool {
        matches!(
            self,
            Environment::GnuEabiHf | Environment::MuslEabiHf | Environment::EabiHf
        )
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable target triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    /// Instruction set architecture.
    pub architecture: Arch,
    /// Vendor component, when the input carried one.
    pub vendor: Option<String>,
    /// Operating system.
    pub os: Os,
    /// Version suffix attached to the os token (`darwin23.1.0`).
    pub os_version: Option<String>,
    /// ABI / C library environment, when present.
    pub environment: Option<Environment>,
    /// Version suffix attached to the environment token (`gnu2.17`).
    pub environment_version: Option<String>,
}

/// Field-wise override applied by [`Triple::with_override`].
#[derive(Debug, Clone, Default)]
pub struct TripleOverride {
    pub architecture: Option<Arch>,
    pub vendor: Option<Option<String>>,
    pub os: Option<Os>,
    pub environment: Option<Option<Environment>>,
    pub environment_version: Option<Option<String>>,
}

impl Triple {
    /// Construct a triple from its mandatory components.
    pub fn new(architecture: Arch, os: Os) -> Self {
        Self {
            architecture,
            vendor: None,
            os,
            os_version: None,
            environment: None,
            environment_version: None,
        }
    }

    /// Builder-style vendor setter.
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Builder-style environment setter.
    pub fn with_environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    /// Parse a hyphen-joined triple of two to four components.
    pub fn parse(input: &str) -> Result<Self> {
        let malformed = |token: &str, reason| TripleError::Malformed {
            input: input.to_string(),
            token: token.to_string(),
            reason,
        };

        let parts: Vec<&str> = input.split('-').collect();
        if !(2..=4).contains(&parts.len()) {
            return Err(malformed(input, "expected 2 to 4 hyphen-separated components"));
        }
        if let Some(empty) = parts.iter().find(|p| p.is_empty()) {
            return Err(malformed(empty, "empty component"));
        }

        let architecture =
            Arch::parse(parts[0]).ok_or_else(|| malformed(parts[0], "unrecognized architecture"))?;

        let (vendor, os_token, env_token) = match parts.len() {
            2 => (None, parts[1], None),
            3 => {
                // `arch-os-env` when the middle token is an os and the last an
                // environment, otherwise `arch-vendor-os`.
                if Os::parse(parts[1]).is_some() && Environment::parse(parts[2]).is_some() {
                    (None, parts[1], Some(parts[2]))
                } else {
                    (Some(parts[1]), parts[2], None)
                }
            }
            _ => (Some(parts[1]), parts[2], Some(parts[3])),
        };

        let (os, os_version) =
            Os::parse(os_token).ok_or_else(|| malformed(os_token, "unrecognized operating system"))?;

        let (environment, environment_version) = match env_token {
            Some(token) => {
                let (env, version) = Environment::parse(token)
                    .ok_or_else(|| malformed(token, "unrecognized environment"))?;
                (Some(env), version)
            }
            None => (None, None),
        };

        Ok(Self {
            architecture,
            vendor: vendor.map(str::to_string),
            os,
            os_version,
            environment,
            environment_version,
        })
    }

    /// The vendor a canonical triple carries for this os.
    fn default_vendor(&self) -> &'static str {
        match self.os {
            Os::Darwin => "apple",
            _ => "unknown",
        }
    }

    /// The environment a canonical triple carries for this os, if any.
    pub fn default_environment(&self) -> Option<Environment> {
        match (self.os, &self.architecture) {
            (Os::Linux, Arch::Arm(_)) => Some(Environment::GnuEabiHf),
            (Os::Linux, _) => Some(Environment::Gnu),
            _ => None,
        }
    }

    /// Fill in the default vendor and environment for the os.
    pub fn canonicalize(&self) -> Self {
        let mut out = self.clone();
        if out.vendor.is_none() {
            out.vendor = Some(self.default_vendor().to_string());
        }
        if out.environment.is_none() {
            out.environment = self.default_environment();
        }
        out
    }

    /// Replace the components named in `patch`, leaving the rest untouched.
    pub fn with_override(&self, patch: TripleOverride) -> Self {
        let mut out = self.clone();
        if let Some(arch) = patch.architecture {
            out.architecture = arch;
        }
        if let Some(vendor) = patch.vendor {
            out.vendor = vendor;
        }
        if let Some(os) = patch.os {
            out.os = os;
        }
        if let Some(env) = patch.environment {
            out.environment = env;
        }
        if let Some(version) = patch.environment_version {
            out.environment_version = version;
        }
        out
    }

    /// Whether two triples describe the same platform once canonicalized,
    /// ignoring the vendor and version suffixes.
    pub fn same_platform(&self, other: &Triple) -> bool {
        let a = self.canonicalize();
        let b = other.canonicalize();
        a.architecture == b.architecture && a.os == b.os && a.environment == b.environment
    }

    /// The `<triple>-` prefix used for cross tool names.
    pub fn tool_prefix(&self) -> String {
        format!("{self}-")
    }

    pub fn is_linux(&self) -> bool {
        self.os == Os::Linux
    }

    pub fn is_darwin(&self) -> bool {
        self.os == Os::Darwin
    }
}

impl fmt::Display for Triple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.architecture)?;
        if let Some(vendor) = &self.vendor {
            write!(f, "-{vendor}")?;
        }
        write!(f, "-{}", self.os)?;
        if let Some(version) = &self.os_version {
            f.write_str(version)?;
        }
        if let Some(env) = &self.environment {
            write!(f, "-{env}")?;
            if let Some(version) = &self.environment_version {
                f.write_str(version)?;
            }
        }
        Ok(())
    }
}

impl FromStr for Triple {
    type Err = TripleError;

    fn from_str(s: &str) -> Result<Self> {
        Triple::parse(s)
    }
}

impl Serialize for Triple {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Triple {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Triple::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_four_components() {
        let t = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        assert_eq!(t.architecture, Arch::X86_64);
        assert_eq!(t.vendor.as_deref(), Some("unknown"));
        assert_eq!(t.os, Os::Linux);
        assert_eq!(t.environment, Some(Environment::Gnu));
    }

    #[test]
    fn parse_three_components_os_env() {
        let t = Triple::parse("aarch64-linux-musl").unwrap();
        assert_eq!(t.vendor, None);
        assert_eq!(t.os, Os::Linux);
        assert_eq!(t.environment, Some(Environment::Musl));
    }

    #[test]
    fn parse_three_components_vendor_os() {
        let t = Triple::parse("x86_64-apple-darwin23.1.0").unwrap();
        assert_eq!(t.vendor.as_deref(), Some("apple"));
        assert_eq!(t.os, Os::Darwin);
        assert_eq!(t.os_version.as_deref(), Some("23.1.0"));
        assert_eq!(t.environment, None);
    }

    #[test]
    fn parse_two_components() {
        let t = Triple::parse("aarch64-darwin").unwrap();
        assert_eq!(t.architecture, Arch::Aarch64);
        assert_eq!(t.os, Os::Darwin);
    }

    #[test]
    fn render_is_lossless() {
        for s in [
            "x86_64-unknown-linux-gnu",
            "aarch64-linux-musl",
            "armv7-unknown-linux-gnueabihf",
            "x86_64-apple-darwin23.1.0",
            "i686-pc-linux-gnu",
            "riscv64-linux-gnu2.38",
            "x86_64-linux",
        ] {
            assert_eq!(Triple::parse(s).unwrap().to_string(), s);
        }
    }

    #[test]
    fn canonicalize_fills_defaults() {
        let t = Triple::parse("x86_64-linux").unwrap().canonicalize();
        assert_eq!(t.to_string(), "x86_64-unknown-linux-gnu");

        let t = Triple::parse("aarch64-darwin").unwrap().canonicalize();
        assert_eq!(t.to_string(), "aarch64-apple-darwin");

        let t = Triple::parse("armv7-linux").unwrap().canonicalize();
        assert_eq!(t.to_string(), "armv7-unknown-linux-gnueabihf");
    }

    #[test]
    fn canonicalize_is_idempotent_through_strings() {
        for s in ["x86_64-linux", "aarch64-linux-musl", "arm64-apple-darwin", "i686-linux-gnu"] {
            let once = Triple::parse(s).unwrap().canonicalize();
            let twice = Triple::parse(&once.to_string()).unwrap().canonicalize();
            assert_eq!(once, twice);
            assert_eq!(once.to_string(), twice.to_string());
        }
    }

    #[test]
    fn bare_metal_elf_keeps_its_environment() {
        let t = Triple::parse("aarch64-none-elf").unwrap();
        assert_eq!(t.vendor, None);
        assert_eq!(t.os, Os::None);
        assert_eq!(t.environment, Some(Environment::Elf));
        assert_eq!(t.to_string(), "aarch64-none-elf");
        assert_eq!(t.canonicalize().to_string(), "aarch64-unknown-none-elf");
        assert_eq!(Triple::parse("aarch64-unknown-none-elf").unwrap().canonicalize(), t.canonicalize());
        assert!(matches!(t.libc(), Err(TripleError::UnsupportedEnvironment { .. })));
    }

    #[test]
    fn malformed_component_count() {
        let err = Triple::parse("x86_64").unwrap_err();
        assert!(matches!(err, TripleError::Malformed { .. }));
        assert!(Triple::parse("a-b-c-d-e").is_err());
    }

    #[test]
    fn malformed_names_offending_token() {
        match Triple::parse("sparc64-unknown-linux-gnu").unwrap_err() {
            TripleError::Malformed { token, .. } => assert_eq!(token, "sparc64"),
            other => panic!("unexpected error {other:?}"),
        }
        match Triple::parse("x86_64-unknown-plan9-gnu").unwrap_err() {
            TripleError::Malformed { token, .. } => assert_eq!(token, "plan9"),
            other => panic!("unexpected error {other:?}"),
        }
        match Triple::parse("x86_64-unknown-linux-uclibc").unwrap_err() {
            TripleError::Malformed { token, .. } => assert_eq!(token, "uclibc"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn override_replaces_selected_fields() {
        let t = Triple::parse("x86_64-unknown-linux-gnu").unwrap();
        let musl = t.with_override(TripleOverride {
            environment: Some(Some(Environment::Musl)),
            ..Default::default()
        });
        assert_eq!(musl.to_string(), "x86_64-unknown-linux-musl");

        let retagged = t.with_override(TripleOverride {
            vendor: Some(Some("kiln".into())),
            ..Default::default()
        });
        assert_eq!(retagged.to_string(), "x86_64-kiln-linux-gnu");
        assert!(retagged.same_platform(&t));
        assert_ne!(retagged, t);
    }

    #[test]
    fn kernel_arch_mapping() {
        let arch = |s: &str| Triple::parse(s).unwrap().architecture;
        assert_eq!(arch("aarch64-linux-gnu").kernel_arch(), "arm64");
        assert_eq!(arch("armv7-linux-gnueabihf").kernel_arch(), "arm");
        assert_eq!(arch("x86_64-linux-gnu").kernel_arch(), "x86_64");
    }

    #[test]
    fn serde_uses_string_form() {
        let t = Triple::parse("aarch64-unknown-linux-musl").unwrap();
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(json, "\"aarch64-unknown-linux-musl\"");
        let back: Triple = serde_json::from_str(&json).unwrap();
        assert_eq!(back, t);
    }
}
