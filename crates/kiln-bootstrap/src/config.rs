//! `kiln.toml`: source archives and build settings.
//!
//! ```toml
//! [sources.gcc]
//! version = "14.2.0"
//! url = "https://ftp.gnu.org/gnu/gcc/gcc-14.2.0/gcc-14.2.0.tar.xz"
//! sha256 = "..."
//!
//! [build]
//! jobs = 16
//! vendor-tag = "kiln"
//! math-libs = "bundled"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{BootstrapError, Result};

/// A checksum-pinned source archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Source {
    pub version: String,
    pub url: String,
    pub sha256: String,
}

/// Every archive the bootstrap consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Sources {
    pub binutils: Source,
    pub gcc: Source,
    pub gmp: Source,
    pub mpfr: Source,
    pub mpc: Source,
    pub isl: Source,
    pub linux: Source,
    pub glibc: Source,
    pub musl: Source,
}

impl Sources {
    fn iter(&self) -> impl Iterator<Item = (&'static str, &Source)> {
        [
            ("binutils", &self.binutils),
            ("gcc", &self.gcc),
            ("gmp", &self.gmp),
            ("mpfr", &self.mpfr),
            ("mpc", &self.mpc),
            ("isl", &self.isl),
            ("linux", &self.linux),
            ("glibc", &self.glibc),
            ("musl", &self.musl),
        ]
        .into_iter()
    }
}

/// How GCC obtains gmp, mpfr, mpc and isl.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MathLibs {
    /// Unpacked into the GCC source tree and built with it.
    #[default]
    Bundled,
    /// Built once per host as a separate step and passed with `--with-gmp` etc.
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct BuildSettings {
    /// Parallel make jobs inside each step.
    pub jobs: usize,
    /// Oldest kernel the built glibc supports.
    pub kernel_min_version: String,
    /// Vendor given to the intermediate host triple of a canadian cross.
    pub vendor_tag: String,
    /// Languages of `stage2_full` compilers.
    pub full_languages: Vec<String>,
    pub math_libs: MathLibs,
    /// Link the native binutils statically.
    pub static_binutils: bool,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            jobs: std::thread::available_parallelism().map_or(1, |n| n.get()),
            kernel_min_version: "4.19".to_string(),
            vendor_tag: "kiln".to_string(),
            full_languages: vec!["c".into(), "c++".into(), "fortran".into()],
            math_libs: MathLibs::Bundled,
            static_binutils: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KilnConfig {
    pub sources: Sources,
    #[serde(default)]
    pub build: BuildSettings,
}

impl KilnConfig {
    /// Load and validate a `kiln.toml`.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(BootstrapError::io(format!("reading {}", path.display())))?;
        let config: Self = toml::from_str(&text).map_err(|source| BootstrapError::Toml {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn parse(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|source| BootstrapError::Toml {
            path: "kiln.toml".into(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |detail: String| Err(BootstrapError::Config { detail });
        for (name, source) in self.sources.iter() {
            if source.url.trim().is_empty() {
                return invalid(format!("sources.{name}: empty url"));
            }
            if source.sha256.len() != 64 || !source.sha256.bytes().all(|b| b.is_ascii_hexdigit()) {
                return invalid(format!(
                    "sources.{name}: sha256 must be 64 hex digits, got '{}'",
                    source.sha256
                ));
            }
        }
        if self.build.jobs == 0 {
            return invalid("build.jobs must be at least 1".into());
        }
        if self.build.vendor_tag.is_empty() || self.build.vendor_tag.contains('-') {
            return invalid(format!("build.vendor-tag '{}' is not a single triple component", self.build.vendor_tag));
        }
        if self.build.full_languages.is_empty() {
            return invalid("build.full-languages is empty".into());
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_toml() -> String {
        let mut text = String::new();
        for (name, version) in [
            ("binutils", "2.43.1"),
            ("gcc", "14.2.0"),
            ("gmp", "6.3.0"),
            ("mpfr", "4.2.1"),
            ("mpc", "1.3.1"),
            ("isl", "0.26"),
            ("linux", "6.11.6"),
            ("glibc", "2.40"),
            ("musl", "1.2.5"),
        ] {
            text.push_str(&format!(
                "[sources.{name}]\nversion = \"{version}\"\nurl = \"file:///mirror/{name}-{version}.tar.xz\"\nsha256 = \"{}\"\n\n",
                "ab".repeat(32)
            ));
        }
        text
    }

    pub(crate) fn sample() -> KilnConfig {
        let mut config = KilnConfig::parse(&sample_toml()).unwrap();
        config.build.jobs = 4;
        config
    }

    #[test]
    fn defaults_fill_build_table() {
        let config = KilnConfig::parse(&sample_toml()).unwrap();
        assert_eq!(config.build.kernel_min_version, "4.19");
        assert_eq!(config.build.vendor_tag, "kiln");
        assert_eq!(config.build.math_libs, MathLibs::Bundled);
        assert_eq!(config.sources.gcc.version, "14.2.0");
    }

    #[test]
    fn build_table_is_kebab_case() {
        let text = format!("{}[build]\njobs = 2\nmath-libs = \"external\"\nfull-languages = [\"c\"]\n", sample_toml());
        let config = KilnConfig::parse(&text).unwrap();
        assert_eq!(config.build.jobs, 2);
        assert_eq!(config.build.math_libs, MathLibs::External);
        assert_eq!(config.build.full_languages, ["c"]);
    }

    #[test]
    fn rejects_bad_checksum_and_empty_url() {
        let bad_sum = sample_toml().replacen(&"ab".repeat(32), "xyz", 1);
        assert!(matches!(KilnConfig::parse(&bad_sum), Err(BootstrapError::Config { .. })));

        let empty_url = sample_toml().replacen("file:///mirror/binutils-2.43.1.tar.xz", "", 1);
        let err = KilnConfig::parse(&empty_url).unwrap_err();
        assert!(err.to_string().contains("sources.binutils"));
    }

    #[test]
    fn missing_source_is_a_parse_error() {
        let text = sample_toml().replace("[sources.musl]", "[sources.other]");
        assert!(matches!(KilnConfig::parse(&text), Err(BootstrapError::Toml { .. })));
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kiln.toml");
        std::fs::write(&path, sample_toml()).unwrap();
        assert_eq!(KilnConfig::load(&path).unwrap().sources.musl.version, "1.2.5");
        assert!(matches!(
            KilnConfig::load(&dir.path().join("missing.toml")),
            Err(BootstrapError::Io { .. })
        ));
    }
}
