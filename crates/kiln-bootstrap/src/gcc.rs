//! Staged GCC builds.
//!
//! Every variant installs into a prefix that already holds a copy of the
//! binutils and (except for `stage1_bootstrap`) of the sysroot, at
//! `<prefix>/<target>/sysroot` with a `usr -> .` link. GCC records that
//! sysroot relative to its own prefix, so the installed compiler is
//! relocatable.

use std::fmt;

use indoc::formatdoc;
use kiln_env::EnvLayer;
use kiln_graph::NodeId;
use kiln_triple::Triple;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;

use crate::config::MathLibs;
use crate::error::{BootstrapError, Result};
use crate::planner::Planner;
use crate::sysroot::Sysroot;
use crate::tools::{tool_name, ToolchainRef, Toolset};
use crate::transforms::{MERGE_LIB64, SYMLINK};

/// The three kinds of compiler the bootstrap builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Variant {
    /// C/C++ only, no runtime libraries, no sysroot.
    Stage1Bootstrap,
    /// A cross compiler with minimal runtime libraries, against a sysroot.
    Stage1Limited,
    /// Every runtime library enabled.
    Stage2Full,
}

impl Variant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Variant::Stage1Bootstrap => "stage1_bootstrap",
            Variant::Stage1Limited => "stage1_limited",
            Variant::Stage2Full => "stage2_full",
        }
    }

    pub fn needs_sysroot(&self) -> bool {
        !matches!(self, Variant::Stage1Bootstrap)
    }
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs of one GCC build.
#[derive(Debug, Clone)]
pub struct GccRequest {
    pub variant: Variant,
    pub build: Triple,
    pub host: Triple,
    pub target: Triple,
    pub sysroot: Option<Sysroot>,
    /// Binutils running on `host` for `target`.
    pub binutils: NodeId,
    pub tools: Toolset,
}

impl GccRequest {
    /// Reject variant and triple combinations that cannot work.
    pub fn check_contract(&self) -> Result<()> {
        let violation = |reason: &str| {
            Err(BootstrapError::StageContractViolation {
                variant: self.variant,
                build: self.build.clone(),
                host: self.host.clone(),
                target: self.target.clone(),
                reason: reason.to_string(),
            })
        };
        match (self.variant, &self.sysroot) {
            (Variant::Stage1Bootstrap, Some(_)) => {
                return violation("stage1_bootstrap builds against headers only and takes no sysroot")
            }
            (Variant::Stage1Bootstrap, None) if self.host == self.target => {
                return violation("stage1_bootstrap must target a platform other than its host")
            }
            (Variant::Stage1Limited, _) if self.host == self.target => {
                return violation("stage1_limited must be a cross compiler (host equals target)")
            }
            (variant, None) if variant.needs_sysroot() => return violation("a sysroot is required"),
            (_, Some(sysroot)) if !sysroot.target.same_platform(&self.target) => {
                return violation(&format!("sysroot is for {}", sysroot.target))
            }
            _ => {}
        }
        Ok(())
    }

    /// Where the sysroot copy lives inside the install prefix.
    fn sysroot_dir(&self) -> String {
        format!("$output/{}/sysroot", self.target)
    }

    /// `configure` arguments for this build.
    pub fn configure_flags(&self, languages: &[String], math: MathLibs) -> Vec<String> {
        let mut flags = vec![
            "--prefix=\"$output\"".to_string(),
            format!("--build={}", self.build),
            format!("--host={}", self.host),
            format!("--target={}", self.target),
            "--disable-nls".into(),
            "--disable-multilib".into(),
            "--disable-bootstrap".into(),
        ];

        match self.variant {
            Variant::Stage1Bootstrap => {
                flags.extend(
                    [
                        "--enable-languages=c,c++",
                        "--without-headers",
                        "--with-newlib",
                        "--disable-shared",
                        "--disable-threads",
                        "--disable-decimal-float",
                        "--disable-libatomic",
                        "--disable-libgomp",
                        "--disable-libitm",
                        "--disable-libquadmath",
                        "--disable-libsanitizer",
                        "--disable-libssp",
                        "--disable-libstdcxx",
                        "--disable-libvtv",
                    ]
                    .map(String::from),
                );
                if let Some(version) = self.target.glibc_version() {
                    flags.push(format!("--with-glibc-version={version}"));
                }
            }
            Variant::Stage1Limited => {
                flags.push(format!("--with-sysroot=\"{}\"", self.sysroot_dir()));
                flags.extend(
                    [
                        "--enable-languages=c,c++",
                        "--enable-shared",
                        "--enable-threads=posix",
                        "--disable-libgomp",
                        "--disable-libitm",
                        "--disable-libquadmath",
                        "--disable-libsanitizer",
                        "--disable-libssp",
                        "--disable-libvtv",
                    ]
                    .map(String::from),
                );
            }
            Variant::Stage2Full => {
                flags.push(format!("--with-sysroot=\"{}\"", self.sysroot_dir()));
                flags.push(format!("--enable-languages={}", languages.join(",")));
                flags.extend(
                    [
                        "--enable-shared",
                        "--enable-threads=posix",
                        "--enable-lto",
                        "--enable-default-pie",
                        "--enable-default-ssp",
                    ]
                    .map(String::from),
                );
            }
        }

        let sanitizer = "--disable-libsanitizer".to_string();
        if self.target.is_musl() && !flags.contains(&sanitizer) {
            flags.push(sanitizer);
        }
        if self.host.is_gnu() {
            flags.push("--enable-__cxa_atexit".into());
        }
        if math == MathLibs::External {
            for lib in ["gmp", "mpfr", "mpc", "isl"] {
                flags.push(format!("--with-{lib}=\"$mathlibs\""));
            }
        }
        flags
    }

    /// The toolchain the build produces (before proxying).
    fn output(&self, node: NodeId) -> ToolchainRef {
        ToolchainRef::artifact(node, self.host.clone(), self.target.clone())
    }
}

impl Planner {
    /// Build one GCC stage. The result has `lib64` merged into `lib` and a
    /// `cc` (or `<target>-cc`) link to its `gcc`.
    pub fn gcc(&mut self, request: &GccRequest) -> Result<ToolchainRef> {
        request.check_contract()?;

        let gcc = self.config.sources.gcc.clone();
        let math = self.config.build.math_libs;
        let src = self.fetch(&gcc);
        let mut inputs: Vec<(&str, NodeId)> = vec![("gcc", src), ("binutils", request.binutils)];
        if let Some(sysroot) = &request.sysroot {
            inputs.push(("sysroot", sysroot.node));
        }
        let unpack_math = match math {
            MathLibs::Bundled => {
                let sources = self.config.sources.clone();
                for (key, source) in [
                    ("gmp", &sources.gmp),
                    ("mpfr", &sources.mpfr),
                    ("mpc", &sources.mpc),
                    ("isl", &sources.isl),
                ] {
                    inputs.push((key, self.fetch(source)));
                }
                "for lib in gmp mpfr mpc isl; do unpack \"${!lib}\" \"src/$lib\"; done\n"
            }
            MathLibs::External => {
                let libs = self.math_libs(&request.build, &request.host, &request.tools);
                inputs.push(("mathlibs", libs));
                ""
            }
        };

        let target = &request.target;
        let sysroot_dir = request.sysroot_dir();
        let stage_sysroot = if request.sysroot.is_some() {
            formatdoc! {r#"
                mkdir -p "{sysroot_dir}"
                cp -a "$sysroot/." "{sysroot_dir}/"
                ln -sfn . "{sysroot_dir}/usr"
            "#}
        } else {
            String::new()
        };
        let flags = request
            .configure_flags(&self.config.build.full_languages, math)
            .join(" \\\n  ");
        let (make, install) = match request.variant {
            Variant::Stage1Bootstrap => ("make all-gcc all-target-libgcc", "make install-gcc install-target-libgcc"),
            _ => ("make", "make install"),
        };
        let tool = |name: &str| tool_name(&request.host, target, name);
        let fix_limits = if request.variant == Variant::Stage1Bootstrap {
            // libgcc's limits.h must chain to the C library's once it exists.
            formatdoc! {r#"
                libgcc_dir="$(dirname "$("$output/bin/{gcc_bin}" -print-libgcc-file-name)")"
                cat ../src/gcc/limitx.h ../src/gcc/glimits.h ../src/gcc/limity.h > "$libgcc_dir/include/limits.h"
            "#, gcc_bin = tool("gcc")}
        } else {
            String::new()
        };

        // Staged binutils run on `host` and join PATH only when that is the
        // build machine.
        let export_path = if request.host == request.build {
            "export PATH=\"$output/bin:$PATH\"\n"
        } else {
            ""
        };

        let script = formatdoc! {r#"
            mkdir -p "$output/{target}"
            {stage_sysroot}cp -a "$binutils/." "$output/"
            chmod -R u+w "$output"
            {export_path}unpack "$gcc" src
            {unpack_math}mkdir build
            cd build
            ../src/configure \
              {flags}
            {make}
            {install}
            {fix_limits}"#};

        let name = format!(
            "gcc-{}-{} build={} host={} target={target}",
            gcc.version, request.variant, request.build, request.host
        );
        let installed = self.process(name, &script, &request.tools, &inputs, EnvLayer::new());

        let merged = self.transform(MERGE_LIB64, installed, serde_json::Value::Null);
        let links = json!({
            "links": [{ "path": format!("bin/{}", tool("cc")), "target": tool("gcc") }]
        });
        let node = self.transform(SYMLINK, merged, links);
        info!(
            variant = %request.variant,
            build = %request.build,
            host = %request.host,
            target = %target,
            node = %node.short(),
            "planned gcc"
        );
        Ok(request.output(node))
    }

    /// gmp, mpfr, mpc and isl built once for `host` into one prefix.
    fn math_libs(&mut self, build: &Triple, host: &Triple, tools: &Toolset) -> NodeId {
        let sources = self.config.sources.clone();
        let inputs: Vec<(&str, NodeId)> = vec![
            ("gmp", self.fetch(&sources.gmp)),
            ("mpfr", self.fetch(&sources.mpfr)),
            ("mpc", self.fetch(&sources.mpc)),
            ("isl", self.fetch(&sources.isl)),
        ];
        let common = format!("--prefix=\"$output\" --build={build} --host={host} --disable-shared --enable-static");
        let script = formatdoc! {r#"
            for lib in gmp mpfr mpc isl; do unpack "${{!lib}}" "$lib"; done
            (cd gmp && ./configure {common} && make && make install)
            (cd mpfr && ./configure {common} --with-gmp="$output" && make && make install)
            (cd mpc && ./configure {common} --with-gmp="$output" --with-mpfr="$output" && make && make install)
            (cd isl && ./configure {common} --with-gmp-prefix="$output" && make && make install)
        "#};
        self.process(
            format!("gcc-math-libs host={host}"),
            &script,
            tools,
            &inputs,
            EnvLayer::new(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::tests::planner;
    use kiln_graph::{ContentHash, Node};

    fn triple(s: &str) -> Triple {
        Triple::parse(s).unwrap()
    }

    fn request(p: &Planner, variant: Variant, host: &str, target: &str, sysroot: bool) -> GccRequest {
        let target = triple(target);
        GccRequest {
            variant,
            build: p.build_triple().clone(),
            host: triple(host),
            sysroot: sysroot.then(|| Sysroot {
                node: ContentHash::of_bytes(b"sysroot"),
                target: target.clone(),
            }),
            target,
            binutils: ContentHash::of_bytes(b"binutils"),
            tools: Toolset::native(p.bootstrap().clone()),
        }
    }

    #[test]
    fn contract_violations() {
        let p = planner("x86_64-unknown-linux-gnu");
        let cases = [
            (Variant::Stage1Bootstrap, "x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu", true),
            (Variant::Stage1Bootstrap, "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu", false),
            (Variant::Stage1Limited, "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu", true),
            (Variant::Stage1Limited, "x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu", false),
            (Variant::Stage2Full, "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu", false),
        ];
        for (variant, host, target, sysroot) in cases {
            let req = request(&p, variant, host, target, sysroot);
            let err = req.check_contract().unwrap_err();
            assert!(
                matches!(err, BootstrapError::StageContractViolation { variant: v, .. } if v == variant),
                "{variant} {host} {target}"
            );
        }
        let ok = request(&p, Variant::Stage1Limited, "x86_64-unknown-linux-gnu", "x86_64-kiln-linux-gnu", true);
        ok.check_contract().unwrap();
    }

    #[test]
    fn sysroot_for_other_platform_is_rejected() {
        let p = planner("x86_64-unknown-linux-gnu");
        let mut req = request(&p, Variant::Stage2Full, "x86_64-unknown-linux-gnu", "x86_64-unknown-linux-gnu", true);
        req.sysroot = Some(Sysroot {
            node: ContentHash::of_bytes(b"s"),
            target: triple("aarch64-unknown-linux-gnu"),
        });
        let err = req.check_contract().unwrap_err();
        assert!(err.to_string().contains("stage2_full"));
        assert!(err.to_string().contains("sysroot is for aarch64-unknown-linux-gnu"));
    }

    #[test]
    fn bootstrap_is_libc_less() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let req = request(&p, Variant::Stage1Bootstrap, "x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu", false);
        let tc = p.gcc(&req).unwrap();
        assert_eq!(tc.tool("cc"), "aarch64-unknown-linux-gnu-cc");

        let step = p.steps("gcc-").next().unwrap();
        assert!(!step.inputs.contains_key("sysroot"));
        assert!(!step.script.contains("--with-sysroot"));
        assert!(!step.script.contains("$sysroot"));
        for flag in ["--without-headers", "--with-newlib", "--disable-shared", "--with-glibc-version=2.38"] {
            assert!(step.script.contains(flag), "{flag}");
        }
        assert!(step.script.contains("make all-gcc all-target-libgcc"));
        assert!(step.script.contains("aarch64-unknown-linux-gnu-gcc\" -print-libgcc-file-name"));
        assert!(step.name.contains("stage1_bootstrap"));
    }

    #[test]
    fn full_native_build_links_cc() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let req = request(&p, Variant::Stage2Full, "x86_64-unknown-linux-musl", "x86_64-unknown-linux-musl", true);
        let tc = p.gcc(&req).unwrap();

        let Some(Node::Transform { name, params, input }) = p.graph().get(&tc.node.unwrap()) else {
            panic!("expected the symlink transform");
        };
        assert_eq!(name, SYMLINK);
        assert_eq!(params["links"][0]["path"], "bin/cc");
        assert_eq!(params["links"][0]["target"], "gcc");
        assert!(matches!(p.graph().get(input), Some(Node::Transform { name, .. }) if name == MERGE_LIB64));

        let step = p.steps("gcc-").next().unwrap();
        assert!(step.script.contains("--with-sysroot=\"$output/x86_64-unknown-linux-musl/sysroot\""));
        assert!(step.script.contains("ln -sfn . \"$output/x86_64-unknown-linux-musl/sysroot/usr\""));
        assert!(step.script.contains("--enable-languages=c,c++,fortran"));
        assert!(step.script.contains("--disable-libsanitizer"));
        assert!(!step.script.contains("--enable-__cxa_atexit"));
        assert!(step.script.contains("unpack \"${!lib}\" \"src/$lib\""));
        assert!(step.inputs.contains_key("isl"));
    }

    #[test]
    fn gnu_host_and_external_math() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        p.config.build.math_libs = MathLibs::External;
        let req = request(&p, Variant::Stage1Limited, "x86_64-unknown-linux-gnu", "aarch64-unknown-linux-gnu", true);
        let tc = p.gcc(&req).unwrap();
        assert_eq!(tc.tool("cc"), "aarch64-unknown-linux-gnu-cc");

        let step = p.steps("gcc-14").next().unwrap();
        assert!(step.script.contains("--enable-__cxa_atexit"));
        assert!(step.script.contains("--with-gmp=\"$mathlibs\""));
        assert!(!step.script.contains("--disable-libsanitizer --disable-libsanitizer"));
        assert!(step.inputs.contains_key("mathlibs"));
        let math = p.steps("gcc-math-libs").next().unwrap();
        assert!(math.script.contains("--host=x86_64-unknown-linux-gnu"));
        assert!(math.script.contains("unpack \"${!lib}\" \"$lib\""));
    }
}
