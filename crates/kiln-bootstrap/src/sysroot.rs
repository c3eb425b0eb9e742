//! Sysroot assembly: kernel headers plus a C library for one target.
//!
//! The C library installs under a triple-named directory of its own
//! artifact; that directory is merged over the kernel headers and the
//! linker scripts of the result are fixed for `ld --sysroot`.

use indoc::formatdoc;
use kiln_env::EnvLayer;
use kiln_graph::{Node, NodeId};
use kiln_triple::{LibcFamily, Triple};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;
use crate::planner::Planner;
use crate::tools::Toolset;
use crate::transforms::FIX_LINKER_SCRIPTS;

/// A built sysroot: `include/` and `lib/` for `target`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sysroot {
    pub node: NodeId,
    pub target: Triple,
}

impl Planner {
    /// Kernel UAPI headers for the architecture of `target`, under `include/`.
    pub fn kernel_headers(&mut self, target: &Triple) -> NodeId {
        let linux = self.config.sources.linux.clone();
        let src = self.fetch(&linux);
        let karch = target.architecture.kernel_arch().to_string();
        let script = formatdoc! {r#"
            unpack "$linux" src
            cd src
            make mrproper
            make ARCH={karch} headers
            find usr/include -type f ! -name '*.h' -delete
            mkdir -p "$output"
            cp -r usr/include "$output/include"
        "#};
        let tools = Toolset::native(self.bootstrap.clone());
        self.process(
            format!("linux-headers-{}-{karch}", linux.version),
            &script,
            &tools,
            &[("linux", src)],
            EnvLayer::new(),
        )
    }

    /// Build the sysroot for `target`.
    ///
    /// `tools.host` must compile for `target`; it is usually a
    /// `stage1_bootstrap` compiler. Kernel headers are built unless supplied.
    pub fn sysroot(&mut self, target: &Triple, tools: &Toolset, kernel_headers: Option<NodeId>) -> Result<Sysroot> {
        let libc = target.libc()?;
        let headers = match kernel_headers {
            Some(node) => node,
            None => self.kernel_headers(target),
        };

        let build = tools.build.target.clone();
        let libc_node = match libc {
            LibcFamily::Glibc => self.glibc(target, &build, tools, headers),
            LibcFamily::Musl => self.musl(target, &build, tools)?,
        };

        let libc_root = self.graph.add(Node::Get {
            input: libc_node,
            path: target.to_string(),
        });
        let merged = self.graph.add(Node::Merge {
            inputs: vec![headers, libc_root],
        });
        let node = self.transform(FIX_LINKER_SCRIPTS, merged, serde_json::Value::Null);
        info!(target = %target, libc = %libc, node = %node.short(), "planned sysroot");
        Ok(Sysroot {
            node,
            target: target.clone(),
        })
    }

    fn glibc(&mut self, target: &Triple, build: &Triple, tools: &Toolset, headers: NodeId) -> NodeId {
        let glibc = self.config.sources.glibc.clone();
        let src = self.fetch(&glibc);
        let kernel = &self.config.build.kernel_min_version;
        let script = formatdoc! {r#"
            unpack "$glibc" src
            mkdir build
            cd build
            printf 'slibdir=/lib\nrtlddir=/lib\n' > configparms
            ../src/configure \
              --prefix= \
              --host={target} \
              --build={build} \
              --enable-kernel={kernel} \
              --with-headers="$headers/include" \
              --disable-nscd \
              --disable-werror \
              libc_cv_slibdir=/lib
            make
            make install DESTDIR="$output/{target}"
        "#};
        self.process(
            format!("sysroot-glibc-{}-{target}", glibc.version),
            &script,
            tools,
            &[("glibc", src), ("headers", headers)],
            EnvLayer::new(),
        )
    }

    fn musl(&mut self, target: &Triple, build: &Triple, tools: &Toolset) -> Result<NodeId> {
        let musl = self.config.sources.musl.clone();
        let src = self.fetch(&musl);
        let loader = target.dynamic_linker_name()?;
        let prefix = tools.host_tools().prefix();
        // musl links its loader to an absolute /lib/libc.so; keep it relative.
        let script = formatdoc! {r#"
            unpack "$musl" src
            cd src
            ./configure \
              --prefix= \
              --syslibdir=/lib \
              --target={target} \
              --build={build} \
              CROSS_COMPILE={prefix}
            make
            make install DESTDIR="$output/{target}"
            ln -sf libc.so "$output/{target}/lib/{loader}"
        "#};
        Ok(self.process(
            format!("sysroot-musl-{}-{target}", musl.version),
            &script,
            tools,
            &[("musl", src)],
            EnvLayer::new(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::tests::planner;
    use crate::tools::ToolchainRef;
    use kiln_graph::ContentHash;
    use kiln_triple::TripleError;

    fn stage1(p: &Planner, target: &Triple) -> Toolset {
        let boot = ToolchainRef::artifact(ContentHash::of_bytes(b"stage1"), p.build_triple().clone(), target.clone());
        Toolset::native(p.bootstrap().clone()).with_host(boot)
    }

    #[test]
    fn glibc_sysroot_graph() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let target = Triple::parse("aarch64-unknown-linux-gnu").unwrap();
        let tools = stage1(&p, &target);
        let sysroot = p.sysroot(&target, &tools, None).unwrap();

        let Node::Transform { name, input, .. } = p.graph().get(&sysroot.node).unwrap() else {
            panic!("sysroot is not the linker-script fix");
        };
        assert_eq!(name, FIX_LINKER_SCRIPTS);
        let Node::Merge { inputs } = p.graph().get(input).unwrap() else {
            panic!("fix input is not a merge");
        };
        assert_eq!(inputs.len(), 2);
        assert!(matches!(p.graph().get(&inputs[1]), Some(Node::Get { path, .. }) if path == "aarch64-unknown-linux-gnu"));

        let headers = p.steps("linux-headers-").next().unwrap();
        assert!(headers.script.contains("make ARCH=arm64 headers"));
        let glibc = p.steps("sysroot-glibc-").next().unwrap();
        assert!(glibc.script.contains("--host=aarch64-unknown-linux-gnu"));
        assert!(glibc.script.contains("--build=x86_64-unknown-linux-gnu"));
        assert!(glibc.script.contains("--enable-kernel=4.19"));
        assert_eq!(glibc.env.get("CC"), Some("aarch64-unknown-linux-gnu-cc"));
        assert!(glibc.inputs.contains_key("host_tc"));
    }

    #[test]
    fn musl_sysroot_relinks_loader() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let target = Triple::parse("armv7-unknown-linux-musleabihf").unwrap();
        let tools = stage1(&p, &target);
        p.sysroot(&target, &tools, None).unwrap();
        let musl = p.steps("sysroot-musl-").next().unwrap();
        assert!(musl.script.contains("ln -sf libc.so \"$output/armv7-unknown-linux-musleabihf/lib/ld-musl-armhf.so.1\""));
        assert!(musl.script.contains("CROSS_COMPILE=armv7-unknown-linux-musleabihf-"));
        let headers = p.steps("linux-headers-").next().unwrap();
        assert!(headers.script.contains("ARCH=arm "));
    }

    #[test]
    fn prefetched_headers_are_reused() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let target = Triple::parse("x86_64-unknown-linux-musl").unwrap();
        let headers = ContentHash::of_bytes(b"headers");
        let tools = stage1(&p, &target);
        p.sysroot(&target, &tools, Some(headers)).unwrap();
        assert_eq!(p.steps("linux-headers-").count(), 0);
    }

    #[test]
    fn unsupported_environment_is_fatal() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let target = Triple::parse("arm-none-eabi").unwrap();
        let tools = stage1(&p, &target);
        let err = p.sysroot(&target, &tools, None).unwrap_err();
        assert!(matches!(
            err,
            crate::error::BootstrapError::Triple(TripleError::UnsupportedEnvironment { .. })
        ));
    }
}
