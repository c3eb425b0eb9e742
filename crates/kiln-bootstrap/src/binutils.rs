//! Assembler, linker and object tools.

use indoc::formatdoc;
use kiln_env::EnvLayer;
use kiln_graph::NodeId;
use kiln_triple::Triple;
use tracing::info;

use crate::planner::Planner;
use crate::tools::Toolset;

impl Planner {
    /// Build binutils running on `host` for `target`.
    ///
    /// The sysroot is configured at `<output>/<target>/sysroot`, inside the
    /// artifact itself, so the tools keep finding it after the artifact is
    /// copied into a compiler prefix. Cross tools come out `<target>-`
    /// prefixed.
    pub fn binutils(
        &mut self,
        build: &Triple,
        host: &Triple,
        target: &Triple,
        static_link: bool,
        tools: &Toolset,
    ) -> NodeId {
        let binutils = self.config.sources.binutils.clone();
        let src = self.fetch(&binutils);

        let mut step = EnvLayer::new()
            .set_if_unset("CFLAGS", "-O2")
            .set_if_unset("CXXFLAGS", "-O2");
        let mut extra = "";
        if static_link {
            step = step
                .suffix_join("CFLAGS", "-static", " ")
                .suffix_join("CXXFLAGS", "-static", " ");
            extra = " \\\n  --disable-shared --enable-static";
        }

        let script = formatdoc! {r#"
            unpack "$binutils" src
            mkdir build
            cd build
            ../src/configure \
              --prefix="$output" \
              --build={build} \
              --host={host} \
              --target={target} \
              --with-sysroot="$output/{target}/sysroot" \
              --disable-nls \
              --disable-werror \
              --disable-gprofng \
              --enable-new-dtags \
              --enable-default-hash-style=gnu{extra}
            make
            make install
        "#};
        let name = format!(
            "binutils-{}{} build={build} host={host} target={target}",
            binutils.version,
            if static_link { "-static" } else { "" }
        );
        let node = self.process(name, &script, tools, &[("binutils", src)], step);
        info!(%host, %target, static_link, node = %node.short(), "planned binutils");
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::tests::planner;

    #[test]
    fn sysroot_lives_inside_the_output() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let build = p.build_triple().clone();
        let target = Triple::parse("riscv64-unknown-linux-gnu").unwrap();
        let tools = Toolset::native(p.bootstrap().clone());
        p.binutils(&build, &build, &target, false, &tools);

        let step = p.steps("binutils-").next().unwrap();
        assert!(step.script.contains("--with-sysroot=\"$output/riscv64-unknown-linux-gnu/sysroot\""));
        assert!(step.script.contains("--target=riscv64-unknown-linux-gnu"));
        assert!(!step.script.contains("--disable-shared"));
        assert_eq!(step.env.get("CFLAGS"), Some("-O2"));
    }

    #[test]
    fn static_build_forces_static_flags() {
        let mut p = planner("x86_64-unknown-linux-gnu");
        let build = p.build_triple().clone();
        let tools = Toolset::native(p.bootstrap().clone());
        p.binutils(&build, &build, &build, true, &tools);

        let step = p.steps("binutils-").next().unwrap();
        assert!(step.name.contains("-static"));
        assert!(step.script.contains("--disable-shared --enable-static"));
        assert_eq!(step.env.get("CFLAGS"), Some("-O2 -static"));
        assert_eq!(step.env.get("CXXFLAGS"), Some("-O2 -static"));
    }
}
