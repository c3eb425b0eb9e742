//! Realizes a build graph against a store, executor and fetcher.
//!
//! Nodes are realized one dependency level at a time. Nodes within a level
//! run concurrently (bounded by `jobs`); already-committed nodes are cache
//! hits. The first failure cancels every in-flight sibling, and nothing that
//! failed or was cancelled is committed.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use kiln_env::ResolvedEnv;
use tracing::{debug, info, warn};

use crate::error::{ExecError, GraphError, Result};
use crate::exec::{CancelToken, ExecRequest, Executor};
use crate::fetch::Fetcher;
use crate::fsutil;
use crate::graph::BuildGraph;
use crate::node::{Node, NodeId, ProcessSpec};
use crate::store::{ArtifactStore, Staging};
use crate::transform::{TransformContext, TransformRegistry};

/// Drives realization of a graph.
pub struct Runner<'a> {
    store: &'a dyn ArtifactStore,
    executor: &'a dyn Executor,
    fetcher: &'a dyn Fetcher,
    transforms: &'a TransformRegistry,
    cancel: CancelToken,
    jobs: usize,
    shell: PathBuf,
}

impl<'a> Runner<'a> {
    pub fn new(
        store: &'a dyn ArtifactStore,
        executor: &'a dyn Executor,
        fetcher: &'a dyn Fetcher,
        transforms: &'a TransformRegistry,
    ) -> Self {
        let jobs = thread::available_parallelism().map_or(1, usize::from);
        Self {
            store,
            executor,
            fetcher,
            transforms,
            cancel: CancelToken::new(),
            jobs,
            shell: default_shell(),
        }
    }

    /// Share a cancellation token with the caller. Each `realize` derives
    /// its own token from it, so a failed run does not poison the next one.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Maximum number of nodes realized at once.
    pub fn with_jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Shell used for `Process` scripts.
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Realize `root` and everything it depends on, returning the root
    /// artifact's path.
    pub fn realize(&self, graph: &BuildGraph, root: &NodeId) -> Result<PathBuf> {
        let schedule = graph.schedule(root)?;
        info!(
            root = %root.short(),
            nodes = schedule.node_count(),
            depth = schedule.depth(),
            "realizing graph"
        );

        let cancel = self.cancel.child();
        for level in &schedule.levels {
            let pending: Vec<NodeId> = level
                .iter()
                .filter(|id| {
                    let hit = self.store.lookup(id).is_some();
                    if hit {
                        debug!(node = %id.short(), "cache hit");
                    }
                    !hit
                })
                .copied()
                .collect();

            for chunk in pending.chunks(self.jobs) {
                self.realize_batch(graph, chunk, &cancel)?;
            }
        }

        self.store.require(root)
    }

    fn realize_batch(&self, graph: &BuildGraph, batch: &[NodeId], cancel: &CancelToken) -> Result<()> {
        let results: Vec<Result<PathBuf>> = thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|id| {
                    scope.spawn(move || {
                        let result = graph.node(id).and_then(|node| self.realize_node(id, node, cancel));
                        if result.is_err() {
                            cancel.cancel();
                        }
                        result
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap_or(Err(GraphError::Cancelled)))
                .collect()
        });

        // Report the failure that triggered cancellation, not a sibling's
        // cancellation it caused.
        let mut first_cancel = None;
        for result in results {
            match result {
                Ok(_) => {}
                Err(GraphError::Cancelled) => first_cancel = Some(GraphError::Cancelled),
                Err(err) => return Err(err),
            }
        }
        match first_cancel {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn realize_node(&self, id: &NodeId, node: &Node, cancel: &CancelToken) -> Result<PathBuf> {
        if cancel.is_cancelled() {
            return Err(GraphError::Cancelled);
        }
        info!(node = %id.short(), step = %node.label(), "building");

        let staging = self.store.stage(id)?;
        match node {
            Node::Fetch { url, sha256 } => {
                self.fetcher.fetch(url, sha256, staging.out())?;
            }
            Node::Process(spec) => self.run_process(spec, &staging, cancel)?,
            Node::Merge { inputs } => {
                for input in inputs {
                    let src = self.store.require(input)?;
                    fsutil::copy_tree(&src, staging.out())
                        .map_err(GraphError::io(format!("merging {}", input.short())))?;
                }
            }
            Node::Get { input, path } => {
                let src = self.store.get(input, path)?;
                fsutil::copy_tree(&src, staging.out())
                    .map_err(GraphError::io(format!("extracting {path}")))?;
            }
            Node::Transform {
                name,
                input,
                params,
            } => {
                let transform = self.transforms.get(name)?;
                let src = self.store.require(input)?;
                fsutil::copy_tree(&src, staging.out())
                    .and_then(|()| fsutil::make_tree_writable(staging.out()))
                    .map_err(GraphError::io(format!("copying input of {name}")))?;
                let scratch = staging.scratch();
                let ctx = TransformContext {
                    executor: self.executor,
                    cancel,
                    scratch: &scratch,
                };
                transform.apply(staging.out(), params, &ctx)?;
            }
        }

        if cancel.is_cancelled() {
            warn!(node = %id.short(), "discarding output of cancelled step");
            return Err(GraphError::Cancelled);
        }
        self.store.commit(staging)
    }

    fn run_process(&self, spec: &ProcessSpec, staging: &Staging, cancel: &CancelToken) -> Result<()> {
        let mut paths: Vec<(String, PathBuf)> = Vec::with_capacity(spec.inputs.len() + 1);
        for (key, input) in &spec.inputs {
            paths.push((key.clone(), self.store.require(input)?));
        }
        paths.push(("output".to_string(), staging.out().to_path_buf()));

        let env = process_env(&spec.env, &paths);
        let workdir = staging.scratch();
        let script = workdir.join(".kiln-build.sh");
        fs::write(&script, &spec.script)
            .map_err(GraphError::io(format!("writing script for {}", spec.name)))?;

        let request = ExecRequest::new(&self.shell)
            .args(["-eu", "-o", "pipefail"])
            .arg(script.to_string_lossy())
            .env(env)
            .cwd(&workdir);
        let output = self
            .executor
            .run(&request, cancel)
            .map_err(|source| match source {
                ExecError::Cancelled => GraphError::Cancelled,
                source => GraphError::Exec {
                    step: spec.name.clone(),
                    source,
                },
            })?;
        output.check(&spec.name)?;
        Ok(())
    }
}

/// Substitute `%{name}` placeholders and export each path as a variable.
fn process_env(env: &ResolvedEnv, paths: &[(String, PathBuf)]) -> ResolvedEnv {
    let substitute = |value: &str| {
        paths.iter().fold(value.to_string(), |acc, (key, path)| {
            acc.replace(&format!("%{{{key}}}"), &path.to_string_lossy())
        })
    };
    let mut out: ResolvedEnv = env
        .iter()
        .map(|(k, v)| (k.to_string(), substitute(v)))
        .collect();
    for (key, path) in paths {
        out.insert(key.clone(), path.to_string_lossy());
    }
    out
}

fn default_shell() -> PathBuf {
    std::env::var_os("PATH")
        .and_then(|path| {
            std::env::split_paths(&path)
                .map(|dir| dir.join("bash"))
                .find(|candidate| candidate.is_file())
        })
        .unwrap_or_else(|| Path::new("/bin/bash").to_path_buf())
}
