//! Build graph construction.
//!
//! Graphs are built LLB style: each operation is serialised, hashed, and
//! referenced by digest from the operations that consume it. A [`Layer`] is a
//! handle to one operation's output plus the environment and working
//! directory that later `run` steps inherit.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::Platform;

pub const LOCAL_UNIQUE_ATTR: &str = "local.unique";
pub const EXCLUDE_PATTERNS_ATTR: &str = "local.excludepatterns";

/// Digest of the operation producing a filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OutputRef(pub String);

impl OutputRef {
    pub fn digest(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheSharing {
    Shared,
    Private,
    Locked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MountSource {
    /// Another layer, or an empty directory when `input` is `None`.
    Layer {
        input: Option<OutputRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        selector: Option<String>,
        readonly: bool,
    },
    Cache { id: String, sharing: CacheSharing },
    Tmpfs,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountSpec {
    pub dest: String,
    pub source: MountSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecMeta {
    pub args: Vec<String>,
    pub env: Vec<String>,
    pub cwd: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FileAction {
    Mkdir {
        path: String,
        mode: u32,
        make_parents: bool,
    },
    Rm {
        path: String,
        allow_not_found: bool,
    },
    Copy {
        from: Option<OutputRef>,
        src: String,
        dest: String,
        allow_wildcard: bool,
        create_dest_path: bool,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        excludes: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Op {
    Source {
        identifier: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attrs: BTreeMap<String, String>,
    },
    Exec {
        input: Option<OutputRef>,
        meta: ExecMeta,
        mounts: Vec<MountSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        secret_env: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    File {
        input: Option<OutputRef>,
        action: FileAction,
    },
}

impl Op {
    pub fn inputs(&self) -> Vec<&OutputRef> {
        let mut inputs = Vec::new();
        match self {
            Op::Source { .. } => {}
            Op::Exec { input, mounts, .. } => {
                inputs.extend(input.iter());
                for mount in mounts {
                    if let MountSource::Layer { input: Some(r), .. } = &mount.source {
                        inputs.push(r);
                    }
                }
            }
            Op::File { input, action } => {
                inputs.extend(input.iter());
                if let FileAction::Copy { from: Some(r), .. } = action {
                    inputs.push(r);
                }
            }
        }
        inputs
    }

    fn describe(&self) -> String {
        match self {
            Op::Source { identifier, .. } => identifier.clone(),
            Op::Exec { meta, name, .. } => name.clone().unwrap_or_else(|| meta.args.join(" ")),
            Op::File { action, .. } => match action {
                FileAction::Mkdir { path, .. } => format!("mkdir {}", path),
                FileAction::Rm { path, .. } => format!("rm {}", path),
                FileAction::Copy { src, dest, .. } => format!("copy {} {}", src, dest),
            },
        }
    }
}

/// A filesystem state plus the metadata commands run against it inherit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layer {
    output: Option<OutputRef>,
    env: Vec<(String, String)>,
    dir: String,
}

impl Default for Layer {
    fn default() -> Self {
        Self::scratch()
    }
}

impl Layer {
    pub fn scratch() -> Self {
        Self {
            output: None,
            env: Vec::new(),
            dir: "/".to_string(),
        }
    }

    fn from_output(output: OutputRef) -> Self {
        Self {
            output: Some(output),
            ..Self::scratch()
        }
    }

    fn derive(&self, output: OutputRef) -> Self {
        Self {
            output: Some(output),
            env: self.env.clone(),
            dir: self.dir.clone(),
        }
    }

    pub fn output(&self) -> Option<&OutputRef> {
        self.output.as_ref()
    }

    pub fn is_scratch(&self) -> bool {
        self.output.is_none()
    }

    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.retain(|(k, _)| k != key);
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn get_env(&self, key: &str) -> Option<&str> {
        self.env
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Changes the working directory; relative paths join the current one.
    pub fn with_dir(mut self, dir: &str) -> Self {
        self.dir = self.resolve(dir);
        self
    }

    pub fn dir(&self) -> &str {
        &self.dir
    }

    fn resolve(&self, path: &str) -> String {
        if path.starts_with('/') {
            return path.to_string();
        }
        let joined = Path::new(&self.dir).join(path);
        joined.to_string_lossy().to_string()
    }
}

#[derive(Debug, Clone)]
pub enum Mount {
    Layer {
        dest: String,
        layer: Layer,
        selector: Option<String>,
        readonly: bool,
    },
    Cache {
        dest: String,
        id: String,
        sharing: CacheSharing,
    },
    Tmpfs {
        dest: String,
    },
}

impl Mount {
    /// Read-write mount of `layer`; writes are discarded after the step.
    pub fn layer(dest: &str, layer: &Layer) -> Self {
        Mount::Layer {
            dest: dest.to_string(),
            layer: layer.clone(),
            selector: None,
            readonly: false,
        }
    }

    pub fn readonly(dest: &str, layer: &Layer) -> Self {
        Mount::Layer {
            dest: dest.to_string(),
            layer: layer.clone(),
            selector: None,
            readonly: true,
        }
    }

    /// Mount only `path` from the source layer.
    pub fn with_selector(mut self, path: &str) -> Self {
        if let Mount::Layer { selector, .. } = &mut self {
            *selector = Some(path.to_string());
        }
        self
    }

    /// Persistent cache directory shared across builds, keyed by its path.
    pub fn cache(dest: &str, sharing: CacheSharing) -> Self {
        Mount::Cache {
            dest: dest.to_string(),
            id: dest.to_string(),
            sharing,
        }
    }

    pub fn tmpfs(dest: &str) -> Self {
        Mount::Tmpfs {
            dest: dest.to_string(),
        }
    }

    fn into_spec(self) -> MountSpec {
        match self {
            Mount::Layer {
                dest,
                layer,
                selector,
                readonly,
            } => MountSpec {
                dest,
                source: MountSource::Layer {
                    input: layer.output,
                    selector,
                    readonly,
                },
            },
            Mount::Cache { dest, id, sharing } => MountSpec {
                dest,
                source: MountSource::Cache { id, sharing },
            },
            Mount::Tmpfs { dest } => MountSpec {
                dest,
                source: MountSource::Tmpfs,
            },
        }
    }
}

/// A command to run on top of a layer.
#[derive(Debug, Clone, Default)]
pub struct Exec {
    args: Vec<String>,
    env: Vec<(String, String)>,
    cwd: Option<String>,
    mounts: Vec<Mount>,
    secret_env: Vec<String>,
    name: Option<String>,
}

impl Exec {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Splits `command` into arguments the way a POSIX shell would quote
    /// them, without running a shell.
    pub fn shlex(command: &str) -> Result<Self> {
        Ok(Self::new(split_words(command)?))
    }

    pub fn shell(command: &str) -> Self {
        Self::new(["/bin/sh", "-c", command])
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    pub fn cwd(mut self, dir: &str) -> Self {
        self.cwd = Some(dir.to_string());
        self
    }

    pub fn mount(mut self, mount: Mount) -> Self {
        self.mounts.push(mount);
        self
    }

    /// Exposes the named solve secret as an environment variable of the same name.
    pub fn secret_env(mut self, name: &str) -> Self {
        self.secret_env.push(name.to_string());
        self
    }

    pub fn named(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

#[derive(Debug, Clone, Default)]
pub struct CopyOptions {
    pub allow_wildcard: bool,
    pub create_dest_path: bool,
    pub excludes: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct LocalOptions {
    pub excludes: Vec<String>,
    /// When set, the directory is hashed so the source changes with its contents.
    pub context_path: Option<PathBuf>,
}

impl LocalOptions {
    pub fn excluding(patterns: &[&str]) -> Self {
        Self {
            excludes: patterns.iter().map(|p| p.to_string()).collect(),
            context_path: None,
        }
    }
}

pub struct GraphBuilder {
    platform: Platform,
    ops: Vec<(String, Op)>,
    seen: HashSet<String>,
}

impl GraphBuilder {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            ops: Vec::new(),
            seen: HashSet::new(),
        }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    fn add_op(&mut self, op: Op) -> OutputRef {
        // Serialising plain data into a Vec cannot fail
        let buf = serde_json::to_vec(&op).unwrap_or_default();
        let digest = format!("sha256:{}", hex::encode(Sha256::digest(&buf)));

        if self.seen.insert(digest.clone()) {
            debug!(digest = %digest, op = %op.describe(), "added graph op");
            self.ops.push((digest.clone(), op));
        }

        OutputRef(digest)
    }

    pub fn image(&mut self, reference: &str) -> Layer {
        let op = Op::Source {
            identifier: format!("docker-image://{}", normalize_image_ref(reference)),
            attrs: BTreeMap::new(),
        };
        Layer::from_output(self.add_op(op))
    }

    /// Files supplied by the client at solve time under `name`.
    pub fn local(&mut self, name: &str, options: LocalOptions) -> Result<Layer> {
        let mut attrs = BTreeMap::new();

        if !options.excludes.is_empty() {
            attrs.insert(
                EXCLUDE_PATTERNS_ATTR.to_string(),
                serde_json::to_string(&options.excludes)?,
            );
        }

        if let Some(path) = &options.context_path {
            let hash = context_hash(path)?;
            attrs.insert(LOCAL_UNIQUE_ATTR.to_string(), hash);
        }

        let op = Op::Source {
            identifier: format!("local://{}", name),
            attrs,
        };
        Ok(Layer::from_output(self.add_op(op)))
    }

    pub fn mkdir(&mut self, on: &Layer, path: &str, mode: u32) -> Layer {
        let op = Op::File {
            input: on.output.clone(),
            action: FileAction::Mkdir {
                path: on.resolve(path),
                mode,
                make_parents: true,
            },
        };
        let output = self.add_op(op);
        on.derive(output)
    }

    pub fn rm(&mut self, on: &Layer, path: &str) -> Layer {
        let op = Op::File {
            input: on.output.clone(),
            action: FileAction::Rm {
                path: on.resolve(path),
                allow_not_found: true,
            },
        };
        let output = self.add_op(op);
        on.derive(output)
    }

    /// Copies `src` out of `from` to `dest` in `on`. `dest` is relative to
    /// the working directory of `on`; `src` to the root of `from`.
    pub fn copy(
        &mut self,
        on: &Layer,
        from: &Layer,
        src: &str,
        dest: &str,
        options: CopyOptions,
    ) -> Layer {
        let src = if src.starts_with('/') {
            src.to_string()
        } else {
            format!("/{}", src)
        };

        let op = Op::File {
            input: on.output.clone(),
            action: FileAction::Copy {
                from: from.output.clone(),
                src,
                dest: on.resolve(dest),
                allow_wildcard: options.allow_wildcard,
                create_dest_path: options.create_dest_path,
                excludes: options.excludes,
            },
        };
        let output = self.add_op(op);
        on.derive(output)
    }

    pub fn run(&mut self, on: &Layer, exec: Exec) -> Layer {
        let mut env: Vec<(String, String)> = on.env.clone();
        for (key, value) in exec.env {
            env.retain(|(k, _)| *k != key);
            env.push((key, value));
        }

        let cwd = match exec.cwd {
            Some(dir) => on.resolve(&dir),
            None => on.dir.clone(),
        };

        let op = Op::Exec {
            input: on.output.clone(),
            meta: ExecMeta {
                args: exec.args,
                env: env.iter().map(|(k, v)| format!("{}={}", k, v)).collect(),
                cwd,
            },
            mounts: exec.mounts.into_iter().map(Mount::into_spec).collect(),
            secret_env: exec.secret_env,
            name: exec.name,
        };
        let output = self.add_op(op);
        on.derive(output)
    }

    pub fn build(self, root: &Layer) -> Result<Definition> {
        let root = root
            .output
            .clone()
            .ok_or_else(|| anyhow!("cannot build a graph whose result is an empty filesystem"))?;

        let definition = Definition {
            ops: self
                .ops
                .into_iter()
                .map(|(digest, op)| GraphOp { digest, op })
                .collect(),
            root,
            platform: self.platform,
        };
        definition.validate()?;
        definition.log_graph_structure();

        Ok(definition)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphOp {
    pub digest: String,
    pub op: Op,
}

/// A complete build graph in dependency order, ready to hand to an executor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Definition {
    pub ops: Vec<GraphOp>,
    pub root: OutputRef,
    pub platform: Platform,
}

impl Definition {
    pub fn digest(&self) -> &str {
        self.root.digest()
    }

    pub fn op(&self, output: &OutputRef) -> Option<&Op> {
        self.ops
            .iter()
            .find(|o| o.digest == output.0)
            .map(|o| &o.op)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).context("Failed to serialize build definition")
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let definition: Self =
            serde_json::from_slice(data).context("Failed to parse build definition")?;
        definition.validate()?;
        Ok(definition)
    }

    /// Every input must be defined before it is used.
    fn validate(&self) -> Result<()> {
        let mut defined = HashSet::new();
        for graph_op in &self.ops {
            for input in graph_op.op.inputs() {
                if !defined.contains(input.digest()) {
                    bail!(
                        "op {} uses {} before it is defined",
                        graph_op.digest,
                        input.digest()
                    );
                }
            }
            defined.insert(graph_op.digest.as_str());
        }

        if !defined.contains(self.root.digest()) {
            bail!("root {} is not part of the graph", self.root.digest());
        }
        Ok(())
    }

    /// Commands run by exec steps, in graph order.
    pub fn exec_args(&self) -> Vec<&[String]> {
        self.ops
            .iter()
            .filter_map(|o| match &o.op {
                Op::Exec { meta, .. } => Some(meta.args.as_slice()),
                _ => None,
            })
            .collect()
    }

    fn log_graph_structure(&self) {
        debug!(
            ops = self.ops.len(),
            root = %self.root.digest(),
            platform = %self.platform,
            "build graph"
        );
        for (i, graph_op) in self.ops.iter().enumerate() {
            let short = graph_op.digest.get(7..19).unwrap_or(&graph_op.digest);
            debug!("  [{}] {} {}", i, short, graph_op.op.describe());
        }
    }
}

/// `python:3.12-slim` becomes `docker.io/library/python:3.12-slim`.
pub fn normalize_image_ref(reference: &str) -> String {
    let first = reference.split('/').next().unwrap_or_default();
    let has_registry = reference.contains('/')
        && (first.contains('.') || first.contains(':') || first == "localhost");

    if has_registry {
        reference.to_string()
    } else if reference.contains('/') {
        format!("docker.io/{}", reference)
    } else {
        format!("docker.io/library/{}", reference)
    }
}

fn split_words(command: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => bail!("unterminated single quote in `{}`", command),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => bail!("unterminated double quote in `{}`", command),
                        },
                        Some(ch) => current.push(ch),
                        None => bail!("unterminated double quote in `{}`", command),
                    }
                }
            }
            '\\' => {
                in_word = true;
                if let Some(ch) = chars.next() {
                    current.push(ch);
                }
            }
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }

    if in_word {
        words.push(current);
    }

    Ok(words)
}

fn context_hash(path: &Path) -> Result<String> {
    if !path.is_dir() {
        bail!("local context {:?} is not a directory", path);
    }

    let mut hasher = Sha256::new();

    let entries: Vec<_> = ignore::WalkBuilder::new(path)
        .standard_filters(false)
        .hidden(false)
        .sort_by_file_name(|a, b| a.cmp(b))
        .filter_entry(|e| e.file_name() != ".git")
        .build()
        .enumerate()
        .filter_map(|(i, e)| match e {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!("Failed to read context directory entry #{}: {}", i, err);
                None
            }
        })
        .collect();

    for entry in entries {
        let entry_path = entry.path();
        let rel_path = entry_path.strip_prefix(path).unwrap_or(entry_path);
        hasher.update(rel_path.to_string_lossy().as_bytes());

        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            match entry.metadata() {
                Ok(metadata) => {
                    hasher.update(metadata.len().to_le_bytes());
                    if let Ok(mtime) = metadata.modified() {
                        if let Ok(duration) = mtime.duration_since(std::time::UNIX_EPOCH) {
                            hasher.update(duration.as_nanos().to_le_bytes());
                        }
                    }
                }
                Err(e) => warn!("Failed to read metadata for {:?}: {}", entry_path, e),
            }
        }
    }

    Ok(hex::encode(hasher.finalize()))
}
