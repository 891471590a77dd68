//! Assistants implemented as separate programs.
//!
//! The program runs inside a build step. It sees its own source at
//! `/assistant`, the application at `/in/app` and the last run log at
//! `/in/log`, and writes the new application tree to `/out/app` and any
//! state files it wants to change to `/out/state`. Only `/out` survives the
//! step; it is exported and merged back into the session.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::dockerfile;
use crate::assist::{full_name, keys, load_env, Assistant, Context, Kind, State, ENV_FILE};
use crate::buildkit::{
    BuildExecutor, CacheSharing, CopyOptions, Exec, GraphBuilder, Layer, LocalOptions, Mount,
    SolveRequest,
};
use crate::error::{AssistError, Result};
use crate::fs::{merge_files, remove_dir_if_exists, replace_dir};

const SELF_LOCAL: &str = "assistant";
const APP_LOCAL: &str = "app";
const STATE_LOCAL: &str = "state";

const SANDBOX_DIRS: [&str; 7] = [
    "/assistant",
    "/in",
    "/in/app",
    "/in/state",
    "/out",
    "/out/app",
    "/out/state",
];

#[derive(Debug, Clone)]
pub struct ExternAssistant {
    kind: Kind,
    name: String,
    path: PathBuf,
}

impl ExternAssistant {
    pub fn new(kind: Kind, name: &str, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The image the program runs in and the command that starts it.
    async fn entry_point(
        &self,
        executor: &dyn BuildExecutor,
        b: &mut GraphBuilder,
        source: &Layer,
    ) -> Result<(Layer, Vec<String>)> {
        let dockerfile_path = self.path.join("Dockerfile");

        if tokio::fs::try_exists(&dockerfile_path).await? {
            debug!(assistant = %self.name, "building assistant from its Dockerfile");

            let content = tokio::fs::read_to_string(&dockerfile_path).await?;
            let compiled = dockerfile::compile_resolved(executor, &content, b, source).await?;
            let cmd: Vec<String> = compiled
                .config
                .entrypoint
                .into_iter()
                .chain(compiled.config.cmd)
                .collect();

            if cmd.is_empty() {
                return Err(AssistError::validation("No ENTRYPOINT or CMD in Dockerfile"));
            }
            return Ok((compiled.layer, cmd));
        }

        let st = b.image("docker.io/library/python:3.12-slim").with_env("PYTHONUNBUFFERED", "True");
        let mut st = b.mkdir(&st, "/assistant", 0o755);

        if tokio::fs::try_exists(self.path.join("requirements.txt")).await? {
            let install = Exec::shlex("pip install -r /assistant/requirements.txt")?
                .mount(Mount::readonly("/assistant", source))
                .mount(Mount::cache("/root/.cache/pip", CacheSharing::Locked));
            st = b.run(&st, install);
        }

        let cmd = ["python", "/assistant/__main__.py"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        Ok((st, cmd))
    }
}

#[async_trait]
impl Assistant for ExternAssistant {
    fn name(&self) -> String {
        full_name(self.kind, &self.name)
    }

    async fn may_work(&self, _ctx: &Context, _state: &State) -> Result<bool> {
        Ok(true)
    }

    async fn assist(&self, ctx: &Context, mut state: State) -> Result<State> {
        info!(assistant = %self.name(), path = ?self.path, app = ?ctx.app_path, "running extern assistant");

        let secrets = load_env(&self.path.join(ENV_FILE))?;

        let mut b = GraphBuilder::new(state.platform().clone());
        let source = b.local(
            SELF_LOCAL,
            LocalOptions {
                excludes: vec![ENV_FILE.to_string()],
                context_path: Some(self.path.clone()),
            },
        )?;
        let app = b.local(
            APP_LOCAL,
            LocalOptions {
                excludes: Vec::new(),
                context_path: Some(ctx.app_path.clone()),
            },
        )?;
        let state_files = b.local(STATE_LOCAL, LocalOptions::default())?;

        let (mut st, cmd) = self
            .entry_point(ctx.executor().as_ref(), &mut b, &source)
            .await?;
        for dir in SANDBOX_DIRS {
            st = b.mkdir(&st, dir, 0o755);
        }

        let mut run = Exec::new(cmd)
            .named(&self.name())
            .mount(Mount::layer("/assistant", &source))
            .mount(Mount::readonly("/in/app", &app));

        if tokio::fs::try_exists(ctx.state_path.join(keys::LOG)).await? {
            run = run
                .mount(Mount::readonly("/in/state", &state_files))
                .mount(Mount::readonly("/in/log", &state_files).with_selector(keys::LOG));
        }

        for name in secrets.keys() {
            run = run.secret_env(name);
        }

        let ran = b.run(&st, run);
        let out = b.copy(
            &Layer::scratch(),
            &ran,
            "/out/*",
            "/",
            CopyOptions {
                allow_wildcard: true,
                create_dest_path: true,
                excludes: Vec::new(),
            },
        );

        let out_dir = ctx.scratch_path.join("extern");
        remove_dir_if_exists(&out_dir)?;
        std::fs::create_dir_all(&out_dir)?;

        let secrets: BTreeMap<String, Vec<u8>> = secrets
            .into_iter()
            .map(|(k, v)| (k, v.into_bytes()))
            .collect();

        let request = SolveRequest::new(b.build(&out)?)
            .with_local(SELF_LOCAL, &self.path)
            .with_local(APP_LOCAL, &ctx.app_path)
            .with_local(STATE_LOCAL, &ctx.state_path)
            .with_secrets(secrets)
            .with_export(&out_dir);

        ctx.solve(&self.name(), request).await?;

        replace_dir(&out_dir.join("app"), &ctx.app_path)?;
        let merged = merge_files(&out_dir.join("state"), &ctx.state_path)?;
        debug!(files = ?merged, "merged extern state");

        state.load_state()?;
        Ok(state)
    }
}
