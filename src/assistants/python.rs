//! Python applications: `requirements.txt` plus `__main__.py`.
//!
//! Without a `requirements.txt` the user is offered to have one guessed
//! with pipreqs, which runs in its own build before the application graph
//! is assembled.

use anyhow::Context as _;
use async_trait::async_trait;
use regex::Regex;
use std::path::Path;
use std::sync::{Arc, OnceLock};
use tracing::{debug, info};

use super::dockerfile::CONTEXT;
use super::ExecAssistant;
use crate::assist::{full_name, Assistant, Context, Kind, State};
use crate::buildkit::{
    CacheSharing, CopyOptions, Exec, GraphBuilder, Layer, LocalOptions, Mount, SolveRequest,
};
use crate::error::{AssistError, Result};
use crate::protocol::ChoiceBool;

pub const NAME: &str = "python";

const BASE_IMAGE: &str = "docker.io/library/python:3.12-slim";
const PIP_CACHE: &str = "/root/.cache/pip";
const APT_CACHE: &str = "/var/cache/apt";
const REQUIREMENTS: &str = "requirements.txt";
const DEFAULT_PORT: u32 = 5000;

#[derive(Debug, Default, Clone, Copy)]
pub struct PythonAssistant;

#[async_trait]
impl Assistant for PythonAssistant {
    fn name(&self) -> String {
        full_name(Kind::Builtin, NAME)
    }

    async fn may_work(&self, ctx: &Context, _state: &State) -> Result<bool> {
        if exists(&ctx.app_path.join(REQUIREMENTS)).await? {
            ctx.log(NAME, "requirements.txt exists").await?;
            return Ok(true);
        }

        debug!("no requirements.txt");

        if exists(&ctx.app_path.join("__main__.py")).await? {
            return Ok(true);
        }

        ctx.log(NAME, "no __main__.py").await?;
        Ok(false)
    }

    async fn assist(&self, ctx: &Context, mut state: State) -> Result<State> {
        let requirements_path = ctx.app_path.join(REQUIREMENTS);

        if !exists(&requirements_path).await? {
            guess_requirements(ctx, &state).await?;
        }

        let requirements = tokio::fs::read_to_string(&requirements_path)
            .await
            .with_context(|| format!("read {}", requirements_path.display()))?;

        let system_packages = detect_system_packages(&requirements);
        info!(packages = ?system_packages, "python system packages");

        let mut b = GraphBuilder::new(state.platform().clone());
        let local = b.local(CONTEXT, LocalOptions::excluding(&[".venv", ".git"]))?;
        let mut st = slim_base(&mut b);

        if !system_packages.is_empty() {
            let install = format!(
                "dash -c \"apt update && apt install -y {}\"",
                system_packages.join(" ")
            );
            st = b.run(
                &st,
                Exec::shlex(&install)?.mount(Mount::cache(APT_CACHE, CacheSharing::Locked)),
            );
        }

        st = b.copy(&st, &local, REQUIREMENTS, ".", CopyOptions::default());
        st = pip(&mut b, &st, "pip install -r requirements.txt")?;
        st = b.copy(&st, &local, ".", ".", CopyOptions::default());

        state.set_build_graph(b.build(&st)?);
        state.set_working_dir("/app")?;
        state.set_cmd(vec!["python".to_string(), "__main__.py".to_string()])?;
        state.set_ports(&[DEFAULT_PORT])?;
        state.set_next(Some(Arc::new(ExecAssistant)))?;

        Ok(state)
    }
}

/// Debian packages needed by the entries of a `requirements.txt`.
pub fn detect_system_packages(requirements: &str) -> Vec<String> {
    static GIT: OnceLock<Regex> = OnceLock::new();
    static OPENCV: OnceLock<Regex> = OnceLock::new();

    let git = GIT.get_or_init(|| Regex::new(r"@\s+git").expect("valid regex"));
    let opencv =
        OPENCV.get_or_init(|| Regex::new(r"^\s*opencv-python\b").expect("valid regex"));

    let mut packages: Vec<String> = Vec::new();
    let mut add = |name: &str| {
        if !packages.iter().any(|p| p == name) {
            packages.push(name.to_string());
        }
    };

    for line in requirements.lines() {
        if git.is_match(line) {
            add("git");
        }
        if opencv.is_match(line) {
            add("libgl1");
            add("libglib2.0-0");
        }
    }

    packages
}

async fn exists(path: &Path) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(anyhow::Error::new(e)
            .context(format!("stat {}", path.display()))
            .into()),
    }
}

fn slim_base(b: &mut GraphBuilder) -> Layer {
    let st = b.image(BASE_IMAGE).with_env("PYTHONUNBUFFERED", "True");
    let st = b.mkdir(&st, "/app", 0o755).with_dir("/app");
    b.rm(&st, "/etc/apt/apt.conf.d/docker-clean")
}

fn pip(b: &mut GraphBuilder, on: &Layer, command: &str) -> Result<Layer> {
    let exec = Exec::shlex(command)?.mount(Mount::cache(PIP_CACHE, CacheSharing::Locked));
    Ok(b.run(on, exec))
}

/// Offers to guess `requirements.txt` and writes the guess into the app.
async fn guess_requirements(ctx: &Context, state: &State) -> Result<()> {
    let guess = ctx
        .choose_bool(
            "ayup",
            ChoiceBool {
                value: true,
                title: "No requirements.txt; try guessing it?".to_string(),
                description:
                    "Guess what dependencies the program has by inspecting the source code."
                        .to_string(),
                affirmative: "Yes, guess".to_string(),
                negative: "No, I'll make it".to_string(),
            },
        )
        .await?;

    if !guess {
        return Err(AssistError::validation(
            "can't continue without requirements.txt; please provide one!",
        ));
    }

    info!("guessing requirements.txt");

    let mut b = GraphBuilder::new(state.platform().clone());
    let local = b.local(CONTEXT, LocalOptions::excluding(&[".git"]))?;
    let st = slim_base(&mut b);
    let st = pip(&mut b, &st, "pip install pipreqs")?;
    let st = b.copy(&st, &local, ".", ".", CopyOptions::default());
    let st = b.run(&st, Exec::new(["pipreqs"]));

    let request = SolveRequest::new(b.build(&st)?).with_local(CONTEXT, &ctx.app_path);
    let solved = ctx.solve("pipreqs", request).await?;

    let contents = ctx
        .executor()
        .read_file(&solved, "/app/requirements.txt")
        .await
        .context("read guessed requirements.txt")?;

    tokio::fs::write(ctx.app_path.join(REQUIREMENTS), contents).await?;
    Ok(())
}
