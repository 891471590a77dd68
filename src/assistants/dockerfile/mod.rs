//! Builds applications that ship their own Dockerfile.

mod parse;

pub use parse::{
    base_images, compile, compile_with_bases, parse_instructions, Compiled, Instruction,
};

use anyhow::Context as _;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use super::ExecAssistant;
use crate::assist::{full_name, Assistant, Context, Kind, State};
use crate::buildkit::{BuildExecutor, GraphBuilder, Layer, LocalOptions};
use crate::error::{AssistError, Result};

pub const NAME: &str = "dockerfile";

/// Local source name the Dockerfile's build context is served under.
pub const CONTEXT: &str = "context";

#[derive(Debug, Default, Clone, Copy)]
pub struct DockerfileAssistant;

#[async_trait]
impl Assistant for DockerfileAssistant {
    fn name(&self) -> String {
        full_name(Kind::Builtin, NAME)
    }

    async fn may_work(&self, ctx: &Context, _state: &State) -> Result<bool> {
        let path = ctx.app_path.join("Dockerfile");
        match tokio::fs::metadata(&path).await {
            Ok(_) => {
                ctx.log("ayup", "Found Dockerfile, will use it\n").await?;
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn assist(&self, ctx: &Context, mut state: State) -> Result<State> {
        let content = tokio::fs::read_to_string(ctx.app_path.join("Dockerfile")).await?;

        let mut builder = GraphBuilder::new(state.platform().clone());
        let context = builder.local(
            CONTEXT,
            LocalOptions {
                excludes: dockerignore(&ctx.app_path)?,
                context_path: Some(ctx.app_path.clone()),
            },
        )?;

        let compiled =
            compile_resolved(ctx.executor().as_ref(), &content, &mut builder, &context).await?;
        let definition = builder.build(&compiled.layer)?;

        let config = compiled.config;
        let cmd: Vec<String> = config
            .entrypoint
            .iter()
            .chain(config.cmd.iter())
            .cloned()
            .collect();

        if cmd.is_empty() {
            return Err(AssistError::validation("No ENTRYPOINT or CMD in Dockerfile"));
        }

        let working_dir = if config.working_dir.is_empty() {
            "/".to_string()
        } else {
            config.working_dir
        };

        let ports = tcp_ports(&config.exposed_ports)?;
        info!(cmd = ?cmd, working_dir = %working_dir, ports = ?ports, "dockerfile image config");

        state.set_build_graph(definition);
        state.set_cmd(cmd)?;
        state.set_working_dir(&working_dir)?;
        state.set_ports(&ports)?;
        state.set_next(Some(Arc::new(ExecAssistant)))?;

        Ok(state)
    }
}

/// Compiles `content` after fetching the config of every registry image
/// its stages start from.
pub async fn compile_resolved(
    executor: &dyn BuildExecutor,
    content: &str,
    builder: &mut GraphBuilder,
    context: &Layer,
) -> Result<Compiled> {
    let mut bases = HashMap::new();

    for image in base_images(content)? {
        let config = executor
            .resolve_image_config(&image, builder.platform())
            .await
            .with_context(|| format!("resolve image config for {}", image))?;
        debug!(image = %image, cmd = ?config.cmd, entrypoint = ?config.entrypoint, "resolved base image");
        bases.insert(image, config);
    }

    compile_with_bases(content, builder, context, &bases)
}

/// Port numbers of the TCP ports in `EXPOSE` entries. Entries without a
/// protocol are TCP; other protocols are skipped. Ranges such as
/// `8000-8010` expand to every port in them.
pub fn tcp_ports(exposed: &[String]) -> Result<Vec<u32>> {
    let mut ports = Vec::new();

    for entry in exposed {
        let (number, proto) = entry.split_once('/').unwrap_or((entry.as_str(), "tcp"));
        if !proto.eq_ignore_ascii_case("tcp") {
            debug!(port = %entry, "ignoring non-tcp port");
            continue;
        }

        let (start, end) = match number.split_once('-') {
            Some((start, end)) => (parse_port(start)?, parse_port(end)?),
            None => {
                let port = parse_port(number)?;
                (port, port)
            }
        };

        if start > end {
            return Err(AssistError::validation(format!(
                "invalid port range {}: start is after end",
                number
            )));
        }

        for port in start..=end {
            if !ports.contains(&u32::from(port)) {
                ports.push(u32::from(port));
            }
        }
    }

    Ok(ports)
}

fn parse_port(number: &str) -> Result<u16> {
    number.trim().parse().map_err(|e| {
        AssistError::validation(format!("parsing port number({}): {}", number, e))
    })
}

fn dockerignore(app_path: &Path) -> Result<Vec<String>> {
    let content = match std::fs::read_to_string(app_path.join(".dockerignore")) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#'))
        .map(str::to_string)
        .collect())
}
