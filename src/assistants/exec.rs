//! Runs the application built by an earlier assistant.

use anyhow::Context as _;
use async_trait::async_trait;
use std::io::Write;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::dockerfile::CONTEXT;
use crate::assist::{full_name, keys, Assistant, Context, Kind, LogHook, State};
use crate::buildkit::{SolveRequest, StartRequest};
use crate::error::{AssistError, Result};
use crate::protocol::ActReply;

pub const NAME: &str = "exec";

#[derive(Debug, Default, Clone, Copy)]
pub struct ExecAssistant;

#[async_trait]
impl Assistant for ExecAssistant {
    fn name(&self) -> String {
        full_name(Kind::Builtin, NAME)
    }

    async fn may_work(&self, _ctx: &Context, state: &State) -> Result<bool> {
        if state.build_graph().is_none() {
            debug!("no build graph");
            return Ok(false);
        }
        Ok(true)
    }

    async fn assist(&self, ctx: &Context, state: State) -> Result<State> {
        let Some(definition) = state.build_graph() else {
            return Err(AssistError::validation("Nothing has been built to run"));
        };

        if state.cmd().is_empty() {
            return Err(AssistError::validation("No command set to run the application"));
        }

        let log_path = state.path.join(keys::LOG);
        let log_file = std::fs::File::create(&log_path)
            .with_context(|| format!("create {}", log_path.display()))?;
        let log_file = Arc::new(Mutex::new(log_file));

        let hook: LogHook = Arc::new(move |data: &[u8]| {
            let Ok(mut file) = log_file.lock() else {
                return;
            };
            if let Err(e) = file.write_all(data) {
                warn!(error = %e, "writing application log");
            }
        });
        let ctx = ctx.clone().with_on_log(hook);

        for port in state.ports() {
            ctx.send(ActReply::expose("", *port)).await?;
        }

        let request = SolveRequest::new(definition.as_ref().clone()).with_local(CONTEXT, &ctx.app_path);
        let solved = ctx.solve(NAME, request).await?;

        ctx.exec_proc(
            &solved,
            "app",
            StartRequest {
                cwd: state.working_dir().to_string(),
                args: state.cmd().to_vec(),
                hostname: None,
            },
        )
        .await?;

        Ok(state)
    }
}
