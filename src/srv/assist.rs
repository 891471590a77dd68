use anyhow::{anyhow, Context as _};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

use super::{report_error, Peer, Server};
use crate::assist::{full_name, load_name, Assistant, Context, Kind, State};
use crate::assistants::{DockerfileAssistant, PythonAssistant};
use crate::error::{AssistError, Result};
use crate::fs::remove_dir_if_exists;
use crate::protocol::{spawn_receiver, ActReply, Inbound, Outbound, ReplySink, RequestSource};

impl Server {
    /// Runs one assist session over the given stream halves.
    ///
    /// Failures are reported to the client as an error reply and returned.
    pub async fn assist(
        &self,
        peer: &Peer,
        requests: Box<dyn RequestSource>,
        replies: Box<dyn ReplySink>,
    ) -> Result<()> {
        let outbound = Outbound::new(replies);

        let result = if self.auth.authorize(peer) {
            info!(peer = %peer, "assist session started");
            self.run_session(outbound.clone(), spawn_receiver(requests))
                .await
        } else {
            warn!(peer = %peer, "unauthorized assist request");
            Err(AssistError::NotAuthorized)
        };

        if let Err(e) = &result {
            report_error(&outbound, e).await;
        }

        result
    }

    async fn run_session(&self, outbound: Outbound, mut inbound: Inbound) -> Result<()> {
        let first = inbound
            .recv()
            .await
            .map_err(|e| anyhow!(e).context("stream recv"))?;

        if first.cancel {
            return Err(AssistError::cancelled());
        }
        if first.choice.is_some() {
            return Err(AssistError::protocol("premature choice"));
        }

        let mut state = self.claim_state()?;
        let version = state.version()?.clone();
        debug!(version = %version, "session version");

        let ctx = Context::new(
            outbound,
            inbound,
            self.executor.clone(),
            &self.config.app_dir,
            &self.config.tracked_state_dir,
            &self.config.scratch_dir,
        )
        .with_exit_policy(self.config.exit_policy);

        if self.assistant_uploaded() {
            self.reload_uploaded_assistant()?;
        }

        state.load_state()?;
        if state.next().is_none() {
            self.find_workable_assistant(&ctx, &mut state).await?;
        }

        while let Some(assistant) = state.next().cloned() {
            info!(assistant = %assistant.name(), "next assistant");

            if !assistant.may_work(&ctx, &state).await? {
                return Err(AssistError::AssistantUnavailable(
                    "The specified next assistant says it won't work".to_string(),
                ));
            }

            state.set_next(None)?;
            state = assistant.assist(&ctx, state).await?;
        }

        debug!("next assistant not set");
        std::fs::rename(&state.path, &state.src_path)
            .with_context(|| format!("rename {:?} to {:?}", state.path, state.src_path))?;

        ctx.send(ActReply::done()).await
    }

    /// Moves the state directory out of the app tree for the session.
    fn claim_state(&self) -> Result<State> {
        let state = State::new(
            &self.config.state_dir,
            &self.config.tracked_state_dir,
            self.registry.clone(),
        );

        remove_dir_if_exists(&state.path)?;
        std::fs::create_dir_all(&state.src_path)
            .with_context(|| format!("create {:?}", state.src_path))?;

        match std::fs::rename(&state.src_path, &state.path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(anyhow::Error::new(e)
                    .context(format!("rename {:?} to {:?}", state.src_path, state.path))
                    .into())
            }
        }

        Ok(state)
    }

    fn reload_uploaded_assistant(&self) -> Result<()> {
        let dir = &self.config.assistant_dir;
        let name = load_name(dir)?;

        self.registry.del(&full_name(Kind::Local, &name));
        let assistant = self.registry.register_dir(Kind::Local, dir)?;
        info!(assistant = %assistant.name(), "reloaded uploaded assistant");
        Ok(())
    }

    async fn find_workable_assistant(&self, ctx: &Context, state: &mut State) -> Result<()> {
        if DockerfileAssistant.may_work(ctx, state).await? {
            return state.set_next(self.registry.get(&DockerfileAssistant.name())?);
        }

        if PythonAssistant.may_work(ctx, state).await? {
            return state.set_next(self.registry.get(&PythonAssistant.name())?);
        }

        Err(AssistError::AssistantUnavailable(
            "could not find assistant that may work".to_string(),
        ))
    }
}
