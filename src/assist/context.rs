use anyhow::{anyhow, Context as _};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::CancelEscalation;
use crate::buildkit::{
    BuildExecutor, ProcessOutput, SolveRequest, SolveStatus, SolvedRef, StartRequest, StatusLine,
    StatusRenderer,
};
use crate::config::ExitPolicy;
use crate::error::{AssistError, Result};
use crate::protocol::{ActReply, ChoiceBool, Inbound, Outbound};

/// Called with every chunk of process or build output.
pub type LogHook = Arc<dyn Fn(&[u8]) + Send + Sync>;

const STATUS_BUFFER: usize = 16;
const READ_CHUNK: usize = 4096;

/// Everything an assistant needs to talk to the client and the build engine.
///
/// Cloning is cheap; clones share the stream halves.
#[derive(Clone)]
pub struct Context {
    outbound: Outbound,
    inbound: Arc<Mutex<Inbound>>,
    executor: Arc<dyn BuildExecutor>,
    on_log: Option<LogHook>,
    exit_policy: ExitPolicy,
    pub app_path: PathBuf,
    pub state_path: PathBuf,
    pub scratch_path: PathBuf,
}

impl Context {
    pub fn new(
        outbound: Outbound,
        inbound: Inbound,
        executor: Arc<dyn BuildExecutor>,
        app_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        scratch_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            outbound,
            inbound: Arc::new(Mutex::new(inbound)),
            executor,
            on_log: None,
            exit_policy: ExitPolicy::default(),
            app_path: app_path.into(),
            state_path: state_path.into(),
            scratch_path: scratch_path.into(),
        }
    }

    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    pub fn with_on_log(mut self, hook: LogHook) -> Self {
        self.on_log = Some(hook);
        self
    }

    pub fn executor(&self) -> &Arc<dyn BuildExecutor> {
        &self.executor
    }

    pub async fn send(&self, reply: ActReply) -> Result<()> {
        self.outbound.send(reply).await.map_err(AssistError::from)
    }

    pub async fn log(&self, source: &str, text: impl Into<String>) -> Result<()> {
        self.send(ActReply::log(source, text)).await
    }

    /// Asks the client a yes/no question and waits for the answer.
    ///
    /// The receive side is held until the answer arrives, so only one
    /// question can be outstanding.
    pub async fn choose_bool(&self, source: &str, choice: ChoiceBool) -> Result<bool> {
        let mut inbound = self.inbound.lock().await;
        let title = choice.title.clone();

        debug!(title = %title, "waiting for choice");
        self.send(ActReply::choice(source, choice)).await?;

        let req = inbound
            .recv()
            .await
            .map_err(|e| anyhow!(e).context("waiting for choice"))?;

        if req.cancel {
            return Err(AssistError::cancelled());
        }

        match req.choice.as_ref().and_then(|c| c.as_bool()) {
            Some(answer) => Ok(answer.value),
            None => Err(AssistError::protocol(format!("expected choice for '{}'", title))),
        }
    }

    /// Solves a graph, forwarding its progress to the client as `source`.
    ///
    /// Client messages are not read while the solve runs.
    pub async fn solve(&self, source: &str, request: SolveRequest) -> Result<SolvedRef> {
        let (tx, forwarder) = self.status_sender(source);
        let result = self.executor.solve(request, tx).await;

        if let Err(e) = forwarder.await {
            warn!(source, error = %e, "status forwarder failed");
        }

        Ok(result.context("solve")?)
    }

    /// Renders build status into log replies until the sender is dropped.
    pub fn status_sender(&self, source: &str) -> (mpsc::Sender<SolveStatus>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<SolveStatus>(STATUS_BUFFER);
        let outbound = self.outbound.clone();
        let on_log = self.on_log.clone();
        let source = source.to_string();

        let handle = tokio::spawn(async move {
            let mut renderer = StatusRenderer::new();
            while let Some(status) = rx.recv().await {
                for line in renderer.render(&status) {
                    if let (StatusLine::Log(data), Some(hook)) = (&line, &on_log) {
                        hook(data);
                    }
                    // A dead stream surfaces on the driver's next send
                    if let Err(e) = outbound.send(ActReply::log(&source, line.text())).await {
                        debug!(error = %e, "dropping build status");
                    }
                }
            }
        });

        (tx, handle)
    }

    /// Runs `request.args` in the solved filesystem, streaming its output as
    /// `source` and turning client cancels into signals.
    pub async fn exec_proc(
        &self,
        solved: &SolvedRef,
        source: &str,
        request: StartRequest,
    ) -> Result<()> {
        self.log("ayup", format!("Executing `{}`", request.args.join(" ")))
            .await?;

        let process = self
            .executor
            .start(solved, request)
            .await
            .context("start process")?;

        let mut pumps = Vec::new();
        for output in [process.stdout, process.stderr].into_iter().flatten() {
            pumps.push(self.spawn_pump(source, output));
        }

        let control = process.control;
        let mut inbound = self.inbound.lock().await;
        let mut escalation = CancelEscalation::new();
        let mut wait = control.wait();

        let outcome: Result<u32> = loop {
            tokio::select! {
                status = &mut wait => {
                    break status.context("process wait").map(|s| s.code).map_err(Into::into);
                }
                req = inbound.recv() => {
                    let req = match req {
                        Ok(req) => req,
                        Err(e) => break Err(anyhow!(e).into()),
                    };

                    if !req.cancel {
                        break Err(AssistError::protocol("Unexpected message"));
                    }

                    let Some(signal) = escalation.next_signal() else {
                        break Err(anyhow!("more than 3 cancel attempts").into());
                    };

                    info!(source, signal = ?signal, attempt = escalation.attempts(), "cancel requested");
                    if let Err(e) = control.signal(signal).await {
                        break Err(e.context("process signal").into());
                    }
                }
            }
        };

        let code = match outcome {
            Ok(code) => code,
            Err(e) => {
                for pump in &pumps {
                    pump.abort();
                }
                return Err(e);
            }
        };

        for pump in pumps {
            if let Err(e) = pump.await {
                debug!(error = %e, "output pump ended abnormally");
            }
        }

        info!(source, code, "process exited");
        if escalation.attempts() > 0 {
            return Err(AssistError::cancelled());
        }
        if self.exit_policy.is_failure(code) {
            return Err(AssistError::ProcessExit { code });
        }

        Ok(())
    }

    fn spawn_pump(&self, source: &str, mut output: ProcessOutput) -> JoinHandle<()> {
        let outbound = self.outbound.clone();
        let on_log = self.on_log.clone();
        let source = source.to_string();

        tokio::spawn(async move {
            let mut buf = vec![0u8; READ_CHUNK];
            loop {
                let n = match output.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        warn!(source = %source, error = %e, "reading process output");
                        break;
                    }
                };

                let chunk = &buf[..n];
                let text = String::from_utf8_lossy(chunk);
                let reply = ActReply::log(&source, text.trim_end_matches('\u{0b}'));
                if outbound.send(reply).await.is_err() {
                    break;
                }
                if let Some(hook) = &on_log {
                    hook(chunk);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buildkit::{
        GraphBuilder, MockExecutor, MockExit, MockProcess, Platform, Vertex,
    };
    use crate::protocol::{channel_transport, spawn_receiver, ActReq, ClientEnd};
    use nix::sys::signal::Signal;

    fn context(executor: Arc<MockExecutor>) -> (Context, ClientEnd) {
        let (client, requests, replies) = channel_transport();
        let ctx = Context::new(
            Outbound::new(Box::new(replies)),
            spawn_receiver(Box::new(requests)),
            executor,
            "/app",
            "/state",
            "/scratch",
        );
        (ctx, client)
    }

    async fn solved(ctx: &Context) -> SolvedRef {
        let mut b = GraphBuilder::new(Platform::linux_amd64());
        let base = b.image("alpine");
        ctx.solve("test", SolveRequest::new(b.build(&base).unwrap()))
            .await
            .unwrap()
    }

    fn start(args: &[&str]) -> StartRequest {
        StartRequest {
            cwd: "/app".to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            hostname: None,
        }
    }

    fn drain(client: &mut ClientEnd) -> Vec<ActReply> {
        let mut replies = Vec::new();
        while let Ok(reply) = client.replies.try_recv() {
            replies.push(reply);
        }
        replies
    }

    #[tokio::test]
    async fn test_exec_streams_output() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess::exits(0).with_stdout("hello\u{0b}"));
        let (ctx, mut client) = context(executor.clone());

        let solved = solved(&ctx).await;
        ctx.exec_proc(&solved, "app", start(&["python", "app.py"]))
            .await
            .unwrap();

        let replies = drain(&mut client);
        assert_eq!(replies[0].source, "ayup");
        assert_eq!(replies[0].log_text(), Some("Executing `python app.py`"));
        assert!(replies
            .iter()
            .any(|r| r.source == "app" && r.log_text() == Some("hello")));
        assert_eq!(executor.started()[0].cwd, "/app");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess::exits(3));
        let (ctx, _client) = context(executor);

        let solved = solved(&ctx).await;
        let err = ctx
            .exec_proc(&solved, "app", start(&["false"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::ProcessExit { code: 3 }));
    }

    #[tokio::test]
    async fn test_unknown_only_policy_ignores_plain_failures() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess::exits(3));
        executor.push_process(MockProcess::exits(255));
        let (ctx, _client) = context(executor);
        let ctx = ctx.with_exit_policy(ExitPolicy::UnknownOnly);

        let solved = solved(&ctx).await;
        ctx.exec_proc(&solved, "app", start(&["false"])).await.unwrap();
        let err = ctx
            .exec_proc(&solved, "app", start(&["false"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::ProcessExit { code: 255 }));
    }

    #[tokio::test]
    async fn test_cancel_escalation() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: MockExit::OnSignal {
                signal: Signal::SIGKILL,
                code: 137,
            },
        });
        let (ctx, client) = context(executor.clone());

        for _ in 0..3 {
            client.send(ActReq::cancel()).unwrap();
        }

        let solved = solved(&ctx).await;
        let err = ctx
            .exec_proc(&solved, "app", start(&["sleep", "infinity"]))
            .await
            .unwrap_err();

        assert!(matches!(err, AssistError::UserCancelled(_)));

        assert_eq!(
            executor.signals(),
            vec![Signal::SIGINT, Signal::SIGTERM, Signal::SIGKILL]
        );
    }

    #[tokio::test]
    async fn test_process_that_exits_cleanly_after_cancel_is_still_cancelled() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: MockExit::OnSignal {
                signal: Signal::SIGINT,
                code: 0,
            },
        });
        let (ctx, client) = context(executor.clone());
        client.send(ActReq::cancel()).unwrap();

        let solved = solved(&ctx).await;
        let err = ctx
            .exec_proc(&solved, "app", start(&["serve"]))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "analysis canceled");
        assert_eq!(executor.signals(), vec![Signal::SIGINT]);
    }

    #[tokio::test]
    async fn test_fourth_cancel_is_fatal() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: MockExit::Never,
        });
        let (ctx, client) = context(executor.clone());

        for _ in 0..4 {
            client.send(ActReq::cancel()).unwrap();
        }

        let solved = solved(&ctx).await;
        let err = ctx
            .exec_proc(&solved, "app", start(&["sleep", "infinity"]))
            .await
            .unwrap_err();

        assert!(err.is_internal());
        assert_eq!(err.to_string(), "more than 3 cancel attempts");
        assert_eq!(executor.signals().len(), 3);
    }

    #[tokio::test]
    async fn test_non_cancel_message_during_exec() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_process(MockProcess {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit: MockExit::Never,
        });
        let (ctx, client) = context(executor);
        client.send(ActReq::chosen(true)).unwrap();

        let solved = solved(&ctx).await;
        let err = ctx
            .exec_proc(&solved, "app", start(&["serve"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AssistError::ProtocolViolation(_)));
    }

    #[tokio::test]
    async fn test_choose_bool() {
        let (ctx, mut client) = context(Arc::new(MockExecutor::new()));
        client.send(ActReq::chosen(false)).unwrap();
        client.send(ActReq::cancel()).unwrap();

        let choice = ChoiceBool {
            value: true,
            title: "Proceed?".to_string(),
            ..Default::default()
        };
        assert!(!ctx.choose_bool("ayup", choice.clone()).await.unwrap());

        let err = ctx.choose_bool("ayup", choice).await.unwrap_err();
        assert!(matches!(err, AssistError::UserCancelled(_)));

        let replies = drain(&mut client);
        assert_eq!(replies.len(), 2);
        assert!(matches!(
            replies[0].variant,
            Some(crate::protocol::act_reply::Variant::Choice(_))
        ));
    }

    #[tokio::test]
    async fn test_solve_forwards_status_and_hook() {
        let executor = Arc::new(MockExecutor::new());
        executor.push_status(vec![SolveStatus {
            vertexes: vec![Vertex {
                digest: "sha256:a".to_string(),
                name: "FROM alpine".to_string(),
                ..Default::default()
            }],
            logs: vec![crate::buildkit::VertexLog {
                vertex: "sha256:a".to_string(),
                stream: 1,
                data: b"pulling\n".to_vec(),
                timestamp: chrono::Utc::now(),
            }],
            warnings: Vec::new(),
        }]);

        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let (ctx, mut client) = context(executor);
        let ctx = ctx.with_on_log(Arc::new(move |data: &[u8]| {
            sink.lock().unwrap().extend_from_slice(data);
        }));

        solved(&ctx).await;

        let texts: Vec<String> = drain(&mut client)
            .iter()
            .filter_map(|r| r.log_text().map(str::to_string))
            .collect();
        assert_eq!(texts, vec!["#1    NEW FROM alpine\n", "pulling\n"]);
        assert_eq!(seen.lock().unwrap().as_slice(), b"pulling\n");
    }
}
