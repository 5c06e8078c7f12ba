//! Execution orchestrator
//!
//! Validates a request, resolves its limits, decodes its files and builds the
//! container invocation before taking an admission slot. Inside the slot it
//! checks the image, stages the files and runs the sandbox once.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::command::{self, Invocation};
use crate::config::SecurityProfile;
use crate::error::ExecutionError;
use crate::gate::AdmissionGate;
use crate::languages::{RuntimeDescriptor, RuntimeRegistry};
use crate::limits::{resolve_memory, resolve_timeout, RunLimits};
use crate::models::{ExecutionRequest, ExecutionResult, StageResult};
use crate::runner::{ContainerBackend, SandboxRunner};
use crate::source::{self, PreparedSources};

/// Everything needed to run one request, computed without side effects
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub language: String,
    pub version: String,
    pub image: String,
    pub sources: PreparedSources,
    pub invocation: Invocation,
    pub limits: RunLimits,
    pub stdin: Option<String>,
}

/// Executes requests against the container backend
#[derive(Clone)]
pub struct Executor {
    registry: Arc<RuntimeRegistry>,
    profile: Arc<SecurityProfile>,
    runner: SandboxRunner,
    gate: AdmissionGate,
}

impl Executor {
    pub fn new(
        registry: Arc<RuntimeRegistry>,
        backend: Arc<dyn ContainerBackend>,
        profile: Arc<SecurityProfile>,
        max_concurrent_jobs: usize,
    ) -> Self {
        Self {
            registry,
            runner: SandboxRunner::new(backend, profile.clone()),
            profile,
            gate: AdmissionGate::new(max_concurrent_jobs),
        }
    }

    pub fn registry(&self) -> &RuntimeRegistry {
        &self.registry
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Execute a request and return its Piston-shaped result.
    ///
    /// Program failures are reported inside `run`; `Err` means the request
    /// itself was rejected or the backend failed.
    pub async fn execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<ExecutionResult, ExecutionError> {
        let plan = self.plan(&request)?;
        info!(
            "Executing {} ({} file(s), timeout: {}s, memory: {})",
            plan.language,
            plan.sources.files().len(),
            plan.limits.timeout_secs,
            plan.limits.memory
        );

        let runner = self.runner.clone();
        self.gate.run(run_plan(runner, plan)).await
    }

    /// Validate a request and build its plan
    pub fn plan(&self, request: &ExecutionRequest) -> Result<ExecutionPlan, ExecutionError> {
        let runtime = self
            .registry
            .lookup(&request.language)
            .ok_or_else(|| ExecutionError::UnsupportedLanguage(request.language.clone()))?;

        let sources = PreparedSources::prepare(&request.files, runtime)?;
        let args = request.args.as_deref().unwrap_or_default();

        let run_timeout = resolve_timeout(&self.profile, request.run_timeout);
        let memory = resolve_memory(&self.profile, request.run_memory_limit);

        let (invocation, timeout_secs) = if runtime.compiled {
            let compile_timeout = resolve_timeout(&self.profile, request.compile_timeout);
            (
                compiled_invocation(runtime, &sources, args)?,
                compile_timeout + run_timeout,
            )
        } else {
            let argv = command::build(
                &runtime.run_command,
                sources.entry_file(),
                args,
                sources.entry_symbol(),
            );
            (Invocation::Direct(argv), run_timeout)
        };
        debug!("Invocation for {}: {:?}", runtime.language, invocation);

        Ok(ExecutionPlan {
            language: runtime.language.clone(),
            version: runtime.version.clone(),
            image: runtime.image.clone(),
            sources,
            invocation,
            limits: RunLimits {
                timeout_secs,
                memory,
            },
            stdin: request.stdin.clone(),
        })
    }
}

/// Compile and run chained in one shell line; compile gets no user args
fn compiled_invocation(
    runtime: &RuntimeDescriptor,
    sources: &PreparedSources,
    args: &[String],
) -> Result<Invocation, ExecutionError> {
    let compile_template = runtime.compile_command.as_ref().ok_or_else(|| {
        ExecutionError::Internal(format!("{} has no compile command", runtime.language))
    })?;

    let compile_argv = command::build(
        compile_template,
        sources.entry_file(),
        &[],
        sources.entry_symbol(),
    );
    let run_argv = command::build(
        &runtime.run_command,
        sources.entry_file(),
        args,
        sources.entry_symbol(),
    );
    Ok(command::shell_chain(&compile_argv, &run_argv))
}

async fn run_plan(
    runner: SandboxRunner,
    plan: ExecutionPlan,
) -> Result<ExecutionResult, ExecutionError> {
    if !runner.backend().image_exists(&plan.image).await? {
        return Err(ExecutionError::ImageNotFound(plan.image));
    }

    let staging = plan.sources.stage().await?;
    let outcome = runner
        .run(
            &plan.image,
            &plan.invocation,
            staging.path(),
            plan.stdin.as_deref(),
            &plan.limits,
        )
        .await;

    let staging_path = staging.path().display().to_string();
    if let Err(e) = source::unstage(staging).await {
        warn!("Failed to remove staging directory {}: {}", staging_path, e);
    }

    let outcome = outcome?;
    info!(
        "Finished {}: code={:?}, signal={:?}",
        plan.language, outcome.exit_code, outcome.signal
    );

    Ok(ExecutionResult {
        language: plan.language,
        version: plan.version,
        run: StageResult::new(
            outcome.stdout,
            outcome.stderr,
            outcome.exit_code,
            outcome.signal,
        ),
        compile: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileEncoding, SourceFile};
    use crate::runner::testing::FakeBackend;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn executor(backend: &Arc<FakeBackend>, capacity: usize) -> Executor {
        Executor::new(
            Arc::new(RuntimeRegistry::embedded().unwrap()),
            backend.clone(),
            Arc::new(SecurityProfile::default()),
            capacity,
        )
    }

    fn request(language: &str, code: &str) -> ExecutionRequest {
        ExecutionRequest::new(language, vec![SourceFile::new(code)])
    }

    #[tokio::test]
    async fn test_hello_world() {
        let backend = Arc::new(FakeBackend::new().with_output("Hello\n", "", 0));
        let result = executor(&backend, 5)
            .execute(request("py", "print('Hello')"))
            .await
            .unwrap();

        assert_eq!(result.language, "python");
        assert_eq!(result.version, "3.12.0");
        assert_eq!(result.run.stdout, "Hello\n");
        assert_eq!(result.run.output, "Hello\n");
        assert_eq!(result.run.code, Some(0));
        assert!(result.run.signal.is_none());
        assert!(result.compile.is_none());

        let specs = backend.created_specs();
        assert_eq!(specs[0].image, "vbase-python-runner");
        assert_eq!(specs[0].cmd, vec!["python3", "/code/main.py"]);
        assert_eq!(specs[0].memory_bytes, 128 * 1024 * 1024);
        assert!(specs[0].staging_dir.starts_with(std::env::temp_dir()));
        assert!(!specs[0].staging_dir.exists());
    }

    #[tokio::test]
    async fn test_stdin_is_delivered() {
        let backend = Arc::new(FakeBackend::new().echo_stdin());
        let mut req = request("python", "print(input())");
        req.stdin = Some("ping".into());

        let result = executor(&backend, 5).execute(req).await.unwrap();
        assert_eq!(result.run.stdout, "ping");
    }

    #[tokio::test]
    async fn test_out_of_memory() {
        let backend = Arc::new(FakeBackend::new().with_output("", "", 137).oom());
        let mut req = request("python", "x = 'a' * 10**10");
        req.run_memory_limit = Some(32 * 1024 * 1024);

        let result = executor(&backend, 5).execute(req).await.unwrap();
        assert_eq!(result.run.code, Some(137));
        assert_eq!(result.run.signal.as_deref(), Some("SIGKILL"));
        assert!(result.run.stderr.contains("Out of memory"));
        assert_eq!(backend.created_specs()[0].memory_bytes, 32 * 1024 * 1024);
    }

    #[tokio::test]
    async fn test_timeout() {
        let backend = Arc::new(FakeBackend::new().hang());
        let mut req = request("python", "while True: pass");
        req.run_timeout = Some(1000);

        let result = executor(&backend, 5).execute(req).await.unwrap();
        assert_eq!(result.run.code, Some(-1));
        assert_eq!(result.run.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(result.run.stdout, "");
        assert_eq!(backend.live(), 0);
    }

    #[tokio::test]
    async fn test_compile_error_is_in_run_stage() {
        let backend = Arc::new(FakeBackend::new().with_output(
            "",
            "main.c:1:1: error: expected identifier",
            1,
        ));
        let result = executor(&backend, 5)
            .execute(request("c", "int main( {"))
            .await
            .unwrap();

        assert_eq!(result.run.code, Some(1));
        assert!(result.run.stderr.contains("error"));
        assert!(result.compile.is_none());
    }

    #[test]
    fn test_java_plan() {
        let backend = Arc::new(FakeBackend::new());
        let mut req = request(
            "java",
            "public class Hello { public static void main(String[] a) {} }",
        );
        req.args = Some(vec!["one two".into()]);

        let plan = executor(&backend, 5).plan(&req).unwrap();
        assert_eq!(plan.limits.timeout_secs, 20);
        assert_eq!(
            plan.invocation,
            Invocation::Shell(
                "'javac' '-d' '/tmp' '/code/Main.java' && 'java' '-cp' '/tmp' 'Hello' 'one two'"
                    .into()
            )
        );
    }

    #[tokio::test]
    async fn test_unsupported_language_creates_nothing() {
        let backend = Arc::new(FakeBackend::new());
        let err = executor(&backend, 5)
            .execute(request("cobol", "DISPLAY 'HI'."))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::UnsupportedLanguage(ref l) if l == "cobol"));
        assert!(backend.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_bad_encoding_creates_nothing() {
        let backend = Arc::new(FakeBackend::new());
        let req = ExecutionRequest::new(
            "python",
            vec![SourceFile::new("%%%").with_encoding(FileEncoding::Base64)],
        );

        let err = executor(&backend, 5).execute(req).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidEncoding { .. }));
        assert!(err.is_client_error());
        assert!(backend.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_missing_image() {
        let backend = Arc::new(FakeBackend::new().without_image("vbase-go-runner"));
        let err = executor(&backend, 5)
            .execute(request("golang", "package main"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::ImageNotFound(ref i) if i == "vbase-go-runner"));
        assert!(backend.created_specs().is_empty());
    }

    #[tokio::test]
    async fn test_shell_metacharacters_stay_discrete() {
        let backend = Arc::new(FakeBackend::new());
        let mut req = request("node", "console.log(process.argv)");
        req.args = Some(vec!["; rm -rf /".into(), "$(whoami)".into()]);

        executor(&backend, 5).execute(req).await.unwrap();

        let cmd = &backend.created_specs()[0].cmd;
        assert_eq!(cmd, &vec!["node", "/code/main.js", "; rm -rf /", "$(whoami)"]);
    }

    #[tokio::test]
    async fn test_backend_failure_is_internal() {
        let backend = Arc::new(FakeBackend::new().fail_logs());
        let err = executor(&backend, 5)
            .execute(request("python", "print(1)"))
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Internal(_)));
        assert_eq!(backend.removed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_bound() {
        let backend = Arc::new(FakeBackend::new().with_run_time(Duration::from_millis(50)));
        let executor = executor(&backend, 2);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let executor = executor.clone();
            handles.push(tokio::spawn(async move {
                executor.execute(request("python", "print(1)")).await
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert_eq!(backend.created_specs().len(), 6);
        assert!(backend.peak() <= 2);
        assert_eq!(backend.live(), 0);
    }
}
