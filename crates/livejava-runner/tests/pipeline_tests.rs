//! End-to-end cycles through the engine and session.
//!
//! The toolchain is stood in for by `sh -c` scripts: the "compiler" fails when
//! the source contains `BROKEN`, and the "launcher" runs the shell lines the
//! source carries in `// run:` comments.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use livejava_core::{CycleError, ErrorKind, RunError, RunResult, SourceText};
use livejava_runner::{
    program_println, Backend, CompileAndRun, CompileAndRunEngine, EditSession, EmbedContext, EmbeddedCompiler,
    LoadedProgram, ProcessRunner, ProcessTracker, Projection, SessionOptions, Toolchain,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

const FAKE_COMPILER: &str = r#"
if grep -q BROKEN "$1"; then
  echo "$1:2: error: ';' expected" >&2
  echo "1 error" >&2
  exit 1
fi
"#;

const FAKE_LAUNCHER: &str = r#"sed -n 's#^// run: ##p' "$1.java" | sh"#;

fn sh_toolchain() -> Toolchain {
    Toolchain {
        compiler: vec!["sh".into(), "-c".into(), FAKE_COMPILER.into(), "javac".into()],
        launcher: vec!["sh".into(), "-c".into(), FAKE_LAUNCHER.into(), "java".into()],
    }
}

fn engine_in(dir: &TempDir, runner: ProcessRunner, backend: Backend) -> CompileAndRunEngine {
    CompileAndRunEngine::new(dir.path().join("work"), runner, backend)
}

fn program(class: &str, run: &[&str]) -> String {
    let mut src = format!("public class {class} {{\n    public static void main(String[] args) {{ }}\n}}\n");
    for line in run {
        src.push_str(&format!("// run: {line}\n"));
    }
    src
}

async fn wait_until_empty(tracker: &ProcessTracker) {
    for _ in 0..100 {
        if tracker.is_empty() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("processes still tracked: {:?}", tracker.pids());
}

#[tokio::test]
async fn successful_cycle_collects_output_and_writes_snapshot() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let source = program("Foo", &["echo hi"]);

    let result = engine
        .run_cycle(SourceText::from(source.as_str()), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.class_name, "Foo");
    assert_eq!(result.output_lines, vec!["hi"]);
    let written = std::fs::read(dir.path().join("work/Foo.java")).unwrap();
    assert_eq!(written, source.as_bytes());
}

#[tokio::test]
async fn syntax_error_skips_the_launcher() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let source = program("Foo", &["echo should-not-run"]).replace("{ }", "{ BROKEN }");

    let err = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Compile);
    assert_eq!(err.class_name.as_deref(), Some("Foo"));
    assert!(!err.message.is_empty());
    assert_eq!(err.partial_output, vec!["Foo.java:2: error: ';' expected", "1 error"]);
}

#[tokio::test]
async fn runtime_failure_keeps_output() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let source = program("Boom", &["echo before", "echo 'Exception in thread \"main\"' >&2", "exit 1"]);

    let err = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::Runtime);
    assert_eq!(err.partial_output, vec!["before", "Exception in thread \"main\""]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stack_trace_follows_the_output_before_it() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let source = program(
        "Throws",
        &[
            "for i in 1 2 3 4 5; do echo step$i; echo warn$i >&2; done",
            "echo 'Exception in thread \"main\" java.lang.IllegalStateException' >&2",
            "echo '\tat Throws.main(Throws.java:3)' >&2",
            "exit 1",
        ],
    );

    for _ in 0..10 {
        let err = engine
            .run_cycle(source.as_str().into(), CancellationToken::new())
            .await
            .unwrap_err();
        let mut expected: Vec<String> = (1..=5).flat_map(|i| [format!("step{i}"), format!("warn{i}")]).collect();
        expected.push("Exception in thread \"main\" java.lang.IllegalStateException".into());
        expected.push("\tat Throws.main(Throws.java:3)".into());
        assert_eq!(err.kind, ErrorKind::Runtime);
        assert_eq!(err.partial_output, expected);
    }
}

#[tokio::test]
async fn missing_compiler_is_a_spawn_error() {
    let dir = TempDir::new().unwrap();
    let toolchain = Toolchain {
        compiler: vec!["livejava-no-such-javac".into()],
        ..sh_toolchain()
    };
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(toolchain));

    let err = engine
        .run_cycle(program("Foo", &[]).into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ProcessSpawn);
    assert!(err.message.contains("livejava-no-such-javac"));
}

#[tokio::test]
async fn missing_class_never_touches_disk() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));

    let err = engine
        .run_cycle("System.out.println(1);".into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::MalformedSource);
    assert_eq!(err.class_name, None);
    assert!(!dir.path().join("work").exists());
}

#[tokio::test]
async fn class_names_cannot_escape_the_workdir() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));

    let err = engine
        .run_cycle("public class ../../x { }".into(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::MalformedSource);

    let snapshot = SourceText::from("class x {}");
    let written = engine.write_source(&snapshot, "../escaped").await;
    assert!(matches!(written, Err(CycleError::MalformedSource)));
    assert!(!dir.path().join("escaped.java").exists());
}

#[tokio::test]
async fn generic_class_compiles_under_its_plain_name() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let source = program("Box", &["echo boxed"]).replace("class Box {", "class Box<T> {");

    let result = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap();

    assert_eq!(result.class_name, "Box");
    assert!(dir.path().join("work/Box.java").exists());
}

#[tokio::test]
async fn timeout_kills_the_program_and_keeps_partial_output() {
    let dir = TempDir::new().unwrap();
    let tracker = ProcessTracker::new();
    let engine = engine_in(&dir, ProcessRunner::new(tracker.clone()), Backend::External(sh_toolchain()))
        .with_timeout(Some(Duration::from_secs(1)));
    let source = program("Spin", &["echo started", "sleep 30"]);

    let err = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap_err();

    assert_eq!(err.kind, ErrorKind::TimedOut);
    assert_eq!(err.partial_output, vec!["started"]);
    wait_until_empty(&tracker).await;
}

#[tokio::test]
async fn cancelled_cycle_reports_cancelled() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(sh_toolchain()));
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = engine
        .run_cycle(program("Wait", &["echo waiting", "sleep 30"]).into(), cancel)
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Cancelled);
    wait_until_empty(engine.runner().tracker()).await;
}

struct FakeCompiler {
    panic_in_main: bool,
}

struct FakeProgram {
    class_name: String,
    panic_in_main: bool,
}

impl EmbeddedCompiler for FakeCompiler {
    fn compile(
        &self,
        _ctx: &EmbedContext,
        source_file: &Path,
        class_name: &str,
    ) -> Result<Box<dyn LoadedProgram>, CycleError> {
        if !source_file.exists() {
            return Err(CycleError::Compile {
                class_name: class_name.to_string(),
                exit_code: None,
            });
        }
        program_println(&format!("compiled {class_name}"));
        Ok(Box::new(FakeProgram {
            class_name: class_name.to_string(),
            panic_in_main: self.panic_in_main,
        }))
    }
}

impl LoadedProgram for FakeProgram {
    fn run_main(&self, _ctx: &EmbedContext) -> Result<(), CycleError> {
        program_println(&format!("hello from {}", self.class_name));
        if self.panic_in_main {
            panic!("main blew up");
        }
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn in_process_output_is_redirected_into_the_cycle() {
    let dir = TempDir::new().unwrap();
    let backend = Backend::InProcess(Arc::new(FakeCompiler { panic_in_main: false }));
    let engine = engine_in(&dir, ProcessRunner::default(), backend);

    let result = engine
        .run_cycle(program("Embedded", &[]).into(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(result.output_lines, vec!["compiled Embedded", "hello from Embedded"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn in_process_panic_is_a_runtime_error() {
    let dir = TempDir::new().unwrap();
    let backend = Backend::InProcess(Arc::new(FakeCompiler { panic_in_main: true }));
    let engine = engine_in(&dir, ProcessRunner::default(), backend);

    let err = engine
        .run_cycle(program("Embedded", &[]).into(), CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("main blew up"));
    assert_eq!(err.partial_output, vec!["compiled Embedded", "hello from Embedded"]);
}

#[derive(Default)]
struct Panel {
    results: Vec<RunResult>,
    errors: Vec<RunError>,
}

impl Projection for Panel {
    fn publish_result(&mut self, result: &RunResult) {
        self.results.push(result.clone());
    }
    fn publish_error(&mut self, error: &RunError) {
        self.errors.push(error.clone());
    }
    fn clear_selection_and_scroll(&mut self) {}
}

#[tokio::test]
async fn superseded_program_is_killed_and_never_published() {
    let dir = TempDir::new().unwrap();
    let tracker = ProcessTracker::new();
    let engine = engine_in(&dir, ProcessRunner::new(tracker.clone()), Backend::External(sh_toolchain()));
    let (mut session, mut outcomes) = EditSession::new(Arc::new(engine), tracker.clone(), SessionOptions::default());
    let mut panel = Panel::default();

    session.source_changed(program("Slow", &["echo slow", "sleep 30"]));
    // Give the slow program time to start.
    tokio::time::sleep(Duration::from_millis(500)).await;
    let latest = session.source_changed(program("Fast", &["echo fast"]));

    while let Ok(Some(outcome)) = tokio::time::timeout(Duration::from_secs(3), outcomes.recv()).await {
        let token = outcome.token;
        if session.reconcile(outcome, &mut panel) {
            assert_eq!(token, latest);
            break;
        }
    }

    assert!(panel.errors.is_empty());
    assert_eq!(panel.results.len(), 1);
    assert_eq!(panel.results[0].class_name, "Fast");
    assert_eq!(panel.results[0].output_lines, vec!["fast"]);
    wait_until_empty(&tracker).await;
    session.shutdown().await;
}

#[tokio::test]
async fn shutdown_kills_running_program() {
    let dir = TempDir::new().unwrap();
    let tracker = ProcessTracker::new();
    let engine = engine_in(&dir, ProcessRunner::new(tracker.clone()), Backend::External(sh_toolchain()));
    let (mut session, mut outcomes) = EditSession::new(Arc::new(engine), tracker.clone(), SessionOptions::default());

    session.source_changed(program("Forever", &["sleep 30"]));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(!tracker.is_empty());

    session.shutdown().await;
    wait_until_empty(&tracker).await;
    let late = tokio::time::timeout(Duration::from_millis(300), outcomes.recv()).await;
    assert!(!matches!(late, Ok(Some(_))));
}

#[tokio::test]
#[ignore = "needs a JDK on PATH"]
async fn real_jdk_round_trip() {
    let dir = TempDir::new().unwrap();
    let engine = engine_in(&dir, ProcessRunner::default(), Backend::External(Toolchain::default()));
    let source = "public class Hello {\n    public static void main(String[] args) {\n        System.out.println(\"hi\");\n    }\n}\n";

    let result = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap();
    assert_eq!(result.output_lines, vec!["hi"]);

    let err = engine
        .run_cycle(source.replace("\"hi\");", "\"hi\")").into(), CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Compile);
    assert!(!err.partial_output.is_empty());
}

#[cfg(feature = "jvm")]
#[tokio::test(flavor = "multi_thread")]
#[ignore = "needs a JDK with libjvm"]
async fn embedded_jvm_round_trip() {
    let dir = TempDir::new().unwrap();
    let backend = Backend::InProcess(Arc::new(livejava_runner::JvmCompiler::new(None)));
    let engine = engine_in(&dir, ProcessRunner::default(), backend);
    let source = "public class Hello {\n    public static void main(String[] args) {\n        System.out.println(\"hi\");\n        System.err.println(\"warn\");\n    }\n}\n";

    let result = engine.run_cycle(source.into(), CancellationToken::new()).await.unwrap();
    assert_eq!(result.output_lines, vec!["hi", "warn"]);

    let edited = source.replace("\"hi\"", "\"edited\"");
    let result = engine.run_cycle(edited.as_str().into(), CancellationToken::new()).await.unwrap();
    assert_eq!(result.output_lines, vec!["edited", "warn"]);

    let throwing = source.replace("System.err.println(\"warn\");", "throw new IllegalStateException(\"nope\");");
    let err = engine.run_cycle(throwing.as_str().into(), CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Runtime);
    assert!(err.message.contains("IllegalStateException"));
    assert_eq!(err.partial_output[0], "hi");
    assert!(err.partial_output[1].starts_with("java.lang.IllegalStateException: nope"));

    let broken = source.replace("\"hi\");", "\"hi\")");
    let err = engine.run_cycle(broken.as_str().into(), CancellationToken::new()).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::Compile);
    assert!(!err.partial_output.is_empty());
}
