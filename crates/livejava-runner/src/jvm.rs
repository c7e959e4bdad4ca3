//! Embedded-JVM backend for the in-process strategy.
//!
//! One JVM is started per process through the JNI invocation API. Sources are
//! compiled with the JDK's system compiler (`javax.tools.ToolProvider`) inside
//! that JVM, the class is loaded through a fresh `URLClassLoader` rooted at
//! the working directory, and `main(String[])` is invoked directly.
//!
//! `System.out` and `System.err` are JVM-wide, so `main` runs while holding
//! [`STREAMS`] and the previous streams are restored before it is released.
//! Compilation writes to its own buffer and does not take the lock. A running `main` cannot be interrupted: a superseded cycle
//! finishes in the background and its outcome is discarded by the session.
//! Output reaches the cycle's capture when `main` returns or throws.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use jni::objects::{JClass, JObject, JObjectArray, JString, JValue};
use jni::{InitArgsBuilder, JNIEnv, JNIVersion, JavaVM};
use livejava_core::CycleError;
use tracing::{debug, warn};

use crate::capture::{program_print, program_println};
use crate::embedded::{EmbedContext, EmbeddedCompiler, LoadedProgram};

static JVM: OnceLock<Result<JavaVM, String>> = OnceLock::new();

static STREAMS: Mutex<()> = Mutex::new(());

/// Compiles with the system Java compiler and runs `main` in an embedded JVM.
///
/// `classpath` (the configured compiler library, if any) is put on the JVM's
/// class path and handed to `javac`. The first backend to start the JVM fixes
/// its class path for the rest of the process.
#[derive(Debug, Clone, Default)]
pub struct JvmCompiler {
    classpath: Option<PathBuf>,
}

impl JvmCompiler {
    pub fn new(classpath: Option<PathBuf>) -> Self {
        Self { classpath }
    }
}

fn jvm(classpath: Option<&Path>) -> Result<&'static JavaVM, CycleError> {
    let started = JVM.get_or_init(|| {
        let class_path = classpath.map(|cp| format!("-Djava.class.path={}", cp.display()));
        let mut builder = InitArgsBuilder::new().version(JNIVersion::V8);
        if let Some(option) = &class_path {
            builder = builder.option(option.as_str());
        }
        let args = builder.build().map_err(|e| e.to_string())?;
        let vm = JavaVM::new(args).map_err(|e| e.to_string())?;
        debug!(class_path = ?class_path, "embedded JVM started");
        Ok(vm)
    });
    started.as_ref().map_err(|msg| CycleError::ProcessSpawn {
        program: "jvm".to_string(),
        source: io::Error::other(msg.clone()),
    })
}

fn javac_args(workdir: &Path, classpath: Option<&Path>, source_file: &Path) -> Vec<String> {
    let mut args = vec![
        "-proc:none".to_string(),
        "-d".to_string(),
        workdir.display().to_string(),
    ];
    if let Some(cp) = classpath {
        args.push("-cp".to_string());
        args.push(cp.display().to_string());
    }
    args.push(source_file.display().to_string());
    args
}

impl EmbeddedCompiler for JvmCompiler {
    fn compile(
        &self,
        ctx: &EmbedContext,
        source_file: &Path,
        class_name: &str,
    ) -> Result<Box<dyn LoadedProgram>, CycleError> {
        if ctx.cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        let vm = jvm(self.classpath.as_deref())?;
        let mut env = vm.attach_current_thread().map_err(|e| CycleError::ProcessSpawn {
            program: "jvm".to_string(),
            source: io::Error::other(e.to_string()),
        })?;

        let args = javac_args(&ctx.workdir, self.classpath.as_deref(), source_file);
        let compile_failed = |exit_code| CycleError::Compile {
            class_name: class_name.to_string(),
            exit_code,
        };
        let outcome = match run_javac(&mut env, &args) {
            Ok(outcome) => outcome,
            Err(e) => {
                let detail = take_exception(&mut env).unwrap_or_else(|| e.to_string());
                warn!(class = %class_name, error = %detail, "system compiler call failed");
                program_println(&detail);
                return Err(compile_failed(None));
            }
        };
        let Some((exit, diagnostics)) = outcome else {
            return Err(CycleError::ProcessSpawn {
                program: "javax.tools.JavaCompiler".to_string(),
                source: io::Error::other("the embedded JVM has no system compiler (JRE instead of JDK?)"),
            });
        };
        program_print(&diagnostics);
        if exit != 0 {
            return Err(compile_failed(Some(exit)));
        }
        Ok(Box::new(JvmProgram {
            class_name: class_name.to_string(),
            classpath: self.classpath.clone(),
            workdir: ctx.workdir.clone(),
        }))
    }
}

struct JvmProgram {
    class_name: String,
    classpath: Option<PathBuf>,
    workdir: PathBuf,
}

impl JvmProgram {
    fn runtime(&self, detail: impl Into<String>) -> CycleError {
        CycleError::Runtime {
            class_name: self.class_name.clone(),
            detail: detail.into(),
        }
    }
}

impl LoadedProgram for JvmProgram {
    fn run_main(&self, ctx: &EmbedContext) -> Result<(), CycleError> {
        if ctx.cancel.is_cancelled() {
            return Err(CycleError::Cancelled);
        }
        let vm = jvm(self.classpath.as_deref())?;
        let _streams = STREAMS.lock().unwrap_or_else(PoisonError::into_inner);
        let mut env = vm
            .attach_current_thread()
            .map_err(|e| self.runtime(format!("attach: {e}")))?;

        let buffer = env
            .new_object("java/io/ByteArrayOutputStream", "()V", &[])
            .map_err(|e| self.runtime(format!("allocate output buffer: {e}")))?;
        let streams = match redirect_streams(&mut env, &buffer) {
            Ok(streams) => streams,
            Err(e) => {
                let detail = take_exception(&mut env).unwrap_or_else(|| e.to_string());
                return Err(self.runtime(format!("redirect output: {detail}")));
            }
        };

        let thrown = match invoke_main(&mut env, &self.workdir, &self.class_name) {
            Ok(()) => None,
            Err(e) => Some(report_failure(&mut env, &streams.capture, e)),
        };
        let restored = set_streams(&mut env, &streams.out, &streams.err);
        match buffer_text(&mut env, &streams.capture, &buffer) {
            Ok(text) => program_print(&text),
            Err(e) => warn!(class = %self.class_name, error = %e, "reading program output failed"),
        }
        if let Err(e) = restored {
            warn!(class = %self.class_name, error = %e, "restoring System.out/err failed");
        }

        match thrown {
            None => Ok(()),
            Some(detail) => Err(self.runtime(detail)),
        }
    }
}

/// `Some((exit code, diagnostics))`, or `None` when the JVM has no compiler.
fn run_javac(env: &mut JNIEnv<'_>, args: &[String]) -> jni::errors::Result<Option<(i32, String)>> {
    let compiler = env
        .call_static_method(
            "javax/tools/ToolProvider",
            "getSystemJavaCompiler",
            "()Ljavax/tools/JavaCompiler;",
            &[],
        )?
        .l()?;
    if compiler.is_null() {
        return Ok(None);
    }
    let buffer = env.new_object("java/io/ByteArrayOutputStream", "()V", &[])?;
    let argv = string_array(env, args)?;
    let no_input = JObject::null();
    let exit = env
        .call_method(
            &compiler,
            "run",
            "(Ljava/io/InputStream;Ljava/io/OutputStream;Ljava/io/OutputStream;[Ljava/lang/String;)I",
            &[(&no_input).into(), (&buffer).into(), (&buffer).into(), (&argv).into()],
        )?
        .i()?;
    let text = java_string(env, &buffer)?;
    Ok(Some((exit, text)))
}

struct Streams<'local> {
    out: JObject<'local>,
    err: JObject<'local>,
    capture: JObject<'local>,
}

fn redirect_streams<'local>(
    env: &mut JNIEnv<'local>,
    buffer: &JObject<'_>,
) -> jni::errors::Result<Streams<'local>> {
    let out = env
        .get_static_field("java/lang/System", "out", "Ljava/io/PrintStream;")?
        .l()?;
    let err = env
        .get_static_field("java/lang/System", "err", "Ljava/io/PrintStream;")?
        .l()?;
    let capture = env.new_object(
        "java/io/PrintStream",
        "(Ljava/io/OutputStream;Z)V",
        &[buffer.into(), JValue::Bool(1)],
    )?;
    set_streams(env, &capture, &capture)?;
    Ok(Streams { out, err, capture })
}

fn set_streams(env: &mut JNIEnv<'_>, out: &JObject<'_>, err: &JObject<'_>) -> jni::errors::Result<()> {
    env.call_static_method("java/lang/System", "setOut", "(Ljava/io/PrintStream;)V", &[out.into()])?;
    env.call_static_method("java/lang/System", "setErr", "(Ljava/io/PrintStream;)V", &[err.into()])?;
    Ok(())
}

fn invoke_main(env: &mut JNIEnv<'_>, workdir: &Path, class_name: &str) -> jni::errors::Result<()> {
    let dir = env.new_string(workdir.display().to_string())?;
    let file = env.new_object("java/io/File", "(Ljava/lang/String;)V", &[(&dir).into()])?;
    let uri = env.call_method(&file, "toURI", "()Ljava/net/URI;", &[])?.l()?;
    let url = env.call_method(&uri, "toURL", "()Ljava/net/URL;", &[])?.l()?;
    let urls = env.new_object_array(1, "java/net/URL", &url)?;
    // A fresh loader per run, so an edited class is never served from cache.
    let loader = env.new_object("java/net/URLClassLoader", "([Ljava/net/URL;)V", &[(&urls).into()])?;

    let name = env.new_string(class_name)?;
    let class = env
        .call_static_method(
            "java/lang/Class",
            "forName",
            "(Ljava/lang/String;ZLjava/lang/ClassLoader;)Ljava/lang/Class;",
            &[(&name).into(), JValue::Bool(1), (&loader).into()],
        )?
        .l()?;
    let class = JClass::from(class);
    let argv = string_array(env, &[])?;
    let ran = env.call_static_method(&class, "main", "([Ljava/lang/String;)V", &[(&argv).into()]);
    let closed = env.call_method(&loader, "close", "()V", &[]);
    ran?;
    closed?;
    Ok(())
}

/// Print the pending throwable into the program's output, the way an uncaught
/// exception would appear, and return its summary.
fn report_failure(env: &mut JNIEnv<'_>, capture: &JObject<'_>, error: jni::errors::Error) -> String {
    if !env.exception_check().unwrap_or(false) {
        return error.to_string();
    }
    let Ok(throwable) = env.exception_occurred() else {
        return error.to_string();
    };
    let _ = env.exception_clear();
    let _ = env.call_method(
        &throwable,
        "printStackTrace",
        "(Ljava/io/PrintStream;)V",
        &[capture.into()],
    );
    let summary = describe(env, &throwable).unwrap_or_else(|| error.to_string());
    let _ = env.exception_clear();
    summary
}

fn take_exception(env: &mut JNIEnv<'_>) -> Option<String> {
    if !env.exception_check().unwrap_or(false) {
        return None;
    }
    let throwable = env.exception_occurred().ok()?;
    env.exception_clear().ok()?;
    let summary = describe(env, &throwable);
    let _ = env.exception_clear();
    summary
}

fn describe(env: &mut JNIEnv<'_>, object: &JObject<'_>) -> Option<String> {
    java_string(env, object).ok()
}

fn buffer_text(env: &mut JNIEnv<'_>, capture: &JObject<'_>, buffer: &JObject<'_>) -> jni::errors::Result<String> {
    env.call_method(capture, "flush", "()V", &[])?;
    java_string(env, buffer)
}

/// `object.toString()` as a Rust string.
fn java_string(env: &mut JNIEnv<'_>, object: &JObject<'_>) -> jni::errors::Result<String> {
    let text = env
        .call_method(object, "toString", "()Ljava/lang/String;", &[])?
        .l()?;
    let text = JString::from(text);
    let text: String = env.get_string(&text)?.into();
    Ok(text)
}

fn string_array<'local>(env: &mut JNIEnv<'local>, items: &[String]) -> jni::errors::Result<JObjectArray<'local>> {
    let len = i32::try_from(items.len()).map_err(|_| jni::errors::Error::WrongJValueType("usize", "jsize"))?;
    let array = env.new_object_array(len, "java/lang/String", JObject::null())?;
    for (index, item) in (0..len).zip(items) {
        let value = env.new_string(item)?;
        env.set_object_array_element(&array, index, &value)?;
    }
    Ok(array)
}
