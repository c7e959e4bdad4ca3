use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use livejava_core::CompileStrategy;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::embedded::{resolve_from_install_dir, EmbeddedCompiler, SourceLauncher};
use crate::engine::{Backend, CompileAndRunEngine, Toolchain};
use crate::process::ProcessRunner;
use crate::session::SessionOptions;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("write {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub strategy: CompileStrategy,
    /// Where `<Class>.java` snapshots are written. `~` is expanded; relative
    /// paths are taken from the project root.
    #[serde(default = "default_workdir")]
    pub workdir: String,
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    #[serde(default)]
    pub in_process: InProcessConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolchainConfig {
    #[serde(default = "default_compiler")]
    pub compiler: Vec<String>,
    #[serde(default = "default_launcher")]
    pub launcher: Vec<String>,
    /// JDK root; bare program names are looked up in `<java_home>/bin`.
    #[serde(default)]
    pub java_home: Option<String>,
}

/// How the in-process strategy compiles and invokes `main`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbeddedBackend {
    /// System compiler and class loading inside an embedded JVM.
    Jvm,
    /// One `java <Class>.java` source-launcher process per cycle.
    Launcher,
}

impl Default for EmbeddedBackend {
    fn default() -> Self {
        if cfg!(feature = "jvm") {
            EmbeddedBackend::Jvm
        } else {
            EmbeddedBackend::Launcher
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InProcessConfig {
    #[serde(default)]
    pub backend: EmbeddedBackend,
    /// Extra classpath entry for the embedded compiler, relative to the
    /// executable's directory unless absolute.
    #[serde(default)]
    pub library: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub debounce_ms: u64,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_workdir() -> String {
    ".livejava/work".to_string()
}

fn default_compiler() -> Vec<String> {
    vec!["javac".to_string()]
}

fn default_launcher() -> Vec<String> {
    vec!["java".to_string()]
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        Self {
            compiler: default_compiler(),
            launcher: default_launcher(),
            java_home: None,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            strategy: CompileStrategy::default(),
            workdir: default_workdir(),
            toolchain: ToolchainConfig::default(),
            in_process: InProcessConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg: Config = toml::from_str(&s).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load `<root>/.livejava/livejava.toml`, or defaults when it does not exist.
    pub fn load_or_default(root: &Path) -> Result<Self, ConfigError> {
        let path = Self::config_path(root);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let s = toml::to_string_pretty(self)?;
        std::fs::write(path, s).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(".livejava").join("livejava.toml")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.toolchain.compiler.is_empty() {
            return Err(ConfigError::Invalid("toolchain.compiler must not be empty".into()));
        }
        if self.toolchain.launcher.is_empty() {
            return Err(ConfigError::Invalid("toolchain.launcher must not be empty".into()));
        }
        if self.workdir.trim().is_empty() {
            return Err(ConfigError::Invalid("workdir must not be empty".into()));
        }
        if self.in_process.backend == EmbeddedBackend::Jvm && !cfg!(feature = "jvm") {
            return Err(ConfigError::Invalid(
                "in_process.backend = \"jvm\" needs a build with the `jvm` feature".into(),
            ));
        }
        Ok(())
    }

    pub fn workdir_path(&self, root: &Path) -> PathBuf {
        let expanded = PathBuf::from(shellexpand::tilde(&self.workdir).into_owned());
        if expanded.is_absolute() {
            expanded
        } else {
            root.join(expanded)
        }
    }

    pub fn compiler_argv(&self) -> Vec<String> {
        self.with_java_home(&self.toolchain.compiler)
    }

    pub fn launcher_argv(&self) -> Vec<String> {
        self.with_java_home(&self.toolchain.launcher)
    }

    fn with_java_home(&self, argv: &[String]) -> Vec<String> {
        let mut argv = argv.to_vec();
        if let (Some(home), Some(program)) = (&self.toolchain.java_home, argv.first_mut()) {
            let bare = !program.contains('/') && !program.contains('\\');
            if bare {
                let home = shellexpand::tilde(home).into_owned();
                *program = Path::new(&home).join("bin").join(&*program).display().to_string();
            }
        }
        argv
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.session.timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            debounce: Duration::from_millis(self.session.debounce_ms),
            ..SessionOptions::default()
        }
    }

    /// Build the engine selected by `strategy`.
    pub fn build_engine(&self, root: &Path, runner: ProcessRunner) -> Result<CompileAndRunEngine, ConfigError> {
        self.validate()?;
        let backend = match self.strategy {
            CompileStrategy::External => Backend::External(Toolchain {
                compiler: self.compiler_argv(),
                launcher: self.launcher_argv(),
            }),
            CompileStrategy::InProcess => {
                let classpath = match &self.in_process.library {
                    Some(lib) => {
                        let lib = PathBuf::from(shellexpand::tilde(lib).into_owned());
                        Some(resolve_from_install_dir(&lib).map_err(|e| {
                            ConfigError::Invalid(format!("cannot resolve in_process.library: {e}"))
                        })?)
                    }
                    None => None,
                };
                let compiler: Arc<dyn EmbeddedCompiler> = match self.in_process.backend {
                    EmbeddedBackend::Launcher => Arc::new(SourceLauncher::new(self.launcher_argv(), classpath)),
                    #[cfg(feature = "jvm")]
                    EmbeddedBackend::Jvm => Arc::new(crate::jvm::JvmCompiler::new(classpath)),
                    #[cfg(not(feature = "jvm"))]
                    EmbeddedBackend::Jvm => {
                        return Err(ConfigError::Invalid("built without the `jvm` feature".into()));
                    }
                };
                Backend::InProcess(compiler)
            }
        };
        Ok(CompileAndRunEngine::new(self.workdir_path(root), runner, backend).with_timeout(self.timeout()))
    }
}
