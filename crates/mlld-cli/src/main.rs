use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::Parser;
use mlld_core::cancellation::CancellationToken;
use mlld_core::collab::{fake, CommandOutput, Collaborators, Diagnostic, EvalError, FileSystem, Shell};
use mlld_core::{evaluate, EvaluateMode, EvaluateOptions};

/// Evaluates an mlld document (already parsed to AST JSON, since this crate
/// carries no parser) and prints the rendered output.
#[derive(Parser)]
#[command(name = "mlld", version, about)]
struct Cli {
    /// Path to a `mlld_ast::Document` serialized as JSON.
    ast_json: PathBuf,

    /// JSON object bound as `@payload` at the root scope.
    #[arg(long)]
    payload: Option<PathBuf>,

    /// JSON object bound as `@state` at the root scope.
    #[arg(long)]
    state: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = ModeArg::Strict)]
    mode: ModeArg,
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum ModeArg {
    Strict,
    Markdown,
    Xml,
}

impl From<ModeArg> for EvaluateMode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Strict => Self::Strict,
            ModeArg::Markdown => Self::Markdown,
            ModeArg::Xml => Self::Xml,
        }
    }
}

fn main() -> ExitCode {
    mlld_core::tracer::init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(had_errors) => {
            if had_errors {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<bool> {
    let start = Instant::now();

    let raw = std::fs::read_to_string(&cli.ast_json)?;
    let document: mlld_ast::Document = serde_json::from_str(&raw)?;

    let payload = load_json_map(cli.payload.as_deref())?;
    let state = load_json_map(cli.state.as_deref())?;

    let collaborators = Collaborators {
        fs: std::sync::Arc::new(RealFileSystem),
        shell: std::sync::Arc::new(RealShell),
        code_runner: std::sync::Arc::new(fake::NullCodeRunner),
        module_resolver: std::sync::Arc::new(fake::NullModuleResolver),
        mcp: std::sync::Arc::new(fake::NullMcp),
        http: std::sync::Arc::new(fake::NullHttp),
    };

    let options = EvaluateOptions {
        initial_file_path: Some(cli.ast_json.display().to_string()),
        working_directory: std::env::current_dir().ok().map(|p| p.display().to_string()),
        payload,
        state,
        dynamic_modules: HashMap::new(),
        mode: cli.mode.into(),
        cancellation_signal: CancellationToken::new(),
        policy_defaults: Vec::new(),
        capabilities: mlld_core::capability::CapabilitySet::unrestricted(),
    };

    let result = evaluate(&document, collaborators, options);
    print!("{}", result.output);

    let had_errors = !result.diagnostics.is_empty();
    for diagnostic in &result.diagnostics {
        eprintln!("error: {}", diagnostic.kind);
        for ctx in &diagnostic.context {
            eprintln!("  in {} ({})", ctx.directive_kind, ctx.subtype);
        }
    }

    tracing::debug!(elapsed = ?start.elapsed(), "evaluation finished");
    Ok(had_errors)
}

fn load_json_map(path: Option<&std::path::Path>) -> anyhow::Result<HashMap<String, serde_json::Value>> {
    let Some(path) = path else { return Ok(HashMap::new()) };
    let raw = std::fs::read_to_string(path)?;
    let value: serde_json::Value = serde_json::from_str(&raw)?;
    match value {
        serde_json::Value::Object(map) => Ok(map.into_iter().collect()),
        other => anyhow::bail!("expected a JSON object, got {other}"),
    }
}

/// Reads/writes the real filesystem under the process's working directory.
struct RealFileSystem;

impl FileSystem for RealFileSystem {
    fn read(&self, path: &str) -> Result<String, Diagnostic> {
        std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                Diagnostic::new(EvalError::FileNotFound { path: path.to_string() })
            } else {
                Diagnostic::new(EvalError::FileError { path: path.to_string(), cause: err.to_string() })
            }
        })
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), Diagnostic> {
        std::fs::write(path, contents).map_err(|err| Diagnostic::new(EvalError::FileError { path: path.to_string(), cause: err.to_string() }))
    }

    fn exists(&self, path: &str) -> bool {
        std::path::Path::new(path).exists()
    }

    fn glob(&self, pattern: &str) -> Result<Vec<String>, Diagnostic> {
        let paths = glob::glob(pattern).map_err(|err| Diagnostic::new(EvalError::FileError { path: pattern.to_string(), cause: err.to_string() }))?;
        let mut out = Vec::new();
        for entry in paths {
            match entry {
                Ok(path) => out.push(path.display().to_string()),
                Err(err) => return Err(Diagnostic::new(EvalError::FileError { path: pattern.to_string(), cause: err.to_string() })),
            }
        }
        Ok(out)
    }
}

/// Runs `/run` command directives through the system shell.
struct RealShell;

impl Shell for RealShell {
    fn execute(&self, command: &str, stdin: Option<&str>, cwd: Option<&str>) -> Result<CommandOutput, Diagnostic> {
        use std::io::Write as _;
        use std::process::{Command, Stdio};

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command).stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|err| Diagnostic::new(EvalError::ExecutionFailed { cmd: command.to_string(), exit_code: -1, stderr: err.to_string() }))?;

        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                let _ = pipe.write_all(input.as_bytes());
            }
        } else {
            drop(child.stdin.take());
        }

        let output = child
            .wait_with_output()
            .map_err(|err| Diagnostic::new(EvalError::ExecutionFailed { cmd: command.to_string(), exit_code: -1, stderr: err.to_string() }))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        let exit_code = output.status.code().unwrap_or(-1);

        if exit_code != 0 {
            return Err(Diagnostic::new(EvalError::ExecutionFailed { cmd: command.to_string(), exit_code, stderr }));
        }

        Ok(CommandOutput { stdout, stderr, exit_code })
    }
}
