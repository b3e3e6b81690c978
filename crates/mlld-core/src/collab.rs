//! Collaborator interfaces (§6.2).
//!
//! The evaluator never touches a filesystem, a shell, or a network socket
//! directly — it calls through these traits. A driver wires in real
//! implementations; tests wire in the fakes at the bottom of this module.
//! Every method is synchronous: §5's "suspension point" is the call itself,
//! not an `.await` — the evaluator has no runtime of its own to suspend into.

use std::collections::HashMap;

use crate::error::{Diagnostic, EvalError};

/// Reads and writes under whatever root policy the host configures.
pub trait FileSystem {
    /// # Errors
    /// `FILE_NOT_FOUND` if `path` doesn't exist, `FILE_ERROR` for any other
    /// I/O failure (permissions, not-a-file, ...).
    fn read(&self, path: &str) -> Result<String, Diagnostic>;

    /// # Errors
    /// `FILE_ERROR` on write failure.
    fn write(&self, path: &str, contents: &str) -> Result<(), Diagnostic>;

    fn exists(&self, path: &str) -> bool;

    /// Expands a glob pattern to matching paths, in filesystem order.
    ///
    /// # Errors
    /// `FILE_ERROR` if the pattern itself is malformed.
    fn glob(&self, pattern: &str) -> Result<Vec<String>, Diagnostic>;
}

/// Runs a shell command and captures output (`/run` command form, §4.4.3).
pub trait Shell {
    /// # Errors
    /// `EXECUTION_FAILED` carrying the exit code and stderr on nonzero exit.
    /// Successful invocation (exit 0) is `Ok` even with nonempty stderr.
    fn execute(&self, command: &str, stdin: Option<&str>, cwd: Option<&str>) -> Result<CommandOutput, Diagnostic>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs a code block in a named language runtime (`/run js { ... }`, §4.4.3).
pub trait CodeRunner {
    /// # Errors
    /// `EXECUTION_FAILED` if the code throws or exits nonzero.
    fn run(&self, language: &str, code: &str, params: &HashMap<String, String>) -> Result<CommandOutput, Diagnostic>;
}

/// Resolves a module specifier to an already-parsed document for `/import`
/// (§4.8). Parsing itself is out of scope for this evaluator, so a resolver
/// is expected to hand back a [`mlld_ast::Document`] the same way a driver
/// hands one in for the entry file.
pub trait ModuleResolver {
    /// # Errors
    /// `IMPORT_NOT_FOUND` if the specifier can't be resolved.
    fn resolve(&self, specifier: &str) -> Result<ResolvedModule, Diagnostic>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedModule {
    pub specifier: String,
    pub document: mlld_ast::Document,
    /// `true` for specifiers resolved over the network (`src:http` taint, §4.8).
    pub is_remote: bool,
}

/// Invokes a tool exposed by an MCP server bound through a `ToolsCollection` (§4.6).
pub trait Mcp {
    /// # Errors
    /// `MCP_ERROR` on transport failure or a tool-side error response.
    fn call_tool(&self, server: &str, tool: &str, args: &serde_json::Value) -> Result<serde_json::Value, Diagnostic>;
}

/// Performs an HTTP fetch for `@input` payloads and remote imports.
pub trait Http {
    /// # Errors
    /// `HTTP_ERROR` on transport failure or a non-2xx response.
    fn get(&self, url: &str) -> Result<String, Diagnostic>;
}

/// The bundle of collaborator handles an [`crate::environment::Environment`]
/// carries and shares with every child scope (§3.2 "collaborator handles").
#[derive(Clone)]
pub struct Collaborators {
    pub fs: std::sync::Arc<dyn FileSystem>,
    pub shell: std::sync::Arc<dyn Shell>,
    pub code_runner: std::sync::Arc<dyn CodeRunner>,
    pub module_resolver: std::sync::Arc<dyn ModuleResolver>,
    pub mcp: std::sync::Arc<dyn Mcp>,
    pub http: std::sync::Arc<dyn Http>,
}

/// In-memory fakes for tests (§8's scenarios don't touch a real filesystem or shell).
pub mod fake {
    use std::sync::Mutex;

    use super::{CommandOutput, Diagnostic, EvalError, HashMap, ResolvedModule};

    #[derive(Default)]
    pub struct FakeFileSystem {
        pub files: Mutex<HashMap<String, String>>,
    }

    impl FakeFileSystem {
        #[must_use]
        pub fn with_file(path: impl Into<String>, contents: impl Into<String>) -> Self {
            let fs = Self::default();
            fs.files.lock().unwrap().insert(path.into(), contents.into());
            fs
        }
    }

    impl super::FileSystem for FakeFileSystem {
        fn read(&self, path: &str) -> Result<String, Diagnostic> {
            self.files
                .lock()
                .unwrap()
                .get(path)
                .cloned()
                .ok_or_else(|| Diagnostic::new(EvalError::FileNotFound { path: path.to_string() }))
        }

        fn write(&self, path: &str, contents: &str) -> Result<(), Diagnostic> {
            self.files.lock().unwrap().insert(path.to_string(), contents.to_string());
            Ok(())
        }

        fn exists(&self, path: &str) -> bool {
            self.files.lock().unwrap().contains_key(path)
        }

        fn glob(&self, pattern: &str) -> Result<Vec<String>, Diagnostic> {
            let prefix = pattern.trim_end_matches('*');
            Ok(self.files.lock().unwrap().keys().filter(|p| p.starts_with(prefix)).cloned().collect())
        }
    }

    #[derive(Default)]
    pub struct FakeShell {
        pub responses: Mutex<HashMap<String, CommandOutput>>,
    }

    impl super::Shell for FakeShell {
        fn execute(&self, command: &str, _stdin: Option<&str>, _cwd: Option<&str>) -> Result<CommandOutput, Diagnostic> {
            if let Some(out) = self.responses.lock().unwrap().get(command).cloned() {
                if out.exit_code != 0 {
                    return Err(Diagnostic::new(EvalError::ExecutionFailed {
                        cmd: command.to_string(),
                        exit_code: out.exit_code,
                        stderr: out.stderr.clone(),
                    }));
                }
                return Ok(out);
            }
            Ok(CommandOutput { stdout: String::new(), stderr: String::new(), exit_code: 0 })
        }
    }

    pub struct NullCodeRunner;

    impl super::CodeRunner for NullCodeRunner {
        fn run(&self, _language: &str, _code: &str, _params: &HashMap<String, String>) -> Result<CommandOutput, Diagnostic> {
            Ok(CommandOutput::default())
        }
    }

    pub struct NullModuleResolver;

    impl super::ModuleResolver for NullModuleResolver {
        fn resolve(&self, specifier: &str) -> Result<ResolvedModule, Diagnostic> {
            Err(Diagnostic::new(EvalError::ImportNotFound { specifier: specifier.to_string() }))
        }
    }

    pub struct NullMcp;

    impl super::Mcp for NullMcp {
        fn call_tool(&self, _server: &str, _tool: &str, _args: &serde_json::Value) -> Result<serde_json::Value, Diagnostic> {
            Ok(serde_json::Value::Null)
        }
    }

    pub struct NullHttp;

    impl super::Http for NullHttp {
        fn get(&self, url: &str) -> Result<String, Diagnostic> {
            Err(Diagnostic::new(EvalError::HttpError(format!("no network access configured for {url}"))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fake::FakeFileSystem;
    use super::FileSystem;

    #[test]
    fn fake_filesystem_reports_file_not_found() {
        let fs = FakeFileSystem::default();
        let err = fs.read("/missing.md").unwrap_err();
        assert!(matches!(err.kind, crate::error::EvalError::FileNotFound { .. }));
    }

    #[test]
    fn fake_filesystem_round_trips_a_seeded_file() {
        let fs = FakeFileSystem::with_file("/a.md", "hello");
        assert_eq!(fs.read("/a.md").unwrap(), "hello");
        assert!(fs.exists("/a.md"));
    }
}
