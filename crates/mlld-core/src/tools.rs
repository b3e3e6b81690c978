//! Tool collections and MCP binding (§4.6).
//!
//! A `ToolsCollection` is an object literal whose entries name an
//! `Executable` to expose as a callable tool, optionally bound to fixed
//! argument values and restricted to an `expose` allowlist of parameter
//! names the caller may still override. Results returned by an MCP server
//! always carry protected `src:mcp` taint — no guard or pipeline stage can
//! strip it (§3.4 `labelsProtected`).

use crate::environment::Environment;
use crate::error::{Diagnostic, EvalError};
use crate::security::SecurityDescriptor;
use crate::structured_value::StructuredValue;
use crate::variable::{ToolEntry, ToolsCollection, VariableValue};

/// Validates a `ToolsCollection`'s shape (§4.6 invariants):
/// - every entry's `executable_name` must resolve to an `Executable` binding
///   in `env`
/// - `bind` keys must be a subset of that executable's declared params
/// - `expose` names must also be a subset of the declared params
///
/// # Errors
/// `TOOLS_COLLECTION_INVALID` naming the first entry/reason that fails.
pub fn validate(collection: &ToolsCollection, env: &Environment) -> Result<(), Diagnostic> {
    for (tool_name, entry) in &collection.tools {
        let variable = env.get_variable(&entry.executable_name).ok_or_else(|| {
            Diagnostic::new(EvalError::ToolsCollectionInvalid {
                reason: format!("tool `{tool_name}` references undefined executable `{}`", entry.executable_name),
            })
        })?;
        let executable = variable.expect_executable().map_err(|_| {
            Diagnostic::new(EvalError::ToolsCollectionInvalid {
                reason: format!("tool `{tool_name}`'s `{}` is not an executable", entry.executable_name),
            })
        })?;
        for bound in entry.bind.keys() {
            if !executable.params.iter().any(|p| p == bound) {
                return Err(Diagnostic::new(EvalError::ToolsCollectionInvalid {
                    reason: format!("tool `{tool_name}` binds unknown parameter `{bound}`"),
                }));
            }
        }
        for exposed in &entry.expose {
            if !executable.params.iter().any(|p| p == exposed) {
                return Err(Diagnostic::new(EvalError::ToolsCollectionInvalid {
                    reason: format!("tool `{tool_name}` exposes unknown parameter `{exposed}`"),
                }));
            }
            if entry.bind.contains_key(exposed) {
                return Err(Diagnostic::new(EvalError::ToolsCollectionInvalid {
                    reason: format!("tool `{tool_name}` both binds and exposes parameter `{exposed}`"),
                }));
            }
        }
        let covered: Vec<bool> = executable
            .params
            .iter()
            .map(|p| entry.bind.contains_key(p) || entry.expose.iter().any(|e| e == p))
            .collect();
        if let Some(last_covered) = covered.iter().rposition(|&c| c) {
            if let Some(gap) = covered[..=last_covered].iter().position(|&c| !c) {
                return Err(Diagnostic::new(EvalError::ToolsCollectionInvalid {
                    reason: format!("tool `{tool_name}` leaves positional parameter `{}` neither bound nor exposed ahead of a covered parameter", executable.params[gap]),
                }));
            }
        }
    }
    Ok(())
}

/// Invokes `tool` on `server` through the environment's MCP collaborator.
/// The result is always tagged with protected `src:mcp` taint plus an
/// `mcp:<server>/<tool>` source entry, regardless of what the server itself
/// reports (§4.6).
///
/// # Errors
/// `MCP_ERROR` on transport failure.
pub fn call_mcp_tool(env: &Environment, server: &str, tool: &str, args: &serde_json::Value) -> Result<StructuredValue, Diagnostic> {
    let result = env.collaborators().mcp.call_tool(server, tool, args)?;
    let mx = SecurityDescriptor::empty().derive(format!("mcp:{server}/{tool}"), Some("src:mcp"));
    let text = serde_json::to_string(&result).unwrap_or_default();
    Ok(StructuredValue::new(text, crate::structured_value::DataValue::from_json(&result), crate::structured_value::StructuredValueType::Json, mx))
}

/// Resolves a single tool invocation's effective arguments: declared `bind`
/// values first, then caller-supplied overrides for any name present in
/// `expose`. A caller-supplied name absent from `expose` is dropped, not
/// an error — tools present a narrowed surface, they don't validate callers.
#[must_use]
pub fn effective_args(entry: &ToolEntry, caller_args: &indexmap::IndexMap<String, VariableValue>) -> indexmap::IndexMap<String, VariableValue> {
    let mut args = entry.bind.clone();
    for name in &entry.expose {
        if let Some(v) = caller_args.get(name) {
            args.insert(name.clone(), v.clone());
        }
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::collab::Collaborators;
    use crate::variable::{Executable, ExecutableKind, Variable, VariableOptions, VariableSource};
    use mlld_ast::{DirectiveKind, Expr, Literal};

    fn env() -> Environment {
        Environment::root(Collaborators {
            fs: std::sync::Arc::new(FakeFileSystem::default()),
            shell: std::sync::Arc::new(FakeShell::default()),
            code_runner: std::sync::Arc::new(NullCodeRunner),
            module_resolver: std::sync::Arc::new(NullModuleResolver),
            mcp: std::sync::Arc::new(NullMcp),
            http: std::sync::Arc::new(NullHttp),
        })
    }

    fn install_exe(env: &Environment, name: &str, params: Vec<&str>) {
        let exe = Executable {
            kind: ExecutableKind::Command,
            params: params.into_iter().map(str::to_string).collect(),
            body: Expr::Literal(Literal::Null),
            captured_scope: None,
        };
        env.set_variable(Variable::executable(name, exe, VariableSource::simple(DirectiveKind::Exe, "command"), VariableOptions::default()));
    }

    fn collection(entries: Vec<(&str, ToolEntry)>) -> ToolsCollection {
        ToolsCollection { tools: entries.into_iter().map(|(k, v)| (k.to_string(), v)).collect() }
    }

    fn entry(exe: &str, bind: Vec<(&str, VariableValue)>, expose: Vec<&str>) -> ToolEntry {
        ToolEntry {
            executable_name: exe.to_string(),
            labels: vec![],
            description: None,
            bind: bind.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
            expose: expose.into_iter().map(str::to_string).collect(),
        }
    }

    #[test]
    fn validate_accepts_a_well_formed_collection() {
        let e = env();
        install_exe(&e, "search", vec!["query", "limit"]);
        let coll = collection(vec![("search", entry("search", vec![], vec!["query"]))]);
        validate(&coll, &e).unwrap();
    }

    #[test]
    fn validate_rejects_unknown_executable() {
        let e = env();
        let coll = collection(vec![("search", entry("missing", vec![], vec![]))]);
        let err = validate(&coll, &e).unwrap_err();
        assert!(matches!(err.kind, EvalError::ToolsCollectionInvalid { .. }));
    }

    #[test]
    fn validate_rejects_bind_key_outside_declared_params() {
        let e = env();
        install_exe(&e, "search", vec!["query"]);
        let coll = collection(vec![("search", entry("search", vec![("bogus", VariableValue::SimpleText("x".into()))], vec![]))]);
        let err = validate(&coll, &e).unwrap_err();
        assert!(matches!(err.kind, EvalError::ToolsCollectionInvalid { .. }));
    }

    #[test]
    fn validate_rejects_expose_overlapping_bind() {
        let e = env();
        install_exe(&e, "find", vec!["org", "repo", "q"]);
        let coll = collection(vec![(
            "search",
            entry("find", vec![("org", VariableValue::SimpleText("a".into())), ("repo", VariableValue::SimpleText("b".into()))], vec!["org"]),
        )]);
        let err = validate(&coll, &e).unwrap_err();
        assert!(matches!(err.kind, EvalError::ToolsCollectionInvalid { .. }));
    }

    #[test]
    fn validate_rejects_uncovered_positional_gap() {
        let e = env();
        install_exe(&e, "find", vec!["org", "repo", "q"]);
        let coll = collection(vec![("search", entry("find", vec![("repo", VariableValue::SimpleText("b".into()))], vec!["q"]))]);
        let err = validate(&coll, &e).unwrap_err();
        assert!(matches!(err.kind, EvalError::ToolsCollectionInvalid { .. }));
    }

    #[test]
    fn effective_args_prefers_bind_and_only_admits_exposed_overrides() {
        let e = entry("search", vec![("limit", VariableValue::Primitive(crate::variable::Primitive::Number(10.0)))], vec!["query"]);
        let mut caller = indexmap::IndexMap::new();
        caller.insert("query".to_string(), VariableValue::SimpleText("rust".into()));
        caller.insert("limit".to_string(), VariableValue::Primitive(crate::variable::Primitive::Number(999.0)));
        let args = effective_args(&e, &caller);
        assert_eq!(args.get("query"), Some(&VariableValue::SimpleText("rust".into())));
        assert_eq!(args.get("limit"), Some(&VariableValue::Primitive(crate::variable::Primitive::Number(10.0))));
    }

    #[test]
    fn mcp_results_are_tainted_with_protected_src_mcp() {
        let e = env();
        let sv = call_mcp_tool(&e, "notes", "list", &serde_json::Value::Null).unwrap();
        assert!(sv.mx.taint.contains("src:mcp"));
    }
}
