//! Content loading: turns a `<path>`/`<path # section>`/glob expression into
//! `FileContent`/`SectionContent`/`Array<FileContent>` variable values.
//!
//! Section extraction works on Markdown heading structure: `# Section` up to
//! (but not including) the next heading at the same or shallower level.

use mlld_ast::{TemplatePart, TextLiteral};

use crate::environment::Environment;
use crate::error::Diagnostic;
use crate::security::SecurityDescriptor;
use crate::variable::VariableValue;

/// Loads a single file's full content (`<path.md>`, §4.4.1 load-content RHS).
///
/// # Errors
/// `FILE_NOT_FOUND` / `FILE_ERROR` as reported by the filesystem collaborator.
pub fn load_file(env: &Environment, path: &str) -> Result<(VariableValue, SecurityDescriptor), Diagnostic> {
    let (text, mx) = env.read_file(path)?;
    Ok((VariableValue::FileContent { text, path: path.to_string() }, mx))
}

/// Loads one named section out of a Markdown file (`<path.md # Section>`).
///
/// # Errors
/// `FILE_NOT_FOUND` / `FILE_ERROR` from the read; returns `Ok` with empty
/// text if the file has no heading matching `section` (mirrors "absent
/// optional content" rather than treating a missing section as fatal).
pub fn load_section(env: &Environment, path: &str, section: &str) -> Result<(VariableValue, SecurityDescriptor), Diagnostic> {
    let (text, mx) = env.read_file(path)?;
    let extracted = extract_section(&text, section).unwrap_or_default();
    Ok((VariableValue::SectionContent { text: extracted, path: path.to_string(), section: section.to_string() }, mx))
}

/// Loads every file matching `pattern` (`<*.md>`), each wrapped as
/// `FileContent`, in the order the filesystem collaborator reports them.
///
/// # Errors
/// `FILE_ERROR` if the glob pattern itself is malformed; `FILE_NOT_FOUND` /
/// `FILE_ERROR` from reading any matched path.
pub fn load_glob(env: &Environment, pattern: &str) -> Result<(VariableValue, SecurityDescriptor), Diagnostic> {
    let paths = env.collaborators().fs.glob(pattern)?;
    let mut items = Vec::with_capacity(paths.len());
    let mut mx = SecurityDescriptor::empty();
    for path in paths {
        let (value, file_mx) = load_file(env, &path)?;
        items.push(value);
        mx = SecurityDescriptor::merge(&mx, &file_mx);
    }
    Ok((VariableValue::Array { items, is_complex: true, lazy_items: Vec::new() }, mx))
}

/// Extracts the body of a Markdown heading named `section`, from just after
/// the heading line to just before the next heading at the same or
/// shallower level (or end of file). Heading level is the `#` run length;
/// matching is exact on the trimmed heading text.
fn extract_section(markdown: &str, section: &str) -> Option<String> {
    let lines: Vec<&str> = markdown.lines().collect();
    let mut start = None;
    let mut level = 0;
    for (i, line) in lines.iter().enumerate() {
        if let Some((lvl, title)) = heading(line) {
            if title == section {
                start = Some(i + 1);
                level = lvl;
                break;
            }
        }
    }
    let start = start?;
    let mut end = lines.len();
    for (i, line) in lines.iter().enumerate().skip(start) {
        if let Some((lvl, _)) = heading(line) {
            if lvl <= level {
                end = i;
                break;
            }
        }
    }
    Some(lines[start..end].join("\n").trim().to_string())
}

/// Applies a `<*.md as "...">` rename template (§4.4.1 component table) to
/// one loaded path, producing the logical name recorded in the result's
/// metadata. `@filename` expands to the full file name, `@basename` to the
/// file name minus its extension; any other interpolation in the template is
/// left as literal text since a rename template names files, it doesn't
/// reference evaluator variables.
#[must_use]
pub fn apply_rename_template(template: &TextLiteral, path: &str) -> String {
    let filename = path.rsplit('/').next().unwrap_or(path);
    let basename = filename.rsplit_once('.').map_or(filename, |(b, _)| b);
    let mut out = String::new();
    for part in &template.parts {
        match part {
            TemplatePart::Text(t) => out.push_str(t),
            TemplatePart::Interpolation(var_ref) => match var_ref.identifier.as_str() {
                "filename" => out.push_str(filename),
                "basename" => out.push_str(basename),
                _ => {}
            },
        }
    }
    out
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let trimmed = line.trim_start();
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = trimmed[level..].trim();
    if rest.is_empty() { None } else { Some((level, rest)) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collab::fake::{FakeFileSystem, FakeShell, NullCodeRunner, NullHttp, NullMcp, NullModuleResolver};
    use crate::collab::Collaborators;
    use pretty_assertions::assert_eq;

    fn env_with(path: &str, text: &str) -> Environment {
        Environment::root(Collaborators {
            fs: std::sync::Arc::new(FakeFileSystem::with_file(path, text)),
            shell: std::sync::Arc::new(FakeShell::default()),
            code_runner: std::sync::Arc::new(NullCodeRunner),
            module_resolver: std::sync::Arc::new(NullModuleResolver),
            mcp: std::sync::Arc::new(NullMcp),
            http: std::sync::Arc::new(NullHttp),
        })
    }

    #[test]
    fn load_file_wraps_content_with_path() {
        let e = env_with("/a.md", "hello");
        let (value, mx) = load_file(&e, "/a.md").unwrap();
        assert!(matches!(value, VariableValue::FileContent { text, path } if text == "hello" && path == "/a.md"));
        assert!(mx.taint.contains("src:file"));
    }

    #[test]
    fn load_section_extracts_body_up_to_next_same_level_heading() {
        let md = "# Title\n\n## A\nbody a\n\n## B\nbody b\n";
        let e = env_with("/doc.md", md);
        let (value, _) = load_section(&e, "/doc.md", "A").unwrap();
        let VariableValue::SectionContent { text, .. } = value else { panic!() };
        assert_eq!(text, "body a");
    }

    #[test]
    fn load_section_stops_at_shallower_heading_not_just_next_heading() {
        let md = "## A\nintro\n### A.1\nnested\n## B\nnext\n";
        let e = env_with("/doc.md", md);
        let (value, _) = load_section(&e, "/doc.md", "A").unwrap();
        let VariableValue::SectionContent { text, .. } = value else { panic!() };
        assert_eq!(text, "intro\n### A.1\nnested");
    }

    #[test]
    fn load_section_missing_heading_returns_empty_text_not_an_error() {
        let e = env_with("/doc.md", "# Title\nbody\n");
        let (value, _) = load_section(&e, "/doc.md", "Nope").unwrap();
        let VariableValue::SectionContent { text, .. } = value else { panic!() };
        assert_eq!(text, "");
    }

    #[test]
    fn rename_template_expands_filename_and_basename_placeholders() {
        let template = mlld_ast::TextLiteral {
            wrapper: mlld_ast::QuoteKind::Double,
            parts: vec![
                TemplatePart::Text("doc-".into()),
                TemplatePart::Interpolation(mlld_ast::VariableReference { identifier: "basename".into(), fields: vec![], pipes: vec![], value_type: mlld_ast::ValueTypeHint::Unknown }),
                TemplatePart::Text(".out".into()),
            ],
            is_multi_line: false,
        };
        assert_eq!(apply_rename_template(&template, "/some/path/a.md"), "doc-a.out");
    }

    #[test]
    fn load_glob_wraps_every_match_as_file_content() {
        let e = env_with("/a.md", "A");
        e.collaborators().fs.write("/b.md", "B").unwrap();
        let (value, _) = load_glob(&e, "/").unwrap();
        let VariableValue::Array { items, .. } = value else { panic!() };
        assert_eq!(items.len(), 2);
    }
}
