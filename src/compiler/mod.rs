pub mod ast;
pub mod callgraph;
pub mod contract;
pub mod diagnostics;
pub mod dump;
pub mod dynamic;
pub mod engine;
pub mod intersection;
pub mod monomorphise;
pub mod resolver;
pub mod types;
pub mod usage;

pub use ast::{AstBuilder, Program};
pub use diagnostics::{ContractError, Diagnostic, DiagnosticKind, Severity};
pub use engine::{Analysis, Context, Engine, ParamResolution, analyze};
pub use monomorphise::{InstanceState, Instantiation, InstantiationCache, InstantiationId};
pub use resolver::Flow;

use crate::config::{ConfigError, EngineConfig};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse syntax tree: {0}")]
    Parse(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Parse a JSON syntax tree and assign node identities.
pub fn parse_program(source: &str) -> Result<Program, LoadError> {
    let mut program: Program = serde_json::from_str(source)?;
    program.renumber();
    Ok(program)
}

/// Load a JSON syntax tree from a file.
pub fn load_program(path: &Path) -> Result<Program, LoadError> {
    let source = fs::read_to_string(path).map_err(|source| LoadError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse_program(&source)
}

/// Analyse a file, with `infer.toml` from its directory if present.
pub fn analyze_file(path: &Path) -> Result<Analysis, String> {
    let dir = path.parent().unwrap_or(Path::new("."));
    let config = EngineConfig::load_or_default(dir).map_err(|e| LoadError::from(e).to_string())?;
    analyze_file_with_config(path, &config)
}

pub fn analyze_file_with_config(path: &Path, config: &EngineConfig) -> Result<Analysis, String> {
    let program = load_program(path).map_err(|e| e.to_string())?;
    Ok(analyze(&program, config))
}

/// Analyse a file and fail with the formatted errors if anything the entry
/// point requires is unresolved.
pub fn check_file(path: &Path) -> Result<Analysis, String> {
    let analysis = analyze_file(path)?;
    if analysis.is_success() {
        return Ok(analysis);
    }
    let filename = path.to_string_lossy().to_string();
    let errors: Vec<Diagnostic> = analysis.errors().cloned().collect();
    Err(format_diagnostics(&filename, &errors))
}

/// Format diagnostics for display.
pub fn format_diagnostics(filename: &str, diagnostics: &[Diagnostic]) -> String {
    let mut output = String::new();

    for diagnostic in diagnostics {
        let span = diagnostic.span();
        output.push_str(&format!(
            "{}[{}]: {}\n  --> {}:{}:{}\n",
            diagnostic.severity, diagnostic.kind(), diagnostic.error, filename, span.line, span.column
        ));

        if let Some(function) = &diagnostic.function {
            output.push_str(&format!("   = in `{}`\n", function));
        }
        if let Some(chain) = diagnostic.error.chain() {
            output.push_str(&format!("   = chain: {}\n", chain.join(" -> ")));
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::ast::Span;

    #[test]
    fn test_format_diagnostics_with_chain() {
        let diagnostic = Diagnostic::new(
            Severity::Error,
            Some("iterate_gift".to_string()),
            ContractError::UnsatisfiableReturnContract {
                chain: vec!["giver".into(), "gift/1".into(), "iter/1".into()],
                capability: "iter/1".into(),
                reason: "`int` does not implement `iter/1`".into(),
                span: Span::new(3, 12),
            },
        );
        let output = format_diagnostics("gift.json", &[diagnostic]);
        assert!(output.starts_with("error[UnsatisfiableReturnContract]: "));
        assert!(output.contains("  --> gift.json:3:12\n"));
        assert!(output.contains("   = in `iterate_gift`\n"));
        assert!(output.contains("   = chain: giver -> gift/1 -> iter/1\n"));
    }

    #[test]
    fn test_parse_error_is_reported() {
        let err = parse_program("{\"items\": [").unwrap_err();
        assert!(err.to_string().starts_with("failed to parse syntax tree"));
    }
}
