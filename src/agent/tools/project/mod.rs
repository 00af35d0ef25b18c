use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::agent::tools::{ExecutionContext, Tool, ToolResult};
use crate::utils::paths::display_path;

/// Directories never worth descending into.
const SKIP_DIRS: &[&str] = &["target", "node_modules", "vendor", "dist", "build", "__pycache__"];

/// Files worth calling out regardless of extension.
const SALIENT_FILES: &[&str] = &[
    "Cargo.toml",
    "package.json",
    "pyproject.toml",
    "go.mod",
    "Makefile",
    "Dockerfile",
    "README.md",
    "README",
    "LICENSE",
    ".gitignore",
];

/// Workspace survey: walks the tree, counts source files per language
/// extension and reports the project's salient files as a JSON document.
pub struct ProjectAnalyzeTool {
    code_extensions: Vec<String>,
}

impl ProjectAnalyzeTool {
    pub fn new(code_extensions: Vec<String>) -> Self {
        Self { code_extensions }
    }
}

#[async_trait]
impl Tool for ProjectAnalyzeTool {
    fn name(&self) -> &str {
        "project_analyze"
    }

    fn description(&self) -> &str {
        "Survey the workspace: detected languages, file counts and salient \
         project files. Takes no arguments."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    async fn execute(&self, _params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let base = ctx.base_path.clone();
        let extensions = self.code_extensions.clone();

        // The walk is synchronous filesystem work; keep it off the reactor.
        let report = tokio::task::spawn_blocking(move || {
            let mut languages: BTreeMap<String, u64> = BTreeMap::new();
            let mut salient: Vec<String> = Vec::new();
            let mut total_files: u64 = 0;

            let walker = WalkDir::new(&base).into_iter().filter_entry(|entry| {
                let name = entry.file_name().to_string_lossy();
                if entry.depth() == 0 {
                    return true;
                }
                if name.starts_with('.') {
                    return false;
                }
                !(entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
            });

            for entry in walker.flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                total_files += 1;
                let name = entry.file_name().to_string_lossy();
                if SALIENT_FILES.contains(&name.as_ref()) {
                    salient.push(display_path(entry.path(), &base));
                }
                if let Some(ext) = entry.path().extension().and_then(|e| e.to_str()) {
                    let ext = ext.to_lowercase();
                    if extensions.iter().any(|e| e == &ext) {
                        *languages.entry(ext).or_insert(0) += 1;
                    }
                }
            }

            salient.sort();
            json!({
                "workspace": base.display().to_string(),
                "total_files": total_files,
                "languages": languages,
                "salient_files": salient,
            })
        })
        .await?;

        Ok(ToolResult::new(serde_json::to_string_pretty(&report)?))
    }
}

#[cfg(test)]
mod tests;
