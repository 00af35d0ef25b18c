use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Value, json};
use walkdir::WalkDir;

use crate::agent::tools::{ExecutionContext, Tool, ToolResult};
use crate::errors::AgentError;
use crate::utils::paths::{display_path, human_size, resolve_within_base};

/// Files above this size are returned as a truncated prefix on read.
const MAX_FULL_READ_BYTES: u64 = 1024 * 1024;
/// Prefix length returned for oversized reads.
const TRUNCATED_READ_BYTES: usize = 1024;
/// Writes at or above this size are refused; streamed write-back of larger
/// payloads risks timing out the model turn.
const MAX_WRITE_BYTES: usize = 200 * 1024;
/// Writes above this size succeed with a warning.
const WRITE_WARN_BYTES: usize = 50 * 1024;
/// Default cap for list and search results.
const DEFAULT_MAX_RESULTS: usize = 50;

/// Workspace file access: read, write, append, list and filename search,
/// all confined to the workspace root.
pub struct FileOperationsTool;

impl FileOperationsTool {
    pub fn new() -> Self {
        FileOperationsTool
    }

    fn resolve(&self, ctx: &ExecutionContext, path: &str) -> Result<PathBuf, AgentError> {
        resolve_within_base(&ctx.base_path, path)
    }

    async fn op_read(&self, path: &Path, display: &str) -> ToolResult {
        let meta = match tokio::fs::metadata(path).await {
            Ok(meta) => meta,
            Err(_) => return ToolResult::error(format!("Error: File not found: {}", display)),
        };
        if !meta.is_file() {
            return ToolResult::error(format!(
                "Error: Not a file: {}. Use type=list for directories.",
                display
            ));
        }
        if meta.len() > MAX_FULL_READ_BYTES {
            let content = match tokio::fs::read(path).await {
                Ok(bytes) => bytes,
                Err(e) => return ToolResult::error(format!("Error reading file: {}", e)),
            };
            let mut end = TRUNCATED_READ_BYTES.min(content.len());
            // Back up to a UTF-8 boundary so the prefix never splits a char.
            while end > 0 && end < content.len() && (content[end] & 0xC0) == 0x80 {
                end -= 1;
            }
            let prefix = String::from_utf8_lossy(&content[..end]);
            return ToolResult::new(format!(
                "[file is {} — showing first {} bytes]\n{}",
                human_size(meta.len()),
                end,
                prefix
            ));
        }
        match tokio::fs::read_to_string(path).await {
            Ok(content) => ToolResult::new(content),
            Err(e) => ToolResult::error(format!("Error reading file: {}", e)),
        }
    }

    async fn op_write(&self, path: &Path, display: &str, content: &str, append: bool) -> ToolResult {
        if !append && content.len() >= MAX_WRITE_BYTES {
            return ToolResult::error(format!(
                "Error: content is {} — the write limit is {}. Split the file into smaller writes.",
                human_size(content.len() as u64),
                human_size(MAX_WRITE_BYTES as u64)
            ));
        }

        if let Ok(meta) = tokio::fs::metadata(path).await {
            if meta.is_dir() {
                return ToolResult::error(format!("Error: '{}' is a directory", display));
            }
            if meta.permissions().readonly() {
                return ToolResult::error(format!("Error: '{}' is read-only", display));
            }
        }

        if let Some(parent) = path.parent()
            && let Err(e) = tokio::fs::create_dir_all(parent).await
        {
            return ToolResult::error(format!("Error creating parent directories: {}", e));
        }

        let start = Instant::now();
        let result = if append {
            use tokio::io::AsyncWriteExt;
            match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await
            {
                Ok(mut file) => file.write_all(content.as_bytes()).await,
                Err(e) => Err(e),
            }
        } else {
            tokio::fs::write(path, content).await
        };
        let elapsed = start.elapsed();

        match result {
            Ok(()) => {
                let verb = if append { "appended" } else { "wrote" };
                let mut message = format!(
                    "Successfully {} {} bytes to {} ({:.3}s)",
                    verb,
                    content.len(),
                    display,
                    elapsed.as_secs_f64()
                );
                if !append && content.len() >= WRITE_WARN_BYTES {
                    let throughput = content.len() as f64 / elapsed.as_secs_f64().max(1e-6);
                    message.push_str(&format!(
                        "\nWarning: large write ({}, {}/s)",
                        human_size(content.len() as u64),
                        human_size(throughput as u64)
                    ));
                }
                ToolResult::new(message)
            }
            Err(e) => ToolResult::error(format!("Error writing file: {}", e)),
        }
    }

    async fn op_list(&self, path: &Path, display: &str, max_results: usize) -> ToolResult {
        let mut rd = match tokio::fs::read_dir(path).await {
            Ok(rd) => rd,
            Err(_) => {
                return ToolResult::error(format!("Error: Directory not found: {}", display));
            }
        };

        let mut entries: Vec<(String, Option<u64>, String)> = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            let size = if meta.is_dir() { None } else { Some(meta.len()) };
            entries.push((name, size, mode_string(&meta)));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let total = entries.len();
        let mut lines = Vec::new();
        for (name, size, mode) in entries.into_iter().take(max_results) {
            let size_str = match size {
                Some(bytes) => human_size(bytes),
                None => "<DIR>".to_string(),
            };
            lines.push(format!("{:<40} {:>10} {}", name, size_str, mode));
        }
        if total > max_results {
            lines.push(format!("…and {} more", total - max_results));
        }
        if lines.is_empty() {
            return ToolResult::new("(empty directory)");
        }
        ToolResult::new(lines.join("\n"))
    }

    fn op_search(
        &self,
        root: &Path,
        base: &Path,
        pattern: &str,
        max_results: usize,
    ) -> ToolResult {
        let needle = pattern.to_lowercase();
        let mut matches = Vec::new();

        let walker = WalkDir::new(root).into_iter().filter_entry(|entry| {
            // Hidden entries are skipped entirely, including descent.
            entry.depth() == 0 || !is_hidden(entry.file_name())
        });
        for entry in walker.flatten() {
            if matches.len() >= max_results {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_lowercase();
            if name.contains(&needle) {
                matches.push(display_path(entry.path(), base));
            }
        }

        if matches.is_empty() {
            return ToolResult::new(format!("No files matching '{}'", pattern));
        }
        matches.sort();
        ToolResult::new(matches.join("\n"))
    }
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_string_lossy().starts_with('.')
}

#[cfg(unix)]
fn mode_string(meta: &std::fs::Metadata) -> String {
    use std::os::unix::fs::PermissionsExt;
    format!("{:o}", meta.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn mode_string(meta: &std::fs::Metadata) -> String {
    if meta.permissions().readonly() {
        "ro".to_string()
    } else {
        "rw".to_string()
    }
}

impl Default for FileOperationsTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileOperationsTool {
    fn name(&self) -> &str {
        "file_operations"
    }

    fn description(&self) -> &str {
        "Read, write, append, list and search files inside the workspace. \
         Paths are relative to the workspace root."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "type": {
                    "type": "string",
                    "enum": ["read", "write", "append", "list", "search"],
                    "description": "The operation to perform"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory path, relative to the workspace"
                },
                "content": {
                    "type": "string",
                    "description": "Content for write/append operations"
                },
                "pattern": {
                    "type": "string",
                    "description": "Filename substring for search (case-insensitive)"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Result cap for list/search",
                    "default": 50
                }
            },
            "required": ["type", "path"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ExecutionContext) -> Result<ToolResult> {
        let op = params["type"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'type' parameter"))?;
        let path_str = params["path"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'path' parameter"))?;
        let max_results = params["max_results"]
            .as_u64()
            .map_or(DEFAULT_MAX_RESULTS, |n| n as usize);

        let resolved = match self.resolve(ctx, path_str) {
            Ok(path) => path,
            Err(e) => return Ok(ToolResult::error(format!("Error: {}", e))),
        };
        let display = display_path(&resolved, &ctx.base_path);

        match op {
            "read" => Ok(self.op_read(&resolved, &display).await),
            "write" | "append" => {
                let content = params["content"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Missing 'content' parameter"))?;
                Ok(self
                    .op_write(&resolved, &display, content, op == "append")
                    .await)
            }
            "list" => Ok(self.op_list(&resolved, &display, max_results).await),
            "search" => {
                let pattern = params["pattern"]
                    .as_str()
                    .ok_or_else(|| anyhow::anyhow!("Missing 'pattern' parameter"))?;
                Ok(self.op_search(&resolved, &ctx.base_path, pattern, max_results))
            }
            other => Ok(ToolResult::error(format!(
                "Error: unknown operation '{}'",
                other
            ))),
        }
    }
}
