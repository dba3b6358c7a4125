use crate::content::{ContentBlock, ToolOutput};
use crate::error::{Result, ToolError};
use crate::traits::{Tool, ToolContext, ToolSpec, require_string};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::{Component, Path, PathBuf};

const FILE_BYTES_MAX: usize = 1_000_000;

/// Root directory that file tools resolve relative paths against.
#[derive(Debug, Clone)]
pub struct FsRoot {
    root_dir: PathBuf,
    file_bytes_max: usize,
}

impl FsRoot {
    pub fn new(root_dir: impl AsRef<Path>) -> Result<Self> {
        let root_dir = root_dir.as_ref().to_path_buf();
        if root_dir.as_os_str().is_empty() {
            return Err(ToolError::InvalidArguments(
                "root_dir is required".to_string(),
            ));
        }
        Ok(Self {
            root_dir,
            file_bytes_max: FILE_BYTES_MAX,
        })
    }

    /// Normalize a user path to `a/b/c` form, rejecting absolute paths and traversal.
    pub fn normalize(&self, user_path: &str) -> Result<String> {
        let rel = Path::new(user_path.trim());
        if rel.is_absolute() {
            return Err(ToolError::Unauthorized(
                "absolute paths are not allowed".to_string(),
            ));
        }

        let mut parts = Vec::new();
        for component in rel.components() {
            match component {
                Component::ParentDir => {
                    return Err(ToolError::Unauthorized(
                        "path traversal is not allowed".to_string(),
                    ));
                }
                Component::CurDir => {}
                Component::Normal(part) => parts.push(part.to_string_lossy().to_string()),
                Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::Unauthorized("invalid path".to_string()));
                }
            }
        }
        if parts.is_empty() {
            return Err(ToolError::InvalidArguments("path is empty".to_string()));
        }
        Ok(parts.join("/"))
    }

    /// Normalize a rule content pattern; `.` names the root directory.
    pub fn normalize_pattern(&self, pattern: &str) -> Option<String> {
        match pattern.trim() {
            "." | "./" => Some(".".to_string()),
            other => self.normalize(other).ok(),
        }
    }

    fn resolve(&self, normalized: &str) -> PathBuf {
        self.root_dir.join(normalized)
    }
}

fn parent_dir(normalized: &str) -> String {
    match normalized.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => ".".to_string(),
    }
}

fn normalized_path_input(root: &FsRoot, input: serde_json::Value) -> Result<serde_json::Value> {
    let path = require_string(&input, "path")?;
    let normalized = root.normalize(&path)?;
    let mut out = input;
    out["path"] = serde_json::Value::String(normalized);
    Ok(out)
}

fn image_media_type(path: &str) -> Option<&'static str> {
    let ext = Path::new(path).extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        _ => None,
    }
}

pub struct ReadFileTool {
    root: FsRoot,
}

impl ReadFileTool {
    pub fn new(root: FsRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "read_file".to_string(),
            description: "Read a text or image file within the configured root directory."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "path": { "type": "string", "minLength": 1 }
                },
                "required": ["path"]
            }),
            is_mutating: false,
            is_file_edit: false,
            supports_abort: true,
        }
    }

    /// Reads are remembered per directory.
    fn permission_key(&self, input: &serde_json::Value) -> Option<String> {
        let path = input.get("path")?.as_str()?;
        let normalized = self.root.normalize(path).ok()?;
        Some(parent_dir(&normalized))
    }

    /// Rules match the file itself and its directory.
    fn rule_keys(&self, input: &serde_json::Value) -> Vec<String> {
        let Some(path) = input.get("path").and_then(|v| v.as_str()) else {
            return Vec::new();
        };
        match self.root.normalize(path) {
            Ok(normalized) => {
                let dir = parent_dir(&normalized);
                vec![normalized, dir]
            }
            Err(_) => Vec::new(),
        }
    }

    fn normalize_pattern(&self, pattern: &str) -> Option<String> {
        self.root.normalize_pattern(pattern)
    }

    fn canonicalize(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        normalized_path_input(&self.root, input)
    }

    #[tracing::instrument(level = "info", skip_all, fields(tool_call_id = %ctx.call_id()))]
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = self.root.normalize(&require_string(&input, "path")?)?;
        let bytes = tokio::fs::read(self.root.resolve(&path)).await?;
        if bytes.len() > self.root.file_bytes_max {
            return Err(ToolError::ExecutionFailed(format!(
                "file too large: {} bytes (max {})",
                bytes.len(),
                self.root.file_bytes_max
            )));
        }

        if let Some(media_type) = image_media_type(&path) {
            return Ok(ToolOutput::blocks(vec![ContentBlock::base64_image(
                media_type,
                STANDARD.encode(&bytes),
            )]));
        }
        Ok(ToolOutput::text(String::from_utf8_lossy(&bytes).to_string()))
    }
}

pub struct WriteFileTool {
    root: FsRoot,
}

impl WriteFileTool {
    pub fn new(root: FsRoot) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "write_file".to_string(),
            description: "Create or overwrite a file within the configured root directory."
                .to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "path": { "type": "string", "minLength": 1 },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
            is_mutating: true,
            is_file_edit: true,
            supports_abort: false,
        }
    }

    fn permission_key(&self, input: &serde_json::Value) -> Option<String> {
        let path = input.get("path")?.as_str()?;
        self.root.normalize(path).ok()
    }

    fn resource_key(&self, input: &serde_json::Value) -> Option<String> {
        self.permission_key(input)
    }

    fn normalize_pattern(&self, pattern: &str) -> Option<String> {
        self.root.normalize_pattern(pattern)
    }

    fn canonicalize(&self, input: serde_json::Value) -> Result<serde_json::Value> {
        normalized_path_input(&self.root, input)
    }

    fn permission_hint(&self, input: &serde_json::Value) -> Option<String> {
        self.permission_key(input)
            .map(|path| format!("write_file wants to overwrite {path}"))
    }

    #[tracing::instrument(level = "info", skip_all, fields(tool_call_id = %ctx.call_id()))]
    async fn execute(&self, input: serde_json::Value, ctx: &ToolContext) -> Result<ToolOutput> {
        let path = self.root.normalize(&require_string(&input, "path")?)?;
        let content = require_string(&input, "content")?;
        if content.len() > self.root.file_bytes_max {
            return Err(ToolError::ExecutionFailed(format!(
                "content too large: {} bytes (max {})",
                content.len(),
                self.root.file_bytes_max
            )));
        }
        let resolved = self.root.resolve(&path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&resolved, &content).await?;
        ctx.emit_progress(format!("wrote {path}"));
        Ok(ToolOutput::text(format!(
            "wrote {} bytes to {path}",
            content.len()
        )))
    }
}
