//! Tool surface for toolgate.
//!
//! Tools describe themselves with a [`ToolSpec`], expose the keys the
//! permission layer and scheduler need, and stream progress through a
//! [`ToolContext`] before producing a final [`ToolOutput`].

mod content;
mod error;
mod filesystem;
mod registry;
mod shell;
mod traits;

pub use content::{
    CANCELLED_MESSAGE, ContentBlock, ImageSource, ProgressNotification, ToolOutput, ToolResult,
    ToolResultKind, coalesce_text,
};
pub use error::{Result, ToolError};
pub use filesystem::{FsRoot, ReadFileTool, WriteFileTool};
pub use registry::ToolRegistry;
pub use shell::{BashTool, normalize_command};
pub use traits::{Tool, ToolContext, ToolSpec, to_llm_tool_def};
