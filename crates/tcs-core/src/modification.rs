//! Applies user edits to a pending call's arguments.

use async_trait::async_trait;
use serde_json::Value;
use std::io;
use std::process::Stdio;
use tcs_tools::registry::Invocation;
use tokio_util::sync::CancellationToken;

/// Yields an editor identifier (or none) and, given one, edits the proposed
/// content: resolves `$VISUAL`/`$EDITOR` and shells out to the chosen editor
/// with a seeded temp file.
#[async_trait]
pub trait EditorProvider: Send + Sync {
    /// Opens `proposed_content` in the editor and blocks until it exits or
    /// `cancel` fires. Returns the edited content, or `None` if the file was
    /// left unchanged (the user abandoned the edit).
    async fn edit(&self, proposed_content: &str, cancel: &CancellationToken) -> io::Result<Option<String>>;
}

/// Shells out to an external editor command, diffing the file's content
/// before and after rather than trusting the exit code — some terminal
/// editors exit 0 even when the user aborted.
pub struct SystemEditor {
    command: String,
}

impl SystemEditor {
    pub fn new(command: impl Into<String>) -> Self {
        Self { command: command.into() }
    }
}

#[async_trait]
impl EditorProvider for SystemEditor {
    async fn edit(&self, proposed_content: &str, cancel: &CancellationToken) -> io::Result<Option<String>> {
        let mut file = tempfile::Builder::new().prefix("tcs-modify-").suffix(".txt").tempfile()?;
        std::io::Write::write_all(&mut file, proposed_content.as_bytes())?;
        let path = file.path().to_path_buf();

        let mut child = tokio::process::Command::new(&self.command)
            .arg(&path)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()?;

        tokio::select! {
            () = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(None);
            }
            status = child.wait() => {
                status?;
            }
        }

        let edited = tokio::fs::read_to_string(&path).await?;
        file.close()?;
        if edited == proposed_content {
            Ok(None)
        } else {
            Ok(Some(edited))
        }
    }
}

/// Implements the two modification flows: editor-driven and inline. Never
/// mutates the invocation itself — `apply_edit` is a pure query answered by
/// the invocation, and `updateArgs` is the caller's responsibility.
pub struct ModificationHandler;

impl ModificationHandler {
    pub async fn handle_modify_with_editor(
        &self,
        invocation: &dyn Invocation,
        proposed_content: &str,
        editor: &dyn EditorProvider,
        cancel: &CancellationToken,
    ) -> io::Result<Option<Value>> {
        let Some(edited) = editor.edit(proposed_content, cancel).await? else {
            return Ok(None);
        };
        Ok(invocation.apply_edit(&edited))
    }

    pub fn apply_inline_modify(&self, invocation: &dyn Invocation, new_content: &str) -> Option<Value> {
        invocation.apply_edit(new_content)
    }
}
