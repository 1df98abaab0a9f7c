use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// The global tool-approval mode. Read by the scheduler via
/// [`SchedulerConfig::approval_mode`] and mutated only through
/// [`SchedulerConfig::set_approval_mode`] on the single policy-update-dispatch
/// code path — never as a bare global.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ApprovalMode {
    /// Every `ASK_USER` tool goes through the interactive confirmation loop.
    Default = 0,
    /// Edits no longer require confirmation once a tool in
    /// [`SchedulerConfig::auto_edit_tools`] has been approved with
    /// `ProceedAlways`.
    AutoEdit = 1,
    /// Every tool call runs without confirmation.
    Yolo = 2,
}

impl From<u8> for ApprovalMode {
    fn from(v: u8) -> Self {
        match v {
            1 => ApprovalMode::AutoEdit,
            2 => ApprovalMode::Yolo,
            _ => ApprovalMode::Default,
        }
    }
}

/// Context object threaded through scheduler construction, owning the
/// process-wide approval mode and the handful of policy knobs the scheduler
/// consults but never computes itself.
pub struct SchedulerConfig {
    interactive: AtomicBool,
    approval_mode: AtomicU8,
    /// Tool names that may flip `approval_mode` to `AutoEdit` on a
    /// `ProceedAlways` outcome. Injected rather than hard-coded.
    pub auto_edit_tools: Vec<String>,
    /// Preferred external editor for `ModifyWithEditor`, e.g. from
    /// `$VISUAL`/`$EDITOR`. `None` disables the editor-modify flow.
    pub preferred_editor: Option<String>,
}

impl SchedulerConfig {
    pub fn new(interactive: bool, auto_edit_tools: Vec<String>) -> Self {
        Self {
            interactive: AtomicBool::new(interactive),
            approval_mode: AtomicU8::new(ApprovalMode::Default as u8),
            auto_edit_tools,
            preferred_editor: std::env::var("VISUAL")
                .ok()
                .or_else(|| std::env::var("EDITOR").ok()),
        }
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive.load(Ordering::Relaxed)
    }

    pub fn approval_mode(&self) -> ApprovalMode {
        ApprovalMode::from(self.approval_mode.load(Ordering::Relaxed))
    }

    pub fn set_approval_mode(&self, mode: ApprovalMode) {
        self.approval_mode.store(mode as u8, Ordering::Relaxed);
    }

    pub fn allows_auto_edit(&self, tool_name: &str) -> bool {
        self.auto_edit_tools.iter().any(|t| t == tool_name)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(true, Vec::new())
    }
}
