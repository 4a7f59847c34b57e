use log::debug;

use crate::windowing::{WindowingError, WindowingSystem};

/// Makes sure enough workspaces exist before windows are placed on them.
pub struct WorkspaceProvisioner<'a> {
    windowing: &'a dyn WindowingSystem,
}

impl<'a> WorkspaceProvisioner<'a> {
    pub fn new(windowing: &'a dyn WindowingSystem) -> Self {
        Self { windowing }
    }

    /// Ensures workspace `index` exists without removing any.
    ///
    /// Existing workspaces are pinned first so the compositor cannot prune
    /// empty ones while new workspaces are appended. Every appended workspace
    /// is pinned except the last, which stays the spare trailing workspace.
    pub fn ensure(&self, index: i32) -> Result<(), WindowingError> {
        let existing = self.windowing.workspace_count();
        if index < existing {
            return Ok(());
        }

        debug!(
            "Provisioning workspaces up to index {} (currently {})",
            index, existing
        );

        for workspace in 0..existing {
            self.windowing.set_workspace_persistent(workspace, true)?;
        }

        let mut appended = existing - 1;
        while appended < index {
            let created = self.windowing.append_workspace()?;
            if created <= appended {
                return Err(WindowingError::Workspace(index));
            }
            appended = created;
            self.windowing
                .set_workspace_persistent(created, created < index)?;
        }

        Ok(())
    }
}
