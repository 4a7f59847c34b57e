//! Save, match and restore engine.
//!
//! [`SessionBuilder`] turns live windows into a [`crate::session::SessionDocument`];
//! [`RestoreEngine`] matches live windows against one and drives each back to
//! its saved monitor, state, geometry, tiling partner and workspace.

pub mod autosave;
pub mod builder;
pub mod launch;
pub mod launcher;
pub mod matcher;
pub mod provisioner;
pub mod restore;
pub mod restorer;

pub use autosave::AutoSaver;
pub use builder::{BuildScope, HostIdentity, SessionBuilder};
pub use launch::{AppLauncher, LaunchReport, SpawnLauncher, relaunch};
pub use launcher::DesktopLauncher;
pub use matcher::{MatchCriterion, MatchOutcome, MatchScope};
pub use provisioner::WorkspaceProvisioner;
pub use restore::{RestoreEngine, RestoreReport, WindowOutcome};
pub use restorer::{
    Placement, RestoreFailure, RestoreOptions, RestoreStep, TilingEstablished, WindowRestorer,
};
