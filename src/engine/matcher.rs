//! Pairs live windows with unconsumed saved records.
//!
//! Records are addressed by index into the document's record list. The first
//! matching record in list order wins, so the saved order is the tie-break.

use std::collections::HashSet;

use crate::session::SavedWindowSession;
use crate::windowing::{LiveWindow, WindowId};

/// What a saved record requires of a live window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchCriterion {
    /// The app had a single window; any window of it matches.
    ByCount,
    ByTitle(String),
    ByClass(String),
    ByClassAndTitle(String, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// One window against every record.
    Window,
    /// All windows of one application; classes must agree.
    Application,
}

/// The parts of a live window the matcher looks at.
#[derive(Debug, Clone, Copy)]
pub struct WindowKey<'a> {
    pub title: &'a str,
    pub wm_class: &'a str,
    pub workspace: Option<i32>,
}

impl<'a> From<&'a LiveWindow> for WindowKey<'a> {
    fn from(window: &'a LiveWindow) -> Self {
        Self {
            title: &window.title,
            wm_class: &window.wm_class,
            workspace: window.workspace,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOutcome {
    /// The window already sits on the saved workspace; the record is flagged moved.
    AlreadyPlaced(usize),
    /// Matched but not yet placed. The caller flags the record after placement.
    NeedsPlacement(usize),
    NoMatch,
}

impl MatchOutcome {
    pub fn index(self) -> Option<usize> {
        match self {
            MatchOutcome::AlreadyPlaced(index) | MatchOutcome::NeedsPlacement(index) => {
                Some(index)
            }
            MatchOutcome::NoMatch => None,
        }
    }
}

pub fn criterion_for(record: &SavedWindowSession, scope: MatchScope) -> MatchCriterion {
    // Single-window apps often restore their title late, so count alone decides.
    match (scope, record.windows_count == 1) {
        (MatchScope::Window, true) => MatchCriterion::ByCount,
        (MatchScope::Window, false) => MatchCriterion::ByTitle(record.window_title.clone()),
        (MatchScope::Application, true) => MatchCriterion::ByClass(record.wm_class.clone()),
        (MatchScope::Application, false) => {
            MatchCriterion::ByClassAndTitle(record.wm_class.clone(), record.window_title.clone())
        }
    }
}

pub fn satisfies(criterion: &MatchCriterion, window: &WindowKey<'_>) -> bool {
    match criterion {
        MatchCriterion::ByCount => true,
        MatchCriterion::ByTitle(title) => window.title == title.as_str(),
        MatchCriterion::ByClass(class) => window.wm_class == class.as_str(),
        MatchCriterion::ByClassAndTitle(class, title) => {
            window.wm_class == class.as_str() && window.title == title.as_str()
        }
    }
}

/// Finds the first unconsumed record for `window`.
pub fn match_window(
    window: &WindowKey<'_>,
    records: &mut [SavedWindowSession],
    scope: MatchScope,
) -> MatchOutcome {
    match_window_where(window, records, scope, |_, _| true)
}

/// Like [`match_window`], restricted to records accepted by `eligible`.
pub fn match_window_where(
    window: &WindowKey<'_>,
    records: &mut [SavedWindowSession],
    scope: MatchScope,
    eligible: impl Fn(usize, &SavedWindowSession) -> bool,
) -> MatchOutcome {
    let found = records.iter().enumerate().find(|(index, record)| {
        !record.moved && eligible(*index, record) && satisfies(&criterion_for(record, scope), window)
    });

    let Some((index, record)) = found else {
        return MatchOutcome::NoMatch;
    };

    if window.workspace == Some(record.desktop_number) {
        records[index].moved = true;
        MatchOutcome::AlreadyPlaced(index)
    } else {
        MatchOutcome::NeedsPlacement(index)
    }
}

/// Matches every window of one application. A record is handed to at most one
/// window per call even though queued records stay unflagged until placed.
pub fn match_application(
    windows: &[LiveWindow],
    records: &mut [SavedWindowSession],
) -> Vec<(WindowId, MatchOutcome)> {
    match_application_where(windows, records, |_| true)
}

/// Like [`match_application`], restricted to records accepted by `eligible`.
pub fn match_application_where(
    windows: &[LiveWindow],
    records: &mut [SavedWindowSession],
    eligible: impl Fn(&SavedWindowSession) -> bool,
) -> Vec<(WindowId, MatchOutcome)> {
    let mut claimed = HashSet::new();
    windows
        .iter()
        .map(|window| {
            let outcome = match_window_where(
                &WindowKey::from(window),
                records,
                MatchScope::Application,
                |index, record| !claimed.contains(&index) && eligible(record),
            );
            if let Some(index) = outcome.index() {
                claimed.insert(index);
            }
            (window.id, outcome)
        })
        .collect()
}

/// Flags a record consumed. Returns false if it already was.
pub fn mark_moved(records: &mut [SavedWindowSession], index: usize) -> bool {
    match records.get_mut(index) {
        Some(record) if !record.moved => {
            record.moved = true;
            true
        }
        _ => false,
    }
}
