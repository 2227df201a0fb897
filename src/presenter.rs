/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The picker the user sees before a run: one row per section with an
//! exclusion checkbox, plus the two terminal notices. Pure state; the
//! binary owns rendering and input.

use std::collections::HashSet;

/// Notice shown when the endpoint exposes no page tab.
pub const NO_ACTIVE_TAB: &str = "No active tab found.";

/// Notice shown when the page has no sections.
pub const NO_SECTIONS: &str = "No sections found.";

/// One row of the picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionRow {
    pub id: String,
    pub excluded: bool,
}

/// Selection state for one page's sections, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SectionPicker {
    rows: Vec<SectionRow>,
}

impl SectionPicker {
    /// One unchecked row per id, order preserved.
    pub fn new(ids: Vec<String>) -> Self {
        let rows = ids
            .into_iter()
            .map(|id| SectionRow {
                id,
                excluded: false,
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[SectionRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Flip the checkbox on row `index`. Returns the new state, or
    /// `None` when the index is out of range (nothing changes).
    pub fn toggle(&mut self, index: usize) -> Option<bool> {
        let row = self.rows.get_mut(index)?;
        row.excluded = !row.excluded;
        Some(row.excluded)
    }

    /// Check or uncheck a row by section id. Unknown ids change nothing.
    pub fn set_excluded(&mut self, id: &str, excluded: bool) -> bool {
        match self.rows.iter_mut().find(|row| row.id == id) {
            Some(row) => {
                row.excluded = excluded;
                true
            }
            None => false,
        }
    }

    /// Ids of the checked rows: the exclusion set for one run.
    pub fn exclusions(&self) -> HashSet<String> {
        self.rows
            .iter()
            .filter(|row| row.excluded)
            .map(|row| row.id.clone())
            .collect()
    }
}

/// What the popup shows once loading settles. In the two terminal
/// states start and stop are never wired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupView {
    NoActiveTab,
    NoSections,
    Picker(SectionPicker),
}

impl PopupView {
    /// Build the view for a located id list.
    pub fn for_sections(ids: Vec<String>) -> Self {
        if ids.is_empty() {
            PopupView::NoSections
        } else {
            PopupView::Picker(SectionPicker::new(ids))
        }
    }

    /// The static notice for the terminal states.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            PopupView::NoActiveTab => Some(NO_ACTIVE_TAB),
            PopupView::NoSections => Some(NO_SECTIONS),
            PopupView::Picker(_) => None,
        }
    }
}
