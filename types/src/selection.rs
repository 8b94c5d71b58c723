//! Checkbox selection state shared by both grouping domains.

use serde::{Deserialize, Serialize};

/// Selection flags for one row, in either the merge or unmerge domain.
///
/// `checked` is user intent. `busy` is held while a mutation naming the row
/// is in flight, and seeds true for hashes the server reports locked.
/// `disabled` is the derived last-remaining-hash guard; it is never set in
/// the merge domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckboxState {
    pub checked: bool,
    pub busy: bool,
    pub disabled: bool,
}

impl CheckboxState {
    /// Seed entry for a freshly fetched hash record.
    #[must_use]
    pub const fn seeded(locked: bool) -> Self {
        Self {
            checked: false,
            busy: locked,
            disabled: false,
        }
    }
}
