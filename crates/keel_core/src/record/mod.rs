//! Per-record data: handle, lifecycle state, attributes and field errors.

mod attributes;
mod errors;
mod handle;
mod state;

pub(crate) use attributes::AttributeSnapshot;
pub use errors::FieldErrors;
pub use handle::RecordHandle;
pub use state::{RecordState, SaveKind, StateEvent};

use crate::adapter::AdapterError;
use crate::error::CoreResult;

/// Everything the store knows about one record, apart from its edges.
#[derive(Debug, Clone)]
pub(crate) struct RecordData {
    pub type_name: String,
    pub id: Option<String>,
    pub state: RecordState,
    pub attributes: AttributeSnapshot,
    pub errors: FieldErrors,
    pub adapter_error: Option<AdapterError>,
    pub is_reloading: bool,
}

impl RecordData {
    pub fn new(type_name: &str, id: Option<String>, state: RecordState) -> Self {
        Self {
            type_name: type_name.to_string(),
            id,
            state,
            attributes: AttributeSnapshot::new(),
            errors: FieldErrors::new(),
            adapter_error: None,
            is_reloading: false,
        }
    }

    /// Applies a state event in place. Returns the previous state when it
    /// changed.
    pub fn apply(&mut self, event: StateEvent) -> CoreResult<Option<RecordState>> {
        let next = self.state.transition(event)?;
        if next == self.state {
            return Ok(None);
        }
        let previous = std::mem::replace(&mut self.state, next);
        Ok(Some(previous))
    }

    /// Loaded, not deleted: visible to live arrays and relationship reads.
    pub fn is_present(&self) -> bool {
        self.state.is_loaded() && !self.state.is_deleted()
    }
}
