use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

/// Appends node-reported errors to the error channel. Errors are never
/// deduplicated or merged; each occurrence is kept for diagnostics.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddErrors;

impl Reducer for AddErrors {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        if let Some(errors) = &update.errors {
            if !errors.is_empty() {
                state.errors.get_mut().extend(errors.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::errors::ErrorEvent;

    #[test]
    fn appends_errors() {
        let mut state = VersionedState::new_with_user_message("hi");
        let update = NodePartial::new().with_errors(vec![ErrorEvent::default()]);
        AddErrors.apply(&mut state, &update);
        assert_eq!(state.errors.len(), 1);
    }
}
