use super::Reducer;
use crate::{channels::Channel, node::NodePartial, state::VersionedState};

/// Appends new messages, upserting by [`Message::id`](crate::message::Message::id)
/// when present so repeated partial updates for the same logical turn (e.g.
/// streamed assistant chunks) replace rather than duplicate.
#[derive(Debug, PartialEq, Clone, Hash, Eq)]
pub struct AddMessages;

impl Reducer for AddMessages {
    fn apply(&self, state: &mut VersionedState, update: &NodePartial) {
        let Some(incoming) = &update.messages else {
            return;
        };
        if incoming.is_empty() {
            return;
        }

        let messages = state.messages.get_mut();
        for msg in incoming {
            match &msg.id {
                Some(id) => {
                    if let Some(existing) = messages.iter_mut().find(|m| m.id.as_deref() == Some(id.as_str())) {
                        *existing = msg.clone();
                    } else {
                        messages.push(msg.clone());
                    }
                }
                None => messages.push(msg.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Message, Role};

    #[test]
    fn appends_messages_without_id() {
        let mut state = VersionedState::new_with_user_message("hi");
        let update = NodePartial::new().with_messages(vec![Message::with_role(Role::Assistant, "hello")]);
        AddMessages.apply(&mut state, &update);
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn upserts_message_with_matching_id() {
        let mut state = VersionedState::new_with_user_message("hi");
        let first = Message::with_role(Role::Assistant, "partial").with_id("turn-1");
        AddMessages.apply(
            &mut state,
            &NodePartial::new().with_messages(vec![first]),
        );
        assert_eq!(state.messages.len(), 2);

        let replacement = Message::with_role(Role::Assistant, "final").with_id("turn-1");
        AddMessages.apply(
            &mut state,
            &NodePartial::new().with_messages(vec![replacement]),
        );
        assert_eq!(state.messages.len(), 2);
        assert_eq!(state.messages.snapshot()[1].content, "final");
    }
}
