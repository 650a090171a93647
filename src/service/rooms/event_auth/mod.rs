// =============================================================================
// Matrixon Matrix NextServer - Event Authorization Module
// =============================================================================
//
// Author: arkSong <arksong2018@gmail.com>
// Version: 0.11.0-alpha
// Date: 2024-03-21
//
// Description:
//   Authorization rules deciding whether an event is allowed against a room
//   state. The baseline rules cover room creation and the membership state
//   machine; power levels are not evaluated.
//
// =============================================================================

use ruma::UserId;
use tracing::{debug, instrument};

use super::state::StateMap;
use crate::{
    service::pdu::{PduEvent, CREATE_EVENT_TYPE, JOIN_RULES_EVENT_TYPE, MEMBER_EVENT_TYPE},
    Error, Result,
};

/// Decides whether `event` is allowed given the room `state` it applies to.
/// A rejection is an [`Error::Forbidden`] carrying the reason.
#[cfg_attr(test, mockall::automock)]
pub trait AuthRules: Send + Sync {
    fn check(&self, event: &PduEvent, state: &StateMap) -> Result<()>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct MembershipRules;

impl AuthRules for MembershipRules {
    #[instrument(level = "debug", skip_all, fields(event_id = %event.event_id, kind = %event.kind))]
    fn check(&self, event: &PduEvent, state: &StateMap) -> Result<()> {
        if event.kind == CREATE_EVENT_TYPE {
            if !state.is_empty() || !event.prev_events.is_empty() {
                return Err(forbidden("A create event must be the first event of the room"));
            }
            return Ok(());
        }

        let Some(create) = state_event(state, CREATE_EVENT_TYPE, "") else {
            return Err(forbidden("Room has no create event"));
        };
        if create.room_id != event.room_id {
            return Err(forbidden("Create event belongs to another room"));
        }

        let result = if event.kind == MEMBER_EVENT_TYPE {
            check_membership(event, state, create)
        } else if membership_of(state, &event.sender) == "join" {
            Ok(())
        } else {
            Err(forbidden("Sender is not joined to the room"))
        };

        if let Err(e) = &result {
            debug!("🔧 Event rejected: {}", e);
        }
        result
    }
}

fn check_membership(event: &PduEvent, state: &StateMap, create: &PduEvent) -> Result<()> {
    let Some(state_key) = event.state_key.as_deref() else {
        return Err(forbidden("Membership event without state key"));
    };
    let target = UserId::parse(state_key)
        .map_err(|_| forbidden("Membership state key is not a user ID"))?;
    let target_membership = membership_of(state, &target);
    let sender_membership = membership_of(state, &event.sender);

    match event.membership().unwrap_or_default() {
        "join" => {
            if target != event.sender {
                return Err(forbidden("Cannot force another user to join"));
            }
            if target_membership == "ban" {
                return Err(forbidden("User is banned from the room"));
            }
            if is_creator_first_join(event, create) || target_membership == "join" {
                return Ok(());
            }
            match join_rule(state) {
                "public" => Ok(()),
                "invite" if target_membership == "invite" => Ok(()),
                rule => Err(forbidden(&format!(
                    "Join rule {rule} does not allow the user to join"
                ))),
            }
        }
        "invite" => {
            if sender_membership != "join" {
                return Err(forbidden("Sender is not joined to the room"));
            }
            if matches!(target_membership, "join" | "ban") {
                return Err(forbidden("Target cannot be invited"));
            }
            Ok(())
        }
        "leave" => {
            if target == event.sender {
                return if matches!(target_membership, "join" | "invite") {
                    Ok(())
                } else {
                    Err(forbidden("User is not in the room"))
                };
            }
            if sender_membership != "join" {
                return Err(forbidden("Sender is not joined to the room"));
            }
            if target_membership == "ban" {
                return Err(forbidden("Cannot kick a banned user"));
            }
            Ok(())
        }
        "ban" => {
            if sender_membership != "join" {
                return Err(forbidden("Sender is not joined to the room"));
            }
            Ok(())
        }
        other => Err(forbidden(&format!("Unknown membership {other}"))),
    }
}

fn is_creator_first_join(event: &PduEvent, create: &PduEvent) -> bool {
    create.sender == event.sender && event.prev_events == [create.event_id.clone()]
}

fn state_event<'a>(state: &'a StateMap, kind: &str, state_key: &str) -> Option<&'a PduEvent> {
    state.get(&(kind.to_owned(), state_key.to_owned()))
}

fn membership_of<'a>(state: &'a StateMap, user_id: &UserId) -> &'a str {
    state_event(state, MEMBER_EVENT_TYPE, user_id.as_str())
        .and_then(PduEvent::membership)
        .unwrap_or("leave")
}

/// Rooms without a join rules event are invite only.
fn join_rule(state: &StateMap) -> &str {
    state_event(state, JOIN_RULES_EVENT_TYPE, "")
        .and_then(|pdu| pdu.content.get("join_rule"))
        .and_then(|rule| rule.as_str())
        .unwrap_or("invite")
}

fn forbidden(reason: &str) -> Error {
    Error::Forbidden(reason.to_owned())
}
