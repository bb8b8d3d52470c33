//! Intent → handler dispatch. Pure, total, no I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::pipeline::types::Intent;

/// Which handler serves a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandlerKind {
    DraftEmail,
    RetrieveInfo,
    ManageInbox,
    ReadEmail,
    Fallback,
}

impl HandlerKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::DraftEmail => "draft_email",
            Self::RetrieveInfo => "retrieve_info",
            Self::ManageInbox => "manage_inbox",
            Self::ReadEmail => "read_email",
            Self::Fallback => "fallback",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Select the handler for an intent.
pub fn route(intent: Intent) -> HandlerKind {
    match intent {
        Intent::DraftEmail => HandlerKind::DraftEmail,
        Intent::RetrieveInfo => HandlerKind::RetrieveInfo,
        Intent::ManageInbox => HandlerKind::ManageInbox,
        Intent::ReadEmail => HandlerKind::ReadEmail,
        Intent::Unknown => HandlerKind::Fallback,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_intent_has_a_handler() {
        let routed: Vec<HandlerKind> = Intent::ALL.into_iter().map(route).collect();
        assert_eq!(
            routed,
            vec![
                HandlerKind::DraftEmail,
                HandlerKind::RetrieveInfo,
                HandlerKind::ManageInbox,
                HandlerKind::ReadEmail,
                HandlerKind::Fallback,
            ]
        );
    }

    #[test]
    fn routing_is_deterministic() {
        for intent in Intent::ALL {
            assert_eq!(route(intent), route(intent));
        }
    }

    #[test]
    fn known_intents_keep_their_label() {
        for intent in Intent::ALL {
            if intent != Intent::Unknown {
                assert_eq!(route(intent).label(), intent.label());
            }
        }
    }
}
