//! Turn materializer.
//!
//! Converts a chat's stored history plus the new user text into the
//! provider-native turn list for one orchestrated turn.

use crate::message::{MessageRole, StoredMessage};
use serde::{Deserialize, Serialize};
use tempo_ai::{Part, Role, Turn};

/// Where the persona instruction is delivered to the model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonaPlacement {
    /// Sent as the provider's dedicated system-instruction field.
    #[default]
    SystemField,
    /// Prepended to the first user turn of a brand-new conversation.
    FirstTurn,
}

/// The initial turn list and the system instruction for one model exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedTurns {
    /// Prior history followed by the new user turn.
    pub contents: Vec<Turn>,
    /// Persona to send in the system field, if any.
    pub system_instruction: Option<String>,
}

/// Builds provider-native turn lists.
#[derive(Debug, Clone, Default)]
pub struct TurnMaterializer {
    persona: Option<String>,
    placement: PersonaPlacement,
}

impl TurnMaterializer {
    /// Creates a materializer. A blank persona counts as none.
    #[must_use]
    pub fn new(persona: Option<String>, placement: PersonaPlacement) -> Self {
        Self {
            persona: persona.filter(|p| !p.trim().is_empty()),
            placement,
        }
    }

    /// Returns the configured persona.
    #[must_use]
    pub fn persona(&self) -> Option<&str> {
        self.persona.as_deref()
    }

    /// Maps `prior` to turns and appends one user turn carrying `new_user_text`.
    ///
    /// With [`PersonaPlacement::FirstTurn`] the persona is only injected when
    /// `prior` is empty, so it reaches the model once per conversation.
    #[must_use]
    pub fn build(&self, prior: &[StoredMessage], new_user_text: &str) -> MaterializedTurns {
        let mut contents: Vec<Turn> = prior
            .iter()
            .map(|message| {
                let role = match message.role {
                    MessageRole::User => Role::User,
                    MessageRole::Assistant => Role::Model,
                };
                Turn::new(role, vec![Part::Text(message.content.clone())])
            })
            .collect();

        let mut parts = Vec::with_capacity(2);
        let mut system_instruction = None;
        match (self.placement, &self.persona) {
            (PersonaPlacement::SystemField, Some(persona)) => {
                system_instruction = Some(persona.clone());
            }
            (PersonaPlacement::FirstTurn, Some(persona)) if prior.is_empty() => {
                parts.push(Part::Text(format!("{persona}\n---\n")));
            }
            _ => {}
        }
        parts.push(Part::Text(new_user_text.to_string()));
        contents.push(Turn::new(Role::User, parts));

        MaterializedTurns {
            contents,
            system_instruction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history() -> Vec<StoredMessage> {
        vec![
            StoredMessage::user("oi"),
            StoredMessage::assistant("Olá! Como posso ajudar?"),
        ]
    }

    #[test]
    fn assistant_messages_map_to_model_role() {
        let materializer = TurnMaterializer::default();
        let built = materializer.build(&history(), "que horas são?");

        let roles: Vec<Role> = built.contents.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Model, Role::User]);
        assert_eq!(built.contents[2].joined_text(), "que horas são?");
        assert!(built.system_instruction.is_none());
    }

    #[test]
    fn system_field_persona_never_touches_turns() {
        let materializer =
            TurnMaterializer::new(Some("Você é o Tempo.".into()), PersonaPlacement::SystemField);

        for prior in [Vec::new(), history()] {
            let built = materializer.build(&prior, "oi");
            assert_eq!(built.system_instruction.as_deref(), Some("Você é o Tempo."));
            assert!(
                built
                    .contents
                    .iter()
                    .all(|t| !t.joined_text().contains("Você é o Tempo."))
            );
        }
    }

    #[test]
    fn first_turn_persona_only_for_new_conversations() {
        let materializer =
            TurnMaterializer::new(Some("Você é o Tempo.".into()), PersonaPlacement::FirstTurn);

        let fresh = materializer.build(&[], "oi");
        assert!(fresh.system_instruction.is_none());
        assert_eq!(fresh.contents.len(), 1);
        assert_eq!(fresh.contents[0].parts.len(), 2);
        assert!(fresh.contents[0].joined_text().starts_with("Você é o Tempo."));

        let continued = materializer.build(&history(), "oi");
        assert!(continued.system_instruction.is_none());
        assert_eq!(continued.contents.last().map(|t| t.parts.len()), Some(1));
        assert!(
            continued
                .contents
                .iter()
                .all(|t| !t.joined_text().contains("Você é o Tempo."))
        );
    }

    #[test]
    fn blank_persona_is_ignored() {
        let materializer = TurnMaterializer::new(Some("   ".into()), PersonaPlacement::FirstTurn);
        assert!(materializer.persona().is_none());
        assert_eq!(materializer.build(&[], "oi").contents[0].parts.len(), 1);
    }
}
