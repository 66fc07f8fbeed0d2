//! User-defined actions from the config file

use beacon_core::CandidateKind;
use chrono::{DateTime, Utc};
use serde_json::json;

use super::{AdaptError, Candidate, EntityRef};
use crate::config::ActionConfig;

pub(super) fn adapt(
    entity: &EntityRef,
    action: &ActionConfig,
    observed_at: DateTime<Utc>,
) -> Result<Candidate, AdaptError> {
    let name = action.name.trim();
    if name.is_empty() {
        return Err(AdaptError::malformed(entity, "action has no name"));
    }
    let command = action.command.trim();
    if command.is_empty() {
        return Err(AdaptError::malformed(entity, "action has no command"));
    }

    let mut aliases = vec![name.to_string()];
    aliases.extend(action.keywords.iter().cloned());

    Ok(Candidate {
        id: entity.candidate_id(),
        display_name: name.to_string(),
        aliases,
        kind: CandidateKind::Action,
        launch: json!({
            "type": "action",
            "command": command,
        }),
        last_valid: observed_at,
    })
}
