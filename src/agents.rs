//! Agent discovery from the gateway's session list

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;

/// Session keys look like `agent:<agentId>:<rest>`
const AGENT_KEY_PREFIX: &str = "agent:";

/// One discovered agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSummary {
    pub agent_id: String,
    pub name: String,
}

/// Body of `GET /agents`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentList {
    pub agents: Vec<AgentSummary>,
}

/// Extract the agent id from a session key of the form `agent:<id>:...`
pub fn agent_id_from_key(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(AGENT_KEY_PREFIX)?;
    let (id, _) = rest.split_once(':')?;
    (!id.is_empty()).then_some(id)
}

/// Derive the set of agents from a `sessions.list` payload.
///
/// Accepts `{sessions: [...]}` or a bare array; anything else yields no agents.
pub fn derive_agents(payload: &Value) -> AgentList {
    let list = match payload.get("sessions") {
        Some(sessions) if !sessions.is_null() => sessions,
        _ => payload,
    };
    let Some(sessions) = list.as_array() else {
        return AgentList::default();
    };

    let mut ids = BTreeSet::new();
    for session in sessions {
        let key = ["sessionKey", "key", "id"]
            .iter()
            .filter_map(|field| session.get(*field))
            .find(|v| !v.is_null())
            .map(value_text)
            .unwrap_or_default();
        if let Some(id) = agent_id_from_key(&key) {
            ids.insert(id.to_string());
        }
        if let Some(id) = session.get("agentId").filter(|v| is_truthy(v)) {
            ids.insert(value_text(id));
        }
    }

    AgentList {
        agents: ids
            .into_iter()
            .filter(|id| !id.is_empty())
            .map(|id| AgentSummary {
                name: id.clone(),
                agent_id: id,
            })
            .collect(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}
