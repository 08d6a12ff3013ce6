//! Temporal query engine: time-windowed retrieval of creations and updates.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::graph::GraphDocument;

/// Query window and filters. Unset bounds default to the Unix epoch and now;
/// both bounds are inclusive.
#[derive(Debug, Clone, Default, Deserialize, JsonSchema)]
pub struct TemporalQuery {
    #[serde(rename = "startTime", default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(rename = "endTime", default)]
    pub end: Option<DateTime<Utc>>,
    /// Substring match on entity names (relation events match on either endpoint)
    #[serde(rename = "entityName", default)]
    pub entity_name: Option<String>,
    /// Substring match on relation type; restricts output to relation events
    #[serde(rename = "relationType", default)]
    pub relation_type: Option<String>,
    /// Exact match on `createdBy`
    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Entity,
    Relation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum EventAction {
    Created,
    Updated,
}

/// A creation or update falling inside the queried window.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct TemporalEvent {
    #[serde(rename = "itemType")]
    pub item_type: ItemKind,
    #[serde(rename = "actionType")]
    pub action_type: EventAction,
    /// The in-range timestamp that classified this event
    pub timestamp: DateTime<Utc>,
    /// Entity name; absent for relation events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(rename = "relationType", default, skip_serializing_if = "Option::is_none")]
    pub relation_type: Option<String>,
    #[serde(rename = "createdBy", default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

/// Select and classify every entity and relation touched within the window.
///
/// An item classifies as `updated` when its `updatedAt` differs from
/// `createdAt` and the update is the in-range timestamp; otherwise an
/// in-range `createdAt` classifies it as `created`. Events are sorted
/// ascending by their classified timestamp.
pub fn get_temporal_events(graph: &GraphDocument, query: &TemporalQuery) -> Vec<TemporalEvent> {
    let start = query.start.unwrap_or(DateTime::UNIX_EPOCH);
    let end = query.end.unwrap_or_else(Utc::now);

    let mut events = Vec::new();

    // A relation-type filter selects relation events only.
    if query.relation_type.is_none() {
        for entity in &graph.entities {
            if let Some(name) = &query.entity_name {
                if !entity.name.contains(name.as_str()) {
                    continue;
                }
            }
            if let Some(user) = &query.user_id {
                if entity.created_by.as_deref() != Some(user.as_str()) {
                    continue;
                }
            }
            if let Some((action, timestamp)) =
                classify(entity.created_at, entity.updated_at, start, end)
            {
                events.push(TemporalEvent {
                    item_type: ItemKind::Entity,
                    action_type: action,
                    timestamp,
                    name: Some(entity.name.clone()),
                    from: None,
                    to: None,
                    relation_type: None,
                    created_by: entity.created_by.clone(),
                });
            }
        }
    }

    for relation in &graph.relations {
        if let Some(name) = &query.entity_name {
            if !relation.from.contains(name.as_str()) && !relation.to.contains(name.as_str()) {
                continue;
            }
        }
        if let Some(rt) = &query.relation_type {
            if !relation.relation_type.contains(rt.as_str()) {
                continue;
            }
        }
        if let Some(user) = &query.user_id {
            if relation.created_by.as_deref() != Some(user.as_str()) {
                continue;
            }
        }
        if let Some((action, timestamp)) =
            classify(relation.created_at, relation.updated_at, start, end)
        {
            events.push(TemporalEvent {
                item_type: ItemKind::Relation,
                action_type: action,
                timestamp,
                name: None,
                from: Some(relation.from.clone()),
                to: Some(relation.to.clone()),
                relation_type: Some(relation.relation_type.clone()),
                created_by: relation.created_by.clone(),
            });
        }
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

fn classify(
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Option<(EventAction, DateTime<Utc>)> {
    let in_range = |t: DateTime<Utc>| t >= start && t <= end;
    if updated_at != created_at && in_range(updated_at) {
        Some((EventAction::Updated, updated_at))
    } else if in_range(created_at) {
        Some((EventAction::Created, created_at))
    } else {
        None
    }
}
