//! Home page hero selection: one main story and two minor stories.

use super::models::{HeroSelection, HeroSelectionRequest};
use super::resources::FieldError;
use super::{ApiClient, ApiError};
use serde_json::Value;

pub const HERO_PATH: &str = "/api/hero-selection";

/// Slot names accepted by `hero set`
pub const SLOTS: &[&str] = &["main", "minor1", "minor2"];

pub fn get(client: &ApiClient, token: Option<&str>) -> Result<HeroSelection, ApiError> {
    match client.get(HERO_PATH, token)? {
        // Nothing selected yet
        Value::Null => Ok(HeroSelection::default()),
        value => serde_json::from_value(value).map_err(|e| ApiError::Decode(e.to_string())),
    }
}

pub fn set(
    client: &ApiClient,
    selection: &HeroSelectionRequest,
    token: Option<&str>,
) -> Result<(), ApiError> {
    let body = serde_json::to_value(selection).map_err(|e| ApiError::Decode(e.to_string()))?;
    client.put(HERO_PATH, &body, token)?;
    Ok(())
}

/// Apply `slot=id` pairs over the current selection. `none` clears a slot.
pub fn apply_slots(
    current: HeroSelectionRequest,
    pairs: &[(String, String)],
) -> Result<HeroSelectionRequest, FieldError> {
    if pairs.is_empty() {
        return Err(FieldError::Empty);
    }
    let mut next = current;
    for (name, raw) in pairs {
        let (field, slot) = match name.as_str() {
            "main" => ("main", &mut next.main_story_id),
            "minor1" => ("minor1", &mut next.minor_story_1_id),
            "minor2" => ("minor2", &mut next.minor_story_2_id),
            _ => {
                return Err(FieldError::Unknown {
                    resource: "hero",
                    field: name.clone(),
                    allowed: SLOTS.join(", "),
                })
            }
        };
        *slot = match raw.trim() {
            "none" | "" => None,
            id => Some(id.parse::<u64>().map_err(|_| FieldError::Invalid {
                field,
                message: "expected a news id or none".to_string(),
            })?),
        };
    }
    Ok(next)
}

/// Selected ids with no matching story in a news listing
pub fn unknown_stories(selection: &HeroSelectionRequest, news: &[Value]) -> Vec<u64> {
    [
        selection.main_story_id,
        selection.minor_story_1_id,
        selection.minor_story_2_id,
    ]
    .into_iter()
    .flatten()
    .filter(|id| !news.iter().any(|n| n.get("id").and_then(Value::as_u64) == Some(*id)))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_selection_response_shape() {
        let selection: HeroSelection = serde_json::from_value(json!({
            "main_story": {"id": 12, "title": "Election night", "category": "Politics"},
            "minor_story_1": {"id": 4, "title": "Cup final"},
            "minor_story_2": null
        }))
        .unwrap();
        assert_eq!(selection.main_story.as_ref().unwrap().title, "Election night");
        assert_eq!(
            selection.ids(),
            HeroSelectionRequest {
                main_story_id: Some(12),
                minor_story_1_id: Some(4),
                minor_story_2_id: None,
            }
        );
    }

    #[test]
    fn test_request_body_sends_null_slots() {
        let body = serde_json::to_value(HeroSelectionRequest {
            main_story_id: Some(3),
            minor_story_1_id: None,
            minor_story_2_id: Some(9),
        })
        .unwrap();
        assert_eq!(
            body,
            json!({"main_story_id": 3, "minor_story_1_id": null, "minor_story_2_id": 9})
        );
    }

    #[test]
    fn test_apply_slots_keeps_unmentioned() {
        let current = HeroSelectionRequest {
            main_story_id: Some(1),
            minor_story_1_id: Some(2),
            minor_story_2_id: Some(3),
        };
        let next = apply_slots(current, &pairs(&[("main", "7"), ("minor2", "none")])).unwrap();
        assert_eq!(next.main_story_id, Some(7));
        assert_eq!(next.minor_story_1_id, Some(2));
        assert_eq!(next.minor_story_2_id, None);
    }

    #[test]
    fn test_apply_slots_rejects_bad_input() {
        let current = HeroSelectionRequest::default();
        assert!(matches!(
            apply_slots(current, &pairs(&[("sidebar", "1")])),
            Err(FieldError::Unknown { .. })
        ));
        assert!(matches!(
            apply_slots(current, &pairs(&[("minor1", "abc")])),
            Err(FieldError::Invalid { field: "minor1", .. })
        ));
        assert_eq!(apply_slots(current, &[]), Err(FieldError::Empty));
    }

    #[test]
    fn test_unknown_stories() {
        let news = vec![json!({"id": 1, "title": "a"}), json!({"id": 2, "title": "b"})];
        let selection = HeroSelectionRequest {
            main_story_id: Some(1),
            minor_story_1_id: Some(5),
            minor_story_2_id: None,
        };
        assert_eq!(unknown_stories(&selection, &news), vec![5]);
    }
}
