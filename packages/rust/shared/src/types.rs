//! Core domain types: discovered entities and enrichment outcomes.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// A latitude/longitude pair. Defaults to `(0,0)` until enriched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// `true` when both components are still at the default.
    pub fn is_zero(&self) -> bool {
        self.latitude == 0.0 && self.longitude == 0.0
    }
}

impl std::fmt::Display for Coordinates {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.latitude, self.longitude)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A restaurant discovered on the listing page.
///
/// `url` is the lookup key for the whole run: it is the absolute link target
/// as resolved at discovery time and is compared byte-for-byte during
/// aggregation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Canonical detail-page URL.
    pub url: String,
    /// Display name.
    pub name: String,
    /// Grouping label (city/area) the entity was filtered on.
    pub label: String,
    /// Location from the detail page, `(0,0)` when unknown.
    #[serde(default)]
    pub coordinates: Coordinates,
    /// Normalized weekday opening hours (`"11:30 - 14:00"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opening_hours: Option<String>,
    /// Whether the detail page's attribute block was found.
    ///
    /// Distinguishes a parsed `(0,0)` from the default one.
    #[serde(default)]
    pub enriched: bool,
    /// Menus published on the detail page.
    ///
    /// Stored in their own table; `Storage::list_entities` leaves this empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub meals: Vec<Meal>,
}

impl Entity {
    /// Create an un-enriched candidate.
    pub fn candidate(
        url: impl Into<String>,
        name: impl Into<String>,
        label: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            name: name.into(),
            label: label.into(),
            coordinates: Coordinates::default(),
            opening_hours: None,
            enriched: false,
            meals: Vec::new(),
        }
    }

    /// Merge an outcome into this entity. Failed outcomes reset to defaults.
    pub fn apply(&mut self, outcome: &EnrichmentOutcome) {
        let details = outcome.details();
        self.coordinates = details.coordinates;
        self.opening_hours = details.opening_hours;
        self.meals = details.meals;
        self.enriched = outcome.is_enriched();
    }
}

// ---------------------------------------------------------------------------
// Meals
// ---------------------------------------------------------------------------

/// One service (lunch, dinner, ...) of a restaurant's daily menu.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meal {
    /// Detail-page URL of the restaurant serving it.
    pub restaurant_url: String,
    /// Menu date, `None` when the heading could not be read.
    pub day: Option<NaiveDate>,
    /// Service title, e.g. `"Déjeuner"`.
    pub title: String,
    #[serde(default)]
    pub courses: Vec<Course>,
}

/// A group of dishes within a meal, e.g. `"Entrées"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Course {
    pub kind: String,
    #[serde(default)]
    pub dishes: Vec<String>,
}

// ---------------------------------------------------------------------------
// EnrichmentOutcome
// ---------------------------------------------------------------------------

/// Attributes extracted from a detail page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityDetails {
    pub coordinates: Coordinates,
    pub opening_hours: Option<String>,
    pub meals: Vec<Meal>,
}

/// The single result reported by one enrichment task.
#[derive(Debug, Clone, PartialEq)]
pub enum EnrichmentOutcome {
    /// The attribute block was found; individual fields may still be defaults.
    Enriched { url: String, details: EntityDetails },
    /// Fetch failed or the attribute block is missing.
    Failed { url: String, reason: String },
}

impl EnrichmentOutcome {
    pub fn failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Failed {
            url: url.into(),
            reason: reason.into(),
        }
    }

    /// Identifier of the entity this outcome belongs to.
    pub fn url(&self) -> &str {
        match self {
            Self::Enriched { url, .. } | Self::Failed { url, .. } => url,
        }
    }

    pub fn is_enriched(&self) -> bool {
        matches!(self, Self::Enriched { .. })
    }

    /// The attribute payload; the zero payload for failures.
    pub fn details(&self) -> EntityDetails {
        match self {
            Self::Enriched { details, .. } => details.clone(),
            Self::Failed { .. } => EntityDetails::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_display() {
        let c = Coordinates::new(43.6, 3.87);
        assert_eq!(c.to_string(), "(43.6,3.87)");
        assert!(Coordinates::default().is_zero());
    }

    #[test]
    fn apply_enriched_outcome() {
        let mut entity = Entity::candidate("https://example.com/r/1", "Resto U", "Montpellier");
        let outcome = EnrichmentOutcome::Enriched {
            url: entity.url.clone(),
            details: EntityDetails {
                coordinates: Coordinates::new(43.61, 3.87),
                opening_hours: Some("11:30 - 14:00".into()),
                meals: vec![Meal {
                    restaurant_url: "https://example.com/r/1".into(),
                    day: NaiveDate::from_ymd_opt(2025, 10, 14),
                    title: "Déjeuner".into(),
                    courses: vec![Course {
                        kind: "Plats".into(),
                        dishes: vec!["Paella".into()],
                    }],
                }],
            },
        };
        entity.apply(&outcome);
        assert_eq!(entity.meals.len(), 1);
        assert_eq!(entity.meals[0].courses[0].dishes, ["Paella"]);
        assert!(entity.enriched);
        assert_eq!(entity.coordinates, Coordinates::new(43.61, 3.87));
        assert_eq!(entity.opening_hours.as_deref(), Some("11:30 - 14:00"));
    }

    #[test]
    fn apply_failed_outcome_keeps_defaults() {
        let mut entity = Entity::candidate("https://example.com/r/1", "Resto U", "Montpellier");
        entity.apply(&EnrichmentOutcome::failed(entity.url.clone(), "HTTP 500"));
        assert!(!entity.enriched);
        assert!(entity.coordinates.is_zero());
        assert!(entity.opening_hours.is_none());
        assert!(entity.meals.is_empty());
    }

    #[test]
    fn entity_serialization() {
        let entity = Entity::candidate("https://example.com/r/1", "Resto U", "Montpellier");
        let json = serde_json::to_string(&entity).expect("serialize");
        assert!(json.contains("\"enriched\":false"));
        assert!(!json.contains("opening_hours"));
        assert!(!json.contains("meals"));
        let parsed: Entity = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, entity);
    }
}
