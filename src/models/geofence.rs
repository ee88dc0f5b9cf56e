use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::sample::GeoPoint;

/// Radius as delivered by the backend: either a number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Radius {
    Meters(f64),
    Text(String),
}

impl Radius {
    /// Usable radius in meters, or `None` when it is unparsable or not positive.
    pub fn meters(&self) -> Option<f64> {
        let value = match self {
            Radius::Meters(value) => *value,
            Radius::Text(text) => text.trim().parse::<f64>().ok()?,
        };
        (value.is_finite() && value > 0.0).then_some(value)
    }
}

impl From<f64> for Radius {
    fn from(value: f64) -> Self {
        Radius::Meters(value)
    }
}

fn id_from_any<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum AnyId {
        Number(i64),
        Text(String),
    }

    Ok(match AnyId::deserialize(deserializer)? {
        AnyId::Number(n) => n.to_string(),
        AnyId::Text(s) => s,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    #[serde(deserialize_with = "id_from_any")]
    pub id: String,
    pub name: String,
    pub center: GeoPoint,
    #[serde(alias = "radius")]
    pub radius_meters: Radius,
}

impl Geofence {
    pub fn new(id: impl Into<String>, name: impl Into<String>, center: GeoPoint, radius: f64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            center,
            radius_meters: Radius::Meters(radius),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceMembership {
    pub is_inside: bool,
    pub geofence_id: Option<String>,
}

impl GeofenceMembership {
    pub fn outside() -> Self {
        Self::default()
    }

    pub fn inside(geofence_id: impl Into<String>) -> Self {
        Self {
            is_inside: true,
            geofence_id: Some(geofence_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransitionKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceTransition {
    pub kind: TransitionKind,
    pub geofence_id: String,
    pub at: DateTime<Utc>,
}
