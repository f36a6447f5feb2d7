//! Geocoding match model

use serde::{Deserialize, Serialize};

/// One geocoding result as returned by the Open-Meteo search endpoint
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GeoMatch {
    /// Canonical place name, localised when the query was Cyrillic
    pub name: String,
    pub country: Option<String>,
    /// Country code (ISO 3166-1 alpha-2)
    pub country_code: Option<String>,
    /// First-level administrative region (state, oblast, province)
    #[serde(rename = "admin1")]
    pub admin_region: Option<String>,
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    pub population: Option<u64>,
}

impl GeoMatch {
    /// Format location as coordinates string
    #[must_use]
    pub fn format_coordinates(&self) -> String {
        format!("{:.4}, {:.4}", self.latitude, self.longitude)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_open_meteo_result() {
        let raw = r#"{
            "id": 524901, "name": "Москва", "latitude": 55.75222, "longitude": 37.61556,
            "elevation": 144.0, "feature_code": "PPLC", "country_code": "RU",
            "timezone": "Europe/Moscow", "population": 10381222,
            "country": "Россия", "admin1": "Москва"
        }"#;
        let geo: GeoMatch = serde_json::from_str(raw).unwrap();
        assert_eq!(geo.name, "Москва");
        assert_eq!(geo.admin_region.as_deref(), Some("Москва"));
        assert_eq!(geo.population, Some(10_381_222));
        assert_eq!(geo.format_coordinates(), "55.7522, 37.6156");
    }

    #[test]
    fn test_missing_optional_fields() {
        let raw = r#"{"name": "Nowhere", "latitude": 1.0, "longitude": 2.0}"#;
        let geo: GeoMatch = serde_json::from_str(raw).unwrap();
        assert!(geo.country.is_none());
        assert!(geo.admin_region.is_none());
        assert!(geo.population.is_none());
    }
}
