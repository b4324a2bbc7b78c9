use std::time::Duration;

use tracing::warn;

const NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Resolve coordinates to a "place, region" line for the match card.
/// Best-effort: any upstream problem yields `None`.
pub async fn reverse_geocode(latitude: f64, longitude: f64) -> Option<String> {
    let (lat, lon) = (latitude.to_string(), longitude.to_string());
    let client = reqwest::Client::new();
    let response = client
        .get(NOMINATIM_URL)
        .query(&[("format", "jsonv2"), ("lat", lat.as_str()), ("lon", lon.as_str())])
        .header(reqwest::header::USER_AGENT, "whisperpair/0.1")
        .timeout(Duration::from_secs(5))
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|e| warn!("reverse geocoding failed for {latitude},{longitude}: {e}"))
        .ok()?;

    let body: serde_json::Value = response
        .json()
        .await
        .map_err(|e| warn!("reverse geocoding returned bad JSON: {e}"))
        .ok()?;
    let address = body.get("address")?;

    let place = ["county", "city", "town", "village"]
        .iter()
        .find_map(|key| address.get(key).and_then(|v| v.as_str()));
    let region = ["state", "region"]
        .iter()
        .find_map(|key| address.get(key).and_then(|v| v.as_str()));

    match (place, region) {
        (Some(place), Some(region)) => Some(format!("{place}, {region}")),
        (Some(place), None) => Some(place.to_string()),
        _ => None,
    }
}
