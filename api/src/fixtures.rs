//! Sample payloads for the `/test` endpoint, keyed by feature set.

use serde_json::{json, Value};

const TEMPERATURE: &str = "Temperature[C]";
const HUMIDITY: &str = "Humidity[%]";
const ECO2: &str = "eCO2[ppm]";

/// Records for a model whose feature set matches a known fixture
pub fn fixture_for(feature_columns: &[String]) -> Option<Value> {
    let mut wanted: Vec<&str> = feature_columns.iter().map(String::as_str).collect();
    wanted.sort_unstable();

    let mut three = [TEMPERATURE, HUMIDITY, ECO2];
    three.sort_unstable();
    let mut two = [TEMPERATURE, HUMIDITY];
    two.sort_unstable();

    if wanted == three {
        Some(json!([
            {HUMIDITY: 30, TEMPERATURE: 20, ECO2: 12},
            {TEMPERATURE: 40, HUMIDITY: 100, ECO2: 60},
        ]))
    } else if wanted == two {
        Some(json!([
            {HUMIDITY: 30, TEMPERATURE: 20},
            {TEMPERATURE: 40, HUMIDITY: 100},
        ]))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixture_matching_ignores_order() {
        let cols = vec![ECO2.to_string(), TEMPERATURE.to_string(), HUMIDITY.to_string()];
        let records = fixture_for(&cols).unwrap();
        assert_eq!(records.as_array().unwrap().len(), 2);
        assert_eq!(records[1][ECO2], 60);

        let cols = vec![HUMIDITY.to_string(), TEMPERATURE.to_string()];
        assert_eq!(fixture_for(&cols).unwrap()[0][TEMPERATURE], 20);

        assert!(fixture_for(&[TEMPERATURE.to_string()]).is_none());
    }
}
