//! Result submissions as clients send them to `POST /api/results`.
//!
//! The execution wizard builds these, and the results endpoints check them
//! against the checksheet's checkpoints.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::status::{ResponseStatus, ResultStatus};

/// One answered checkpoint in a result submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseInput {
    #[serde(alias = "checkpointId")]
    pub checkpoint_id: Uuid,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "photoUrls")]
    pub photo_urls: Vec<String>,
    #[serde(default, alias = "fileUrls")]
    pub file_urls: Vec<String>,
    #[serde(default, alias = "gpsLat")]
    pub gps_lat: Option<f64>,
    #[serde(default, alias = "gpsLng")]
    pub gps_lng: Option<f64>,
    #[serde(default)]
    pub status: Option<ResponseStatus>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateResultRequest {
    #[serde(alias = "checksheetId")]
    pub checksheet_id: Uuid,
    #[serde(default)]
    pub status: Option<ResultStatus>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "gpsLat")]
    pub gps_lat: Option<f64>,
    #[serde(default, alias = "gpsLng")]
    pub gps_lng: Option<f64>,
    #[serde(default)]
    pub responses: Vec<ResponseInput>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_camel_case_submissions() {
        let checksheet_id = Uuid::new_v4();
        let checkpoint_id = Uuid::new_v4();
        let request: CreateResultRequest = serde_json::from_value(json!({
            "checksheetId": checksheet_id,
            "status": "COMPLETED",
            "responses": [{"checkpointId": checkpoint_id, "value": "yes", "photoUrls": ["https://x/y.jpg"]}]
        }))
        .unwrap();
        assert_eq!(request.status, Some(ResultStatus::Completed));
        assert_eq!(request.responses[0].photo_urls.len(), 1);
    }

    #[test]
    fn note_only_responses_have_no_value() {
        let checkpoint_id = Uuid::new_v4();
        let response: ResponseInput = serde_json::from_value(json!({
            "checkpoint_id": checkpoint_id,
            "notes": "could not reach the valve"
        }))
        .unwrap();
        assert_eq!(response.value, None);
        assert!(response.photo_urls.is_empty());
        assert_eq!(response.status, None);
    }
}
