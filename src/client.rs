use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::models::{
    AttendanceRecord, Credentials, ExamSlot, Handout, SeatingEntry, SubjectMappings,
    TimetableEntry,
};

pub const SESSION_HEADER: &str = "x-session-id";
const FALLBACK_MESSAGE: &str = "Something went wrong";

#[derive(Debug, Clone)]
pub struct Captcha {
    pub session_id: String,
    pub image: Vec<u8>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortalForm {
    pub username: String,
    pub password: String,
    pub captcha: String,
    pub session_id: String,
}

impl PortalForm {
    pub fn new(credentials: &Credentials, captcha: &str, session_id: &str) -> Self {
        PortalForm {
            username: credentials.username.clone(),
            password: credentials.password.clone(),
            captcha: captcha.trim().to_string(),
            session_id: session_id.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimetablePayload {
    pub timetable: Vec<TimetableEntry>,
    #[serde(default)]
    pub subject_mappings: SubjectMappings,
}

#[derive(Debug, Deserialize)]
struct AttendancePayload {
    attendance: Vec<AttendanceRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatingPayload {
    pub seating_plan: Vec<SeatingEntry>,
    #[serde(default)]
    pub exam_slot_details: Vec<ExamSlot>,
}

#[derive(Debug, Deserialize)]
struct HandoutsPayload {
    handouts: Vec<Handout>,
}

pub struct ErpClient {
    client: reqwest::Client,
    api_url: String,
    captcha_timeout: Duration,
}

impl ErpClient {
    pub fn new(api_url: &str, captcha_timeout: Duration) -> Self {
        ErpClient {
            client: reqwest::Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            captcha_timeout,
        }
    }

    pub async fn fetch_captcha(&self) -> Result<Captcha, ClientError> {
        let response = self
            .client
            .get(format!("{}/captcha", self.api_url))
            .timeout(self.captcha_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Rejected(failure_message(status, None)));
        }

        let session_id = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ClientError::Malformed(format!("missing {SESSION_HEADER} header")))?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let image = response.bytes().await?.to_vec();

        tracing::debug!(bytes = image.len(), "fetched captcha");
        Ok(Captcha {
            session_id,
            image,
            content_type,
        })
    }

    pub async fn fetch_timetable(&self, form: &PortalForm) -> Result<TimetablePayload, ClientError> {
        self.submit("timetable", form).await
    }

    pub async fn fetch_attendance(
        &self,
        form: &PortalForm,
    ) -> Result<Vec<AttendanceRecord>, ClientError> {
        let payload: AttendancePayload = self.submit("attendance", form).await?;
        Ok(payload.attendance)
    }

    pub async fn fetch_seating(&self, form: &PortalForm) -> Result<SeatingPayload, ClientError> {
        self.submit("seating", form).await
    }

    pub async fn fetch_handouts(&self, form: &PortalForm) -> Result<Vec<Handout>, ClientError> {
        let payload: HandoutsPayload = self.submit("handouts", form).await?;
        Ok(payload.handouts)
    }

    async fn submit<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        form: &PortalForm,
    ) -> Result<T, ClientError> {
        tracing::info!(endpoint, user = %form.username, "submitting portal form");

        let response = self
            .client
            .post(format!("{}/{}", self.api_url, endpoint))
            .form(form)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        parse_envelope(status, &body)
    }
}

// Reads a `{success, message?, ...}` body.
pub fn parse_envelope<T: DeserializeOwned>(status: StatusCode, body: &str) -> Result<T, ClientError> {
    let value: serde_json::Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(_) if !status.is_success() => {
            return Err(ClientError::Rejected(failure_message(status, None)));
        }
        Err(err) => return Err(ClientError::Malformed(err.to_string())),
    };

    let success = value
        .get("success")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false);
    if !success || !status.is_success() {
        let message = value.get("message").and_then(serde_json::Value::as_str);
        return Err(ClientError::Rejected(failure_message(status, message)));
    }

    serde_json::from_value(value).map_err(|err| ClientError::Malformed(err.to_string()))
}

pub fn failure_message(status: StatusCode, message: Option<&str>) -> String {
    if let Some(message) = message.map(str::trim).filter(|m| !m.is_empty()) {
        return message.to_string();
    }

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => "Invalid CAPTCHA".to_string(),
        StatusCode::FORBIDDEN => "Session expired, fetch a new CAPTCHA".to_string(),
        StatusCode::TOO_MANY_REQUESTS => "Too many requests, try again later".to_string(),
        s if s.is_server_error() => "ERP portal is unavailable".to_string(),
        _ => FALLBACK_MESSAGE.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_message_takes_priority() {
        assert_eq!(
            failure_message(StatusCode::UNAUTHORIZED, Some("Wrong password")),
            "Wrong password"
        );
    }

    #[test]
    fn status_heuristics_fill_in_missing_messages() {
        assert_eq!(failure_message(StatusCode::BAD_REQUEST, None), "Invalid CAPTCHA");
        assert_eq!(failure_message(StatusCode::UNAUTHORIZED, Some("  ")), "Invalid CAPTCHA");
        assert_eq!(
            failure_message(StatusCode::FORBIDDEN, None),
            "Session expired, fetch a new CAPTCHA"
        );
        assert_eq!(
            failure_message(StatusCode::BAD_GATEWAY, None),
            "ERP portal is unavailable"
        );
        assert_eq!(failure_message(StatusCode::OK, None), FALLBACK_MESSAGE);
    }

    #[test]
    fn parses_successful_attendance_payload() {
        let body = r#"{
            "success": true,
            "attendance": [
                {"courseCode": "CS101", "courseName": "Programming", "ltps": "L",
                 "totalConducted": 20, "totalAttended": 18, "tcbr": 1}
            ]
        }"#;
        let payload: AttendancePayload = parse_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(payload.attendance.len(), 1);
        assert_eq!(payload.attendance[0].adjusted_attended(), 19);
    }

    #[test]
    fn parses_timetable_with_mappings() {
        let body = r#"{
            "success": true,
            "timetable": [{"day": "MON", "slot": "1", "courseCode": "CS101", "section": "S-12", "room": "C-301"}],
            "subjectMappings": {"CS101": "Programming"}
        }"#;
        let payload: TimetablePayload = parse_envelope(StatusCode::OK, body).unwrap();
        assert_eq!(payload.timetable[0].room, "C-301");
        assert_eq!(payload.subject_mappings.get("CS101").unwrap(), "Programming");
    }

    #[test]
    fn unsuccessful_envelope_uses_backend_message() {
        let body = r#"{"success": false, "message": "Invalid CAPTCHA, try again"}"#;
        let err = parse_envelope::<HandoutsPayload>(StatusCode::OK, body).unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ref m) if m == "Invalid CAPTCHA, try again"));
    }

    #[test]
    fn non_json_error_body_falls_back_to_status() {
        let err = parse_envelope::<HandoutsPayload>(StatusCode::SERVICE_UNAVAILABLE, "<html>")
            .unwrap_err();
        assert!(matches!(err, ClientError::Rejected(ref m) if m == "ERP portal is unavailable"));
    }

    #[test]
    fn missing_payload_is_malformed() {
        let err = parse_envelope::<HandoutsPayload>(StatusCode::OK, r#"{"success": true}"#)
            .unwrap_err();
        assert!(matches!(err, ClientError::Malformed(_)));
    }

    #[test]
    fn portal_form_trims_captcha() {
        let credentials = Credentials {
            username: "2100031234".to_string(),
            password: "secret".to_string(),
        };
        let form = PortalForm::new(&credentials, " ab12 \n", "sess-1");
        assert_eq!(form.captcha, "ab12");
        assert_eq!(form.session_id, "sess-1");
    }
}
