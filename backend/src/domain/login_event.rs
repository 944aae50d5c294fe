//! Login event validation and reshaping.
//!
//! A queue message body is a JSON document describing one user login. The
//! transformer validates every required field and produces the flat,
//! privacy-preserving [`LoginRecord`] persisted to the `user_logins` table.
//! Any missing or malformed field rejects the whole message; nothing is
//! defaulted.

use chrono::NaiveDate;
use serde::Deserialize;

use super::masking::{MaskedValue, mask};

const CREATE_DATE_FORMAT: &str = "%Y-%m-%d";

/// Reasons a payload cannot be turned into a [`LoginRecord`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedPayload {
    /// The body is not JSON, or a required field is absent or mistyped.
    #[error("payload is not a valid login event: {message}")]
    Structure { message: String },
    /// The leading `app_version` segment is not an integer.
    #[error("app_version `{value}` has no integer major component")]
    AppVersion { value: String },
    /// `create_date` is not a `YYYY-MM-DD` calendar date.
    #[error("create_date `{value}` does not match YYYY-MM-DD")]
    CreateDate { value: String },
}

#[derive(Debug, Deserialize)]
struct RawLoginEvent {
    user_id: RawUserId,
    device: RawDevice,
    ip: String,
    locale: String,
    app_version: String,
    create_date: String,
}

/// Producers send `user_id` as a string or a bare JSON number.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawUserId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawUserId> for String {
    fn from(value: RawUserId) -> Self {
        match value {
            RawUserId::Text(text) => text,
            RawUserId::Number(number) => number.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawDevice {
    #[serde(rename = "type")]
    kind: String,
    id: String,
}

/// Row persisted for one login event.
///
/// ## Invariants
/// - `masked_ip` and `masked_device_id` are SHA-256 digests; the clear-text
///   values are dropped during transformation.
/// - `app_version` holds only the major version component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRecord {
    /// Opaque user identifier; numeric ids keep their JSON spelling.
    pub user_id: String,
    /// Device category, copied verbatim from `device.type`.
    pub device_type: String,
    /// Digest of the client IP address.
    pub masked_ip: MaskedValue,
    /// Digest of `device.id`.
    pub masked_device_id: MaskedValue,
    /// Language/region tag, copied verbatim.
    pub locale: String,
    /// Major application version.
    pub app_version: i32,
    /// Calendar date the login was created.
    pub create_date: NaiveDate,
}

/// Validate a raw message body and reshape it into a [`LoginRecord`].
///
/// # Errors
///
/// Returns [`MalformedPayload`] when the body is not a JSON login event, the
/// major `app_version` component is not an integer, or `create_date` is not
/// formatted as `YYYY-MM-DD`.
///
/// # Example
///
/// ```
/// use login_pipeline::domain::{mask, transform};
///
/// let body = r#"{"user_id":"u1","device":{"type":"mobile","id":"d1"},
///     "ip":"1.2.3.4","locale":"en-US","app_version":"2.5.1",
///     "create_date":"2023-01-10"}"#;
/// let record = transform(body)?;
/// assert_eq!(record.app_version, 2);
/// assert_eq!(record.masked_ip, mask("1.2.3.4"));
/// # Ok::<(), login_pipeline::domain::MalformedPayload>(())
/// ```
pub fn transform(raw: impl AsRef<[u8]>) -> Result<LoginRecord, MalformedPayload> {
    let event: RawLoginEvent =
        serde_json::from_slice(raw.as_ref()).map_err(|error| MalformedPayload::Structure {
            message: error.to_string(),
        })?;

    let app_version = parse_major_version(&event.app_version)?;
    let create_date = parse_create_date(&event.create_date)?;

    Ok(LoginRecord {
        user_id: event.user_id.into(),
        device_type: event.device.kind,
        masked_ip: mask(&event.ip),
        masked_device_id: mask(&event.device.id),
        locale: event.locale,
        app_version,
        create_date,
    })
}

/// Parse the segment before the first `.` as the major version.
///
/// Trailing segments are ignored without validation.
fn parse_major_version(value: &str) -> Result<i32, MalformedPayload> {
    value
        .split('.')
        .next()
        .and_then(|major| major.parse::<i32>().ok())
        .ok_or_else(|| MalformedPayload::AppVersion {
            value: value.to_owned(),
        })
}

fn parse_create_date(value: &str) -> Result<NaiveDate, MalformedPayload> {
    let malformed = || MalformedPayload::CreateDate {
        value: value.to_owned(),
    };

    // chrono accepts unpadded months and days; the wire format does not.
    let well_formed = value.len() == 10
        && value.bytes().enumerate().all(|(index, byte)| match index {
            4 | 7 => byte == b'-',
            _ => byte.is_ascii_digit(),
        });
    if !well_formed {
        return Err(malformed());
    }

    NaiveDate::parse_from_str(value, CREATE_DATE_FORMAT).map_err(|_| malformed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use serde_json::{Value, json};

    #[fixture]
    fn event() -> Value {
        json!({
            "user_id": "u1",
            "device": { "type": "mobile", "id": "d1" },
            "ip": "1.2.3.4",
            "locale": "en-US",
            "app_version": "2.5.1",
            "create_date": "2023-01-10"
        })
    }

    fn transform_value(value: &Value) -> Result<LoginRecord, MalformedPayload> {
        transform(value.to_string())
    }

    #[rstest]
    fn reference_event_is_flattened_and_masked(event: Value) {
        let record = transform_value(&event).expect("reference event should transform");

        assert_eq!(
            record,
            LoginRecord {
                user_id: "u1".to_owned(),
                device_type: "mobile".to_owned(),
                masked_ip: mask("1.2.3.4"),
                masked_device_id: mask("d1"),
                locale: "en-US".to_owned(),
                app_version: 2,
                create_date: NaiveDate::from_ymd_opt(2023, 1, 10).expect("valid date"),
            }
        );
    }

    #[rstest]
    #[case("12.0.1", 12)]
    #[case("7", 7)]
    #[case("3.x.beta", 3)]
    #[case("0.9", 0)]
    fn major_version_is_extracted(mut event: Value, #[case] version: &str, #[case] major: i32) {
        event["app_version"] = json!(version);

        let record = transform_value(&event).expect("version should parse");
        assert_eq!(record.app_version, major);
    }

    #[rstest]
    #[case("")]
    #[case(".1.2")]
    #[case("v2.0")]
    #[case("99999999999.0")]
    fn non_integer_major_version_is_rejected(mut event: Value, #[case] version: &str) {
        event["app_version"] = json!(version);

        let error = transform_value(&event).expect_err("version should be rejected");
        assert_eq!(
            error,
            MalformedPayload::AppVersion {
                value: version.to_owned()
            }
        );
    }

    #[rstest]
    fn create_date_is_parsed_to_calendar_date(mut event: Value) {
        event["create_date"] = json!("2024-03-15");

        let record = transform_value(&event).expect("date should parse");
        assert_eq!(
            record.create_date,
            NaiveDate::from_ymd_opt(2024, 3, 15).expect("valid date")
        );
    }

    #[rstest]
    #[case("03/15/2024")]
    #[case("2024-3-15")]
    #[case("2024-02-30")]
    #[case("2024-03-15T00:00:00Z")]
    #[case("")]
    fn malformed_create_date_is_rejected(mut event: Value, #[case] date: &str) {
        event["create_date"] = json!(date);

        let error = transform_value(&event).expect_err("date should be rejected");
        assert!(matches!(error, MalformedPayload::CreateDate { .. }));
    }

    #[rstest]
    #[case("user_id")]
    #[case("ip")]
    #[case("locale")]
    #[case("app_version")]
    #[case("create_date")]
    #[case("device")]
    fn missing_top_level_field_is_rejected(mut event: Value, #[case] field: &str) {
        event
            .as_object_mut()
            .expect("event is an object")
            .remove(field);

        let error = transform_value(&event).expect_err("missing field should be rejected");
        match error {
            MalformedPayload::Structure { message } => assert!(message.contains(field)),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[rstest]
    #[case("type")]
    #[case("id")]
    fn missing_device_field_is_rejected(mut event: Value, #[case] field: &str) {
        event["device"]
            .as_object_mut()
            .expect("device is an object")
            .remove(field);

        let error = transform_value(&event).expect_err("missing device field should fail");
        assert!(matches!(error, MalformedPayload::Structure { .. }));
    }

    #[rstest]
    #[case(json!(42), "42")]
    #[case(json!(-7), "-7")]
    #[case(json!("0042"), "0042")]
    fn numeric_user_id_is_stored_as_text(
        mut event: Value,
        #[case] user_id: Value,
        #[case] stored: &str,
    ) {
        event["user_id"] = user_id;

        let record = transform_value(&event).expect("user id should be accepted");
        assert_eq!(record.user_id, stored);
    }

    #[rstest]
    #[case(json!(true))]
    #[case(json!(null))]
    #[case(json!({"id": 1}))]
    fn non_scalar_user_id_is_rejected(mut event: Value, #[case] user_id: Value) {
        event["user_id"] = user_id;

        let error = transform_value(&event).expect_err("user id should be rejected");
        assert!(matches!(error, MalformedPayload::Structure { .. }));
    }

    #[rstest]
    fn wrongly_typed_field_is_rejected(mut event: Value) {
        event["app_version"] = json!(2);

        let error = transform_value(&event).expect_err("numeric version should fail");
        assert!(matches!(error, MalformedPayload::Structure { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("not json")]
    #[case("[1, 2, 3]")]
    fn unparseable_body_is_rejected(#[case] body: &str) {
        let error = transform(body).expect_err("body should be rejected");
        assert!(matches!(error, MalformedPayload::Structure { .. }));
    }

    #[rstest]
    fn byte_payloads_are_accepted(event: Value) {
        let bytes = event.to_string().into_bytes();

        let record = transform(&bytes).expect("bytes should transform");
        assert_eq!(record.user_id, "u1");
    }
}
