//! Scheduler reply parser
//!
//! Turns a raw reply body into a [`SchedulerReply`]. The server is only
//! partially trusted, so the walk is driven by the typed schema below:
//! unknown fields are ignored at every level, optional fields that are absent
//! or `null` fall back to empty or zero values, and a missing required field,
//! an out-of-range number or a record that is not an object rejects the whole
//! reply. No partially filled reply is ever returned.

use gridlink_core::de::null_as_default;
use gridlink_core::domain::reply::SchedulerReply;
use gridlink_core::domain::work::{App, AppVersion, FileInfo, ResultAck, ResultInfo, Workunit};
use serde::Deserialize;
use serde_json::error::Category;
use serde_json::Value;
use serde_json::value::RawValue;
use thiserror::Error;

/// Errors from parsing a scheduler reply
///
/// Every variant is retryable: the client backs off exactly as it would
/// after a transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReplyParseError {
    #[error("reply is not a well-formed document: {0}")]
    Syntax(String),

    #[error("reply is missing required field '{0}'")]
    MissingField(String),

    #[error("reply has an invalid value: {0}")]
    InvalidValue(String),
}

impl From<serde_json::Error> for ReplyParseError {
    fn from(err: serde_json::Error) -> Self {
        let message = err.to_string();
        match err.classify() {
            Category::Data => match missing_field_name(&message) {
                Some(field) => Self::MissingField(field.to_string()),
                None => Self::InvalidValue(message),
            },
            Category::Syntax | Category::Eof | Category::Io => Self::Syntax(message),
        }
    }
}

/// Pulls `name` out of serde's "missing field `name`" message
fn missing_field_name(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("missing field `")?;
    rest.split('`').next()
}

#[derive(Debug, Deserialize)]
struct ReplyDocument {
    hostid: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    host_total_credit: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    host_expavg_credit: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    host_create_time: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    request_delay: f64,

    #[serde(default, deserialize_with = "null_as_default")]
    message: String,
    #[serde(default, deserialize_with = "null_as_default")]
    message_priority: String,

    #[serde(default, deserialize_with = "null_as_default")]
    project_name: String,

    #[serde(default)]
    global_preferences: Option<Box<RawValue>>,
    #[serde(default)]
    project_preferences: Option<Box<RawValue>>,

    #[serde(default, deserialize_with = "null_as_default")]
    user_name: String,
    #[serde(default, deserialize_with = "null_as_default")]
    user_total_credit: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    user_expavg_credit: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    user_create_time: u64,

    #[serde(default, deserialize_with = "null_as_default")]
    apps: Vec<App>,
    #[serde(default, deserialize_with = "null_as_default")]
    app_versions: Vec<AppVersion>,
    #[serde(default, deserialize_with = "null_as_default")]
    file_infos: Vec<FileInfo>,
    #[serde(default, deserialize_with = "null_as_default")]
    workunits: Vec<Workunit>,
    #[serde(default, deserialize_with = "null_as_default")]
    results: Vec<ResultInfo>,
    #[serde(default, deserialize_with = "null_as_default")]
    result_acks: Vec<ResultAck>,

    #[serde(default)]
    code_sign_key: Option<String>,
    #[serde(default)]
    code_sign_key_signature: Option<String>,
}

/// Parses a raw reply body
///
/// # Errors
/// Returns an error if:
/// - The body is not a JSON object
/// - `hostid`, or a required descriptor field, is missing
/// - A number is negative where it must not be, or overflows its type
pub fn parse_reply(body: &[u8]) -> Result<SchedulerReply, ReplyParseError> {
    let value: Value = serde_json::from_slice(body)?;
    check_shape(&value)?;
    let doc: ReplyDocument = serde_json::from_slice(body)?;

    if !doc.request_delay.is_finite() || doc.request_delay < 0.0 {
        return Err(ReplyParseError::InvalidValue(format!(
            "request_delay must be a non-negative number, got {}",
            doc.request_delay
        )));
    }

    Ok(SchedulerReply {
        hostid: doc.hostid,
        host_total_credit: doc.host_total_credit,
        host_expavg_credit: doc.host_expavg_credit,
        host_create_time: doc.host_create_time,
        request_delay: doc.request_delay,
        message: doc.message,
        message_priority: doc.message_priority,
        project_name: doc.project_name,
        global_prefs: opaque_text(doc.global_preferences)?,
        project_prefs: opaque_text(doc.project_preferences)?,
        user_name: doc.user_name,
        user_total_credit: doc.user_total_credit,
        user_expavg_credit: doc.user_expavg_credit,
        user_create_time: doc.user_create_time,
        apps: doc.apps,
        app_versions: doc.app_versions,
        file_infos: doc.file_infos,
        workunits: doc.workunits,
        results: doc.results,
        result_acks: doc.result_acks,
        code_sign_key: doc.code_sign_key,
        code_sign_key_signature: doc.code_sign_key_signature,
    })
}

/// Descriptor lists and the file-reference lists nested in their entries
const DESCRIPTOR_LISTS: [(&str, Option<&str>); 6] = [
    ("apps", None),
    ("app_versions", Some("file_refs")),
    ("file_infos", None),
    ("workunits", Some("input_files")),
    ("results", Some("output_files")),
    ("result_acks", None),
];

/// Requires the reply and every descriptor in it to be a JSON object
///
/// serde also reads structs from arrays, matching elements to fields by
/// position, which would let `[1, 2]` pass for a reply.
fn check_shape(value: &Value) -> Result<(), ReplyParseError> {
    let Value::Object(reply) = value else {
        return Err(ReplyParseError::InvalidValue(
            "reply must be an object".to_string(),
        ));
    };

    for (list, nested) in DESCRIPTOR_LISTS {
        for entry in entries(reply.get(list)) {
            let Value::Object(descriptor) = entry else {
                return Err(not_an_object(list));
            };
            if let Some(nested) = nested {
                if entries(descriptor.get(nested)).any(|file_ref| !file_ref.is_object()) {
                    return Err(not_an_object(nested));
                }
            }
        }
    }
    Ok(())
}

/// Elements of a list field; anything else is left to the typed parse
fn entries(list: Option<&Value>) -> impl Iterator<Item = &Value> {
    list.and_then(Value::as_array).into_iter().flatten()
}

fn not_an_object(list: &str) -> ReplyParseError {
    ReplyParseError::InvalidValue(format!("entries of '{list}' must be objects"))
}

/// Preference documents are kept as text: a JSON string is unescaped, any
/// other value is kept as its raw JSON
fn opaque_text(raw: Option<Box<RawValue>>) -> Result<Option<String>, ReplyParseError> {
    let Some(raw) = raw else {
        return Ok(None);
    };

    let text = raw.get();
    if text.starts_with('"') {
        Ok(Some(serde_json::from_str::<String>(text)?))
    } else {
        Ok(Some(text.to_string()))
    }
}
