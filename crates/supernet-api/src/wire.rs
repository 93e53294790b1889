// ── Socket wire format ──
//
// Every frame is a JSON object `{ "type": <name>, "data": <base64(JSON)> }`.
// Inbound payloads are decoded once here into the closed `ServerEvent`
// union; correlation ids are uppercased before anything else sees them.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Error;

/// Payload keys that carry correlation ids.
const ID_FIELDS: [&str; 2] = ["jobID", "imgID"];

// ── Network ──────────────────────────────────────────────────────────

/// Worker pool a session submits to.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    #[default]
    Fast,
    Relaxed,
}

// ── Framing ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<String>,
}

/// Encode a payload into a text frame.
pub fn encode_frame<T: Serialize + ?Sized>(kind: &str, payload: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(payload).map_err(|e| Error::Frame(e.to_string()))?;
    let frame = Frame {
        kind: kind.to_owned(),
        data: Some(STANDARD.encode(json)),
    };
    serde_json::to_string(&frame).map_err(|e| Error::Frame(e.to_string()))
}

/// Decode a text frame into its type name and JSON payload.
///
/// A frame without `data` yields `Value::Null`. Correlation ids are
/// uppercased in place.
pub fn decode_frame(text: &str) -> Result<(String, Value), Error> {
    let frame: Frame = serde_json::from_str(text).map_err(|e| Error::Frame(e.to_string()))?;
    let mut payload = match frame.data {
        Some(ref encoded) if !encoded.is_empty() => {
            let raw = STANDARD
                .decode(encoded)
                .map_err(|e| Error::Frame(format!("bad base64 in {}: {e}", frame.kind)))?;
            serde_json::from_slice(&raw)
                .map_err(|e| Error::Frame(format!("bad JSON in {}: {e}", frame.kind)))?
        }
        _ => Value::Null,
    };
    normalize_ids(&mut payload);
    Ok((frame.kind, payload))
}

fn normalize_ids(payload: &mut Value) {
    let Some(obj) = payload.as_object_mut() else {
        return;
    };
    for key in ID_FIELDS {
        if let Some(Value::String(id)) = obj.get_mut(key) {
            *id = id.to_uppercase();
        }
    }
}

// ── Inbound payloads ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedData {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub client_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChangeNetworkData {
    pub network: Network,
}

/// Worker pickup of a single job.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerAssignment {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "imgID")]
    pub img_id: String,
    #[serde(rename = "workerName", default)]
    pub worker_name: String,
    #[serde(rename = "positivePrompt", default)]
    pub positive_prompt: Option<String>,
    #[serde(rename = "negativePrompt", default)]
    pub negative_prompt: Option<String>,
    #[serde(rename = "jobIndex", default)]
    pub job_index: Option<u32>,
}

/// `jobState` payload, discriminated by its inner `type`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum JobStateData {
    #[serde(rename = "queued")]
    Queued {
        #[serde(rename = "jobID")]
        job_id: String,
        #[serde(rename = "queuePosition", default)]
        queue_position: i64,
    },
    #[serde(rename = "initiatingModel")]
    InitiatingModel(WorkerAssignment),
    #[serde(rename = "jobStarted")]
    JobStarted(WorkerAssignment),
    #[serde(rename = "jobCompleted")]
    JobCompleted {
        #[serde(rename = "jobID")]
        job_id: String,
    },
}

impl JobStateData {
    pub fn project_id(&self) -> &str {
        match self {
            Self::Queued { job_id, .. } | Self::JobCompleted { job_id } => job_id,
            Self::InitiatingModel(a) | Self::JobStarted(a) => &a.job_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobProgressData {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "imgID")]
    pub img_id: String,
    #[serde(rename = "hasImage", default)]
    pub has_image: bool,
    pub step: u32,
    #[serde(rename = "stepCount")]
    pub step_count: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobResultData {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "imgID")]
    pub img_id: String,
    #[serde(rename = "performedStepCount", default)]
    pub performed_step_count: u32,
    #[serde(rename = "lastSeed", default, deserialize_with = "seed_from_string_or_number")]
    pub last_seed: Option<u64>,
    #[serde(rename = "userCanceled", default)]
    pub user_canceled: bool,
    #[serde(rename = "triggeredNSFWFilter", default)]
    pub triggered_nsfw_filter: bool,
}

/// Error code as sent by the server: a number or a symbolic name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RawErrorCode {
    Numeric(i64),
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobErrorData {
    #[serde(rename = "jobID")]
    pub job_id: String,
    #[serde(rename = "imgID", default)]
    pub img_id: Option<String>,
    #[serde(rename = "isFromWorker", default)]
    pub is_from_worker: bool,
    #[serde(default)]
    pub error_message: String,
    pub error: RawErrorCode,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToastMessageData {
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub auto_close: Option<u64>,
    #[serde(rename = "stickyID", default)]
    pub sticky_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CancelConfirmation {
    #[serde(rename = "didCancel")]
    pub did_cancel: bool,
    #[serde(default)]
    pub error_message: String,
    #[serde(rename = "jobID")]
    pub job_id: String,
}

fn seed_from_string_or_number<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_u64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

// ── ServerEvent ──────────────────────────────────────────────────────

/// Every push event the server sends, decoded once at the socket boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Authenticated(AuthenticatedData),
    BalanceUpdate(Value),
    ChangeNetwork(ChangeNetworkData),
    JobState(JobStateData),
    JobProgress(JobProgressData),
    JobResult(JobResultData),
    JobError(JobErrorData),
    /// Model id → available worker count.
    SwarmModels(BTreeMap<String, u32>),
    ToastMessage(ToastMessageData),
    ArtistCancelConfirmation(CancelConfirmation),
    /// A message type this client does not understand.
    Unknown { kind: String, payload: Value },
}

impl ServerEvent {
    /// Build a typed event from a decoded frame.
    pub fn decode(kind: &str, payload: Value) -> Result<Self, Error> {
        fn typed<T: serde::de::DeserializeOwned>(kind: &str, payload: Value) -> Result<T, Error> {
            serde_json::from_value(payload).map_err(|e| Error::Frame(format!("{kind}: {e}")))
        }

        Ok(match kind {
            "authenticated" => Self::Authenticated(typed(kind, payload)?),
            "balanceUpdate" => Self::BalanceUpdate(payload),
            "changeNetwork" => Self::ChangeNetwork(typed(kind, payload)?),
            "jobState" => Self::JobState(typed(kind, payload)?),
            "jobProgress" => Self::JobProgress(typed(kind, payload)?),
            "jobResult" => Self::JobResult(typed(kind, payload)?),
            "jobError" => Self::JobError(typed(kind, payload)?),
            "swarmModels" => Self::SwarmModels(typed(kind, payload)?),
            "toastMessage" => Self::ToastMessage(typed(kind, payload)?),
            "artistCancelConfirmation" => Self::ArtistCancelConfirmation(typed(kind, payload)?),
            other => Self::Unknown {
                kind: other.to_owned(),
                payload,
            },
        })
    }

    /// Decode a raw text frame straight into an event.
    pub fn from_frame(text: &str) -> Result<Self, Error> {
        let (kind, payload) = decode_frame(text)?;
        Self::decode(&kind, payload)
    }

    pub fn kind(&self) -> &str {
        match self {
            Self::Authenticated(_) => "authenticated",
            Self::BalanceUpdate(_) => "balanceUpdate",
            Self::ChangeNetwork(_) => "changeNetwork",
            Self::JobState(_) => "jobState",
            Self::JobProgress(_) => "jobProgress",
            Self::JobResult(_) => "jobResult",
            Self::JobError(_) => "jobError",
            Self::SwarmModels(_) => "swarmModels",
            Self::ToastMessage(_) => "toastMessage",
            Self::ArtistCancelConfirmation(_) => "artistCancelConfirmation",
            Self::Unknown { kind, .. } => kind,
        }
    }
}

// ── Outbound messages ────────────────────────────────────────────────

/// Cancellation signal for a whole project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobCancelMessage {
    #[serde(rename = "jobID")]
    pub job_id: String,
    pub error: &'static str,
    pub error_message: &'static str,
    #[serde(rename = "isFromWorker")]
    pub is_from_worker: bool,
}

impl JobCancelMessage {
    pub fn artist_canceled(project_id: impl Into<String>) -> Self {
        Self {
            job_id: project_id.into(),
            error: "artistCanceled",
            error_message: "artistCanceled",
            is_from_worker: false,
        }
    }
}

/// Every message the client sends over the socket.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// A fully built job request body.
    JobRequest(Value),
    JobError(JobCancelMessage),
    ChangeNetwork(Network),
}

impl ClientMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JobRequest(_) => "jobRequest",
            Self::JobError(_) => "jobError",
            Self::ChangeNetwork(_) => "changeNetwork",
        }
    }

    pub fn encode(&self) -> Result<String, Error> {
        match self {
            Self::JobRequest(body) => encode_frame(self.kind(), body),
            Self::JobError(cancel) => encode_frame(self.kind(), cancel),
            Self::ChangeNetwork(network) => encode_frame(self.kind(), network),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn frame(kind: &str, payload: &Value) -> String {
        json!({ "type": kind, "data": STANDARD.encode(payload.to_string()) }).to_string()
    }

    #[test]
    fn encoded_frame_carries_base64_json() {
        let text = ClientMessage::ChangeNetwork(Network::Relaxed).encode().unwrap();
        let raw: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(raw["type"], "changeNetwork");
        let inner = STANDARD.decode(raw["data"].as_str().unwrap()).unwrap();
        assert_eq!(inner, b"\"relaxed\"");
    }

    #[test]
    fn decode_uppercases_correlation_ids() {
        let text = frame(
            "jobProgress",
            &json!({ "jobID": "ab-12", "imgID": "cd-34", "step": 3, "stepCount": 20 }),
        );
        let (kind, payload) = decode_frame(&text).unwrap();
        assert_eq!(kind, "jobProgress");
        assert_eq!(payload["jobID"], "AB-12");
        assert_eq!(payload["imgID"], "CD-34");
    }

    #[test]
    fn frame_without_data_decodes_to_null() {
        let (kind, payload) = decode_frame(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(kind, "ping");
        assert!(payload.is_null());
    }

    #[test]
    fn garbage_frame_is_rejected() {
        assert!(matches!(decode_frame("not json"), Err(Error::Frame(_))));
        assert!(matches!(
            decode_frame(r#"{"type":"jobState","data":"!!!"}"#),
            Err(Error::Frame(_))
        ));
    }

    #[test]
    fn job_state_variants_decode() {
        let queued = ServerEvent::from_frame(&frame(
            "jobState",
            &json!({ "type": "queued", "jobID": "p1", "queuePosition": 4 }),
        ))
        .unwrap();
        assert_eq!(
            queued,
            ServerEvent::JobState(JobStateData::Queued {
                job_id: "P1".into(),
                queue_position: 4
            })
        );

        let started = ServerEvent::from_frame(&frame(
            "jobState",
            &json!({
                "type": "jobStarted", "jobID": "p1", "imgID": "j1",
                "workerName": "rig-7", "positivePrompt": "a cat"
            }),
        ))
        .unwrap();
        let ServerEvent::JobState(JobStateData::JobStarted(assignment)) = started else {
            panic!("expected jobStarted, got {started:?}");
        };
        assert_eq!(assignment.img_id, "J1");
        assert_eq!(assignment.worker_name, "rig-7");
        assert_eq!(assignment.positive_prompt.as_deref(), Some("a cat"));
        assert_eq!(assignment.job_index, None);
    }

    #[test]
    fn job_result_seed_accepts_string() {
        let event = ServerEvent::from_frame(&frame(
            "jobResult",
            &json!({
                "jobID": "p1", "imgID": "j1", "performedStepCount": 20,
                "lastSeed": "123456789", "userCanceled": false, "triggeredNSFWFilter": true
            }),
        ))
        .unwrap();
        let ServerEvent::JobResult(result) = event else {
            panic!("expected jobResult");
        };
        assert_eq!(result.last_seed, Some(123_456_789));
        assert!(result.triggered_nsfw_filter);
    }

    #[test]
    fn job_error_code_may_be_named_or_numeric() {
        let named: JobErrorData = serde_json::from_value(json!({
            "jobID": "P1", "error": "workerDisconnected", "error_message": "gone"
        }))
        .unwrap();
        assert_eq!(named.error, RawErrorCode::Named("workerDisconnected".into()));
        assert_eq!(named.img_id, None);

        let numeric: JobErrorData = serde_json::from_value(json!({
            "jobID": "P1", "imgID": "J1", "error": 4007, "error_message": "bad"
        }))
        .unwrap();
        assert_eq!(numeric.error, RawErrorCode::Numeric(4007));
    }

    #[test]
    fn unknown_message_type_is_preserved() {
        let event = ServerEvent::decode("somethingNew", json!({ "x": 1 })).unwrap();
        assert_eq!(event.kind(), "somethingNew");
        assert!(matches!(event, ServerEvent::Unknown { .. }));
    }

    #[test]
    fn cancel_message_shape() {
        let msg = JobCancelMessage::artist_canceled("P1");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "jobID": "P1",
                "error": "artistCanceled",
                "error_message": "artistCanceled",
                "isFromWorker": false
            })
        );
    }

    #[test]
    fn network_parses_from_str() {
        assert_eq!("relaxed".parse::<Network>().unwrap(), Network::Relaxed);
        assert_eq!(Network::Fast.to_string(), "fast");
    }
}
