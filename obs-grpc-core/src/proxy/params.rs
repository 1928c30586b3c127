//! Request parameters and response data of the backend requests, in their wire shape.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// Requests

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scene_uuid: Option<String>,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InputSelector {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_uuid: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerHotkeyByName {
    pub hotkey_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_name: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastCustomEvent {
    pub event_data: Map<String, Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallVendorRequest {
    pub vendor_name: String,
    pub request_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_data: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetPersistentData {
    pub realm: String,
    pub slot_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPersistentData {
    pub realm: String,
    pub slot_name: String,
    pub slot_value: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateScene {
    pub scene_name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetInputList {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_kind: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInputSettings {
    #[serde(flatten)]
    pub input: InputSelector,
    pub input_settings: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overlay: Option<bool>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInputMute {
    #[serde(flatten)]
    pub input: InputSelector,
    pub input_muted: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetInputVolume {
    #[serde(flatten)]
    pub input: InputSelector,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_volume_mul: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_volume_db: Option<f64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SceneItem {
    #[serde(flatten)]
    pub scene: SceneSelector,
    pub scene_item_id: i64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSceneItemTransform {
    #[serde(flatten)]
    pub scene: SceneSelector,
    pub scene_item_id: i64,
    pub scene_item_transform: Map<String, Value>,
}

// Responses. Missing fields fall back to their defaults.

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Version {
    pub obs_version: String,
    pub obs_web_socket_version: String,
    pub rpc_version: i64,
    pub available_requests: Vec<String>,
    pub supported_image_formats: Vec<String>,
    pub platform: String,
    pub platform_description: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Stats {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub available_disk_space: f64,
    pub active_fps: f64,
    pub average_frame_render_time: f64,
    pub render_skipped_frames: i64,
    pub render_total_frames: i64,
    pub output_skipped_frames: i64,
    pub output_total_frames: i64,
    pub web_socket_session_incoming_messages: i64,
    pub web_socket_session_outgoing_messages: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HotkeyList {
    pub hotkeys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VendorResponse {
    pub vendor_name: String,
    pub request_type: String,
    pub response_data: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistentData {
    pub slot_value: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneList {
    // Null when studio mode is off or no scene is selected.
    pub current_program_scene_name: Option<String>,
    pub current_program_scene_uuid: Option<String>,
    pub current_preview_scene_name: Option<String>,
    pub current_preview_scene_uuid: Option<String>,
    pub scenes: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CurrentProgramScene {
    pub scene_name: String,
    pub scene_uuid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CreatedScene {
    pub scene_uuid: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputList {
    pub inputs: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputSettings {
    pub input_settings: Map<String, Value>,
    pub input_kind: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputMute {
    pub input_muted: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct InputVolume {
    pub input_volume_mul: f64,
    pub input_volume_db: f64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneItemList {
    pub scene_items: Vec<Map<String, Value>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SceneItemTransform {
    pub scene_item_transform: Map<String, Value>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamStatus {
    pub output_active: bool,
    pub output_reconnecting: bool,
    pub output_timecode: String,
    pub output_duration: i64,
    pub output_congestion: f64,
    pub output_bytes: i64,
    pub output_skipped_frames: i64,
    pub output_total_frames: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct OutputActive {
    pub output_active: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RecordStopped {
    pub output_path: String,
}
