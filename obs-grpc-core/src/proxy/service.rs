//! The `obs_grpc.Obs` handlers.
use super::params;
use super::{
    Proxy, SubscribeEventsStream, bytes_list, request_object, request_text, request_value,
    response_object, response_objects, response_value,
};
use crate::connection::Connector;
use crate::pb::{self, obs_server::Obs};
use serde::de::IgnoredAny;
use std::collections::HashSet;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tonic::{Request, Response, Status};
use tracing::{debug, warn};

type RpcResult<T> = Result<Response<T>, Status>;

fn scene(scene_name: Option<String>, scene_uuid: Option<String>) -> params::SceneSelector {
    params::SceneSelector {
        scene_name,
        scene_uuid,
    }
}

fn input(input_name: Option<String>, input_uuid: Option<String>) -> params::InputSelector {
    params::InputSelector {
        input_name,
        input_uuid,
    }
}

#[tonic::async_trait]
impl<C: Connector> Obs for Proxy<C> {
    type SubscribeEventsStream = SubscribeEventsStream;

    async fn subscribe_events(
        &self,
        request: Request<pb::SubscribeEventsRequest>,
    ) -> RpcResult<Self::SubscribeEventsStream> {
        let event_types: HashSet<String> = request.into_inner().event_types.into_iter().collect();
        debug!(?event_types, "new event subscriber");

        let stream = BroadcastStream::new(self.subscribe()).filter_map(move |event| match event {
            Ok(event) if event_types.is_empty() || event_types.contains(&event.event_type) => {
                Some(Ok(event))
            }
            Ok(_) => None,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "event subscriber is lagging, events were dropped");
                None
            }
        });

        Ok(Response::new(Box::pin(stream)))
    }

    // General

    async fn get_version(&self, _: Request<pb::GetVersionRequest>) -> RpcResult<pb::GetVersionResponse> {
        let version: params::Version = self.query("GetVersion").await?;
        Ok(Response::new(pb::GetVersionResponse {
            obs_version: version.obs_version.into_bytes(),
            obs_web_socket_version: version.obs_web_socket_version.into_bytes(),
            rpc_version: version.rpc_version,
            available_requests: bytes_list(version.available_requests),
            supported_image_formats: bytes_list(version.supported_image_formats),
            platform: version.platform.into_bytes(),
            platform_description: version.platform_description.into_bytes(),
        }))
    }

    async fn get_stats(&self, _: Request<pb::GetStatsRequest>) -> RpcResult<pb::GetStatsResponse> {
        let stats: params::Stats = self.query("GetStats").await?;
        Ok(Response::new(pb::GetStatsResponse {
            cpu_usage: stats.cpu_usage,
            memory_usage: stats.memory_usage,
            available_disk_space: stats.available_disk_space,
            active_fps: stats.active_fps,
            average_frame_render_time: stats.average_frame_render_time,
            render_skipped_frames: stats.render_skipped_frames,
            render_total_frames: stats.render_total_frames,
            output_skipped_frames: stats.output_skipped_frames,
            output_total_frames: stats.output_total_frames,
            web_socket_session_incoming_messages: stats.web_socket_session_incoming_messages,
            web_socket_session_outgoing_messages: stats.web_socket_session_outgoing_messages,
        }))
    }

    async fn get_hotkey_list(
        &self,
        _: Request<pb::GetHotkeyListRequest>,
    ) -> RpcResult<pb::GetHotkeyListResponse> {
        let list: params::HotkeyList = self.query("GetHotkeyList").await?;
        Ok(Response::new(pb::GetHotkeyListResponse {
            hotkeys: bytes_list(list.hotkeys),
        }))
    }

    async fn trigger_hotkey_by_name(
        &self,
        request: Request<pb::TriggerHotkeyByNameRequest>,
    ) -> RpcResult<pb::TriggerHotkeyByNameResponse> {
        let request = request.into_inner();
        let params = params::TriggerHotkeyByName {
            hotkey_name: request.hotkey_name,
            context_name: request.context_name,
        };
        let _: IgnoredAny = self.request("TriggerHotkeyByName", &params).await?;
        Ok(Response::new(pb::TriggerHotkeyByNameResponse {}))
    }

    async fn broadcast_custom_event(
        &self,
        request: Request<pb::BroadcastCustomEventRequest>,
    ) -> RpcResult<pb::BroadcastCustomEventResponse> {
        let request = request.into_inner();
        let params = params::BroadcastCustomEvent {
            event_data: request_object("event_data", request.event_data)?,
        };
        let _: IgnoredAny = self.request("BroadcastCustomEvent", &params).await?;
        Ok(Response::new(pb::BroadcastCustomEventResponse {}))
    }

    async fn call_vendor_request(
        &self,
        request: Request<pb::CallVendorRequestRequest>,
    ) -> RpcResult<pb::CallVendorRequestResponse> {
        let request = request.into_inner();
        let request_data = match request.request_data {
            Some(row) => Some(request_object("request_data", Some(row))?),
            None => None,
        };
        let params = params::CallVendorRequest {
            vendor_name: request.vendor_name,
            request_type: request_text("request_type", request.request_type)?,
            request_data,
        };

        let response: params::VendorResponse = self.request("CallVendorRequest", &params).await?;
        Ok(Response::new(pb::CallVendorRequestResponse {
            vendor_name: response.vendor_name,
            request_type: response.request_type.into_bytes(),
            response_data: Some(response_object("response_data", response.response_data)?),
        }))
    }

    async fn get_persistent_data(
        &self,
        request: Request<pb::GetPersistentDataRequest>,
    ) -> RpcResult<pb::GetPersistentDataResponse> {
        let request = request.into_inner();
        let params = params::GetPersistentData {
            realm: request_text("realm", request.realm)?,
            slot_name: request.slot_name,
        };

        let data: params::PersistentData = self.request("GetPersistentData", &params).await?;
        Ok(Response::new(pb::GetPersistentDataResponse {
            slot_value: response_value("slot_value", data.slot_value)?,
        }))
    }

    async fn set_persistent_data(
        &self,
        request: Request<pb::SetPersistentDataRequest>,
    ) -> RpcResult<pb::SetPersistentDataResponse> {
        let request = request.into_inner();
        let params = params::SetPersistentData {
            realm: request_text("realm", request.realm)?,
            slot_name: request.slot_name,
            slot_value: request_value("slot_value", request.slot_value)?,
        };
        let _: IgnoredAny = self.request("SetPersistentData", &params).await?;
        Ok(Response::new(pb::SetPersistentDataResponse {}))
    }

    // Scenes

    async fn get_scene_list(
        &self,
        _: Request<pb::GetSceneListRequest>,
    ) -> RpcResult<pb::GetSceneListResponse> {
        let list: params::SceneList = self.query("GetSceneList").await?;
        Ok(Response::new(pb::GetSceneListResponse {
            current_program_scene_name: list.current_program_scene_name.unwrap_or_default(),
            current_program_scene_uuid: list.current_program_scene_uuid.unwrap_or_default(),
            current_preview_scene_name: list.current_preview_scene_name.unwrap_or_default(),
            current_preview_scene_uuid: list.current_preview_scene_uuid.unwrap_or_default(),
            scenes: response_objects("scenes", list.scenes)?,
        }))
    }

    async fn get_current_program_scene(
        &self,
        _: Request<pb::GetCurrentProgramSceneRequest>,
    ) -> RpcResult<pb::GetCurrentProgramSceneResponse> {
        let scene: params::CurrentProgramScene = self.query("GetCurrentProgramScene").await?;
        Ok(Response::new(pb::GetCurrentProgramSceneResponse {
            scene_name: scene.scene_name,
            scene_uuid: scene.scene_uuid,
        }))
    }

    async fn set_current_program_scene(
        &self,
        request: Request<pb::SetCurrentProgramSceneRequest>,
    ) -> RpcResult<pb::SetCurrentProgramSceneResponse> {
        let request = request.into_inner();
        let params = scene(request.scene_name, request.scene_uuid);
        let _: IgnoredAny = self.request("SetCurrentProgramScene", &params).await?;
        Ok(Response::new(pb::SetCurrentProgramSceneResponse {}))
    }

    async fn create_scene(
        &self,
        request: Request<pb::CreateSceneRequest>,
    ) -> RpcResult<pb::CreateSceneResponse> {
        let params = params::CreateScene {
            scene_name: request.into_inner().scene_name,
        };
        let created: params::CreatedScene = self.request("CreateScene", &params).await?;
        Ok(Response::new(pb::CreateSceneResponse {
            scene_uuid: created.scene_uuid,
        }))
    }

    async fn remove_scene(
        &self,
        request: Request<pb::RemoveSceneRequest>,
    ) -> RpcResult<pb::RemoveSceneResponse> {
        let request = request.into_inner();
        let params = scene(request.scene_name, request.scene_uuid);
        let _: IgnoredAny = self.request("RemoveScene", &params).await?;
        Ok(Response::new(pb::RemoveSceneResponse {}))
    }

    // Inputs

    async fn get_input_list(
        &self,
        request: Request<pb::GetInputListRequest>,
    ) -> RpcResult<pb::GetInputListResponse> {
        let params = params::GetInputList {
            input_kind: request.into_inner().input_kind,
        };
        let list: params::InputList = self.request("GetInputList", &params).await?;
        Ok(Response::new(pb::GetInputListResponse {
            inputs: response_objects("inputs", list.inputs)?,
        }))
    }

    async fn get_input_settings(
        &self,
        request: Request<pb::GetInputSettingsRequest>,
    ) -> RpcResult<pb::GetInputSettingsResponse> {
        let request = request.into_inner();
        let params = input(request.input_name, request.input_uuid);
        let settings: params::InputSettings = self.request("GetInputSettings", &params).await?;
        Ok(Response::new(pb::GetInputSettingsResponse {
            input_settings: Some(response_object("input_settings", settings.input_settings)?),
            input_kind: settings.input_kind,
        }))
    }

    async fn set_input_settings(
        &self,
        request: Request<pb::SetInputSettingsRequest>,
    ) -> RpcResult<pb::SetInputSettingsResponse> {
        let request = request.into_inner();
        let params = params::SetInputSettings {
            input: input(request.input_name, request.input_uuid),
            input_settings: request_object("input_settings", request.input_settings)?,
            overlay: request.overlay,
        };
        let _: IgnoredAny = self.request("SetInputSettings", &params).await?;
        Ok(Response::new(pb::SetInputSettingsResponse {}))
    }

    async fn get_input_mute(
        &self,
        request: Request<pb::GetInputMuteRequest>,
    ) -> RpcResult<pb::GetInputMuteResponse> {
        let request = request.into_inner();
        let params = input(request.input_name, request.input_uuid);
        let mute: params::InputMute = self.request("GetInputMute", &params).await?;
        Ok(Response::new(pb::GetInputMuteResponse {
            input_muted: mute.input_muted,
        }))
    }

    async fn set_input_mute(
        &self,
        request: Request<pb::SetInputMuteRequest>,
    ) -> RpcResult<pb::SetInputMuteResponse> {
        let request = request.into_inner();
        let params = params::SetInputMute {
            input: input(request.input_name, request.input_uuid),
            input_muted: request.input_muted,
        };
        let _: IgnoredAny = self.request("SetInputMute", &params).await?;
        Ok(Response::new(pb::SetInputMuteResponse {}))
    }

    async fn toggle_input_mute(
        &self,
        request: Request<pb::ToggleInputMuteRequest>,
    ) -> RpcResult<pb::ToggleInputMuteResponse> {
        let request = request.into_inner();
        let params = input(request.input_name, request.input_uuid);
        let mute: params::InputMute = self.request("ToggleInputMute", &params).await?;
        Ok(Response::new(pb::ToggleInputMuteResponse {
            input_muted: mute.input_muted,
        }))
    }

    async fn get_input_volume(
        &self,
        request: Request<pb::GetInputVolumeRequest>,
    ) -> RpcResult<pb::GetInputVolumeResponse> {
        let request = request.into_inner();
        let params = input(request.input_name, request.input_uuid);
        let volume: params::InputVolume = self.request("GetInputVolume", &params).await?;
        Ok(Response::new(pb::GetInputVolumeResponse {
            input_volume_mul: volume.input_volume_mul,
            input_volume_db: volume.input_volume_db,
        }))
    }

    async fn set_input_volume(
        &self,
        request: Request<pb::SetInputVolumeRequest>,
    ) -> RpcResult<pb::SetInputVolumeResponse> {
        let request = request.into_inner();
        let params = params::SetInputVolume {
            input: input(request.input_name, request.input_uuid),
            input_volume_mul: request.input_volume_mul,
            input_volume_db: request.input_volume_db,
        };
        let _: IgnoredAny = self.request("SetInputVolume", &params).await?;
        Ok(Response::new(pb::SetInputVolumeResponse {}))
    }

    // Scene items

    async fn get_scene_item_list(
        &self,
        request: Request<pb::GetSceneItemListRequest>,
    ) -> RpcResult<pb::GetSceneItemListResponse> {
        let request = request.into_inner();
        let params = scene(request.scene_name, request.scene_uuid);
        let list: params::SceneItemList = self.request("GetSceneItemList", &params).await?;
        Ok(Response::new(pb::GetSceneItemListResponse {
            scene_items: response_objects("scene_items", list.scene_items)?,
        }))
    }

    async fn get_scene_item_transform(
        &self,
        request: Request<pb::GetSceneItemTransformRequest>,
    ) -> RpcResult<pb::GetSceneItemTransformResponse> {
        let request = request.into_inner();
        let params = params::SceneItem {
            scene: scene(request.scene_name, request.scene_uuid),
            scene_item_id: request.scene_item_id,
        };
        let transform: params::SceneItemTransform =
            self.request("GetSceneItemTransform", &params).await?;
        Ok(Response::new(pb::GetSceneItemTransformResponse {
            scene_item_transform: Some(response_object(
                "scene_item_transform",
                transform.scene_item_transform,
            )?),
        }))
    }

    async fn set_scene_item_transform(
        &self,
        request: Request<pb::SetSceneItemTransformRequest>,
    ) -> RpcResult<pb::SetSceneItemTransformResponse> {
        let request = request.into_inner();
        let params = params::SetSceneItemTransform {
            scene: scene(request.scene_name, request.scene_uuid),
            scene_item_id: request.scene_item_id,
            scene_item_transform: request_object(
                "scene_item_transform",
                request.scene_item_transform,
            )?,
        };
        let _: IgnoredAny = self.request("SetSceneItemTransform", &params).await?;
        Ok(Response::new(pb::SetSceneItemTransformResponse {}))
    }

    // Outputs

    async fn get_stream_status(
        &self,
        _: Request<pb::GetStreamStatusRequest>,
    ) -> RpcResult<pb::GetStreamStatusResponse> {
        let status: params::StreamStatus = self.query("GetStreamStatus").await?;
        Ok(Response::new(pb::GetStreamStatusResponse {
            output_active: status.output_active,
            output_reconnecting: status.output_reconnecting,
            output_timecode: status.output_timecode.into_bytes(),
            output_duration: status.output_duration,
            output_congestion: status.output_congestion,
            output_bytes: status.output_bytes,
            output_skipped_frames: status.output_skipped_frames,
            output_total_frames: status.output_total_frames,
        }))
    }

    async fn start_stream(&self, _: Request<pb::StartStreamRequest>) -> RpcResult<pb::StartStreamResponse> {
        let _: IgnoredAny = self.query("StartStream").await?;
        Ok(Response::new(pb::StartStreamResponse {}))
    }

    async fn stop_stream(&self, _: Request<pb::StopStreamRequest>) -> RpcResult<pb::StopStreamResponse> {
        let _: IgnoredAny = self.query("StopStream").await?;
        Ok(Response::new(pb::StopStreamResponse {}))
    }

    async fn toggle_stream(
        &self,
        _: Request<pb::ToggleStreamRequest>,
    ) -> RpcResult<pb::ToggleStreamResponse> {
        let output: params::OutputActive = self.query("ToggleStream").await?;
        Ok(Response::new(pb::ToggleStreamResponse {
            output_active: output.output_active,
        }))
    }

    async fn start_record(&self, _: Request<pb::StartRecordRequest>) -> RpcResult<pb::StartRecordResponse> {
        let _: IgnoredAny = self.query("StartRecord").await?;
        Ok(Response::new(pb::StartRecordResponse {}))
    }

    async fn stop_record(&self, _: Request<pb::StopRecordRequest>) -> RpcResult<pb::StopRecordResponse> {
        let stopped: params::RecordStopped = self.query("StopRecord").await?;
        Ok(Response::new(pb::StopRecordResponse {
            output_path: stopped.output_path,
        }))
    }
}
