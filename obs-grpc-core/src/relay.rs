//! # Relay
//!
//! Serves an existing `obs_grpc.Obs` client as an `obs_grpc.Obs` service, so that proxies can
//! be chained: a [`Relay`] in front of a remote proxy looks like a local one.
//!
//! The other direction needs no adapter, since tonic clients accept any service:
//! `ObsClient::new(proxy.into_service())` talks to a [`Proxy`](crate::proxy::Proxy)
//! in-process.
//!
//! Only request messages are forwarded. Metadata of the incoming call stays on this hop.
use crate::pb::{self, obs_client::ObsClient, obs_server::Obs, obs_server::ObsServer};
use crate::proxy::SubscribeEventsStream;
use tonic::codegen::{Body, Bytes, StdError};
use tonic::{Request, Response, Status};

pub struct Relay<T> {
    client: ObsClient<T>,
}

impl<T: Clone> Relay<T> {
    pub fn new(client: ObsClient<T>) -> Self {
        Self { client }
    }

    pub fn into_service(self) -> ObsServer<Self>
    where
        Self: Obs,
    {
        ObsServer::new(self)
    }

    /// Every call gets its own handle; `ObsClient` methods need `&mut self`.
    fn client(&self) -> ObsClient<T> {
        self.client.clone()
    }
}

macro_rules! relay_calls {
    ($($method:ident($request:ident) -> $response:ident;)*) => {
        #[tonic::async_trait]
        impl<T> Obs for Relay<T>
        where
            T: tonic::client::GrpcService<tonic::body::Body> + Clone + Send + Sync + 'static,
            T::Future: Send,
            T::Error: Into<StdError>,
            T::ResponseBody: Body<Data = Bytes> + Send + 'static,
            <T::ResponseBody as Body>::Error: Into<StdError> + Send,
        {
            type SubscribeEventsStream = SubscribeEventsStream;

            async fn subscribe_events(
                &self,
                request: Request<pb::SubscribeEventsRequest>,
            ) -> Result<Response<Self::SubscribeEventsStream>, Status> {
                let events = self
                    .client()
                    .subscribe_events(request.into_inner())
                    .await?
                    .into_inner();
                Ok(Response::new(Box::pin(events)))
            }

            $(
                async fn $method(
                    &self,
                    request: Request<pb::$request>,
                ) -> Result<Response<pb::$response>, Status> {
                    self.client().$method(request.into_inner()).await
                }
            )*
        }
    };
}

relay_calls! {
    get_version(GetVersionRequest) -> GetVersionResponse;
    get_stats(GetStatsRequest) -> GetStatsResponse;
    get_hotkey_list(GetHotkeyListRequest) -> GetHotkeyListResponse;
    trigger_hotkey_by_name(TriggerHotkeyByNameRequest) -> TriggerHotkeyByNameResponse;
    broadcast_custom_event(BroadcastCustomEventRequest) -> BroadcastCustomEventResponse;
    call_vendor_request(CallVendorRequestRequest) -> CallVendorRequestResponse;
    get_persistent_data(GetPersistentDataRequest) -> GetPersistentDataResponse;
    set_persistent_data(SetPersistentDataRequest) -> SetPersistentDataResponse;
    get_scene_list(GetSceneListRequest) -> GetSceneListResponse;
    get_current_program_scene(GetCurrentProgramSceneRequest) -> GetCurrentProgramSceneResponse;
    set_current_program_scene(SetCurrentProgramSceneRequest) -> SetCurrentProgramSceneResponse;
    create_scene(CreateSceneRequest) -> CreateSceneResponse;
    remove_scene(RemoveSceneRequest) -> RemoveSceneResponse;
    get_input_list(GetInputListRequest) -> GetInputListResponse;
    get_input_settings(GetInputSettingsRequest) -> GetInputSettingsResponse;
    set_input_settings(SetInputSettingsRequest) -> SetInputSettingsResponse;
    get_input_mute(GetInputMuteRequest) -> GetInputMuteResponse;
    set_input_mute(SetInputMuteRequest) -> SetInputMuteResponse;
    toggle_input_mute(ToggleInputMuteRequest) -> ToggleInputMuteResponse;
    get_input_volume(GetInputVolumeRequest) -> GetInputVolumeResponse;
    set_input_volume(SetInputVolumeRequest) -> SetInputVolumeResponse;
    get_scene_item_list(GetSceneItemListRequest) -> GetSceneItemListResponse;
    get_scene_item_transform(GetSceneItemTransformRequest) -> GetSceneItemTransformResponse;
    set_scene_item_transform(SetSceneItemTransformRequest) -> SetSceneItemTransformResponse;
    get_stream_status(GetStreamStatusRequest) -> GetStreamStatusResponse;
    start_stream(StartStreamRequest) -> StartStreamResponse;
    stop_stream(StopStreamRequest) -> StopStreamResponse;
    toggle_stream(ToggleStreamRequest) -> ToggleStreamResponse;
    start_record(StartRecordRequest) -> StartRecordResponse;
    stop_record(StopRecordRequest) -> StopRecordResponse;
}
