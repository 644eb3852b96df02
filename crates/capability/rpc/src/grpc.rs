use crate::proto::{
    GET_DEVICE_PATH, GetDeviceRequest, GetDeviceResponse, UPDATE_COMMAND_STATE_PATH,
    UpdateCommandStateRequest, UpdateCommandStateResponse,
};
use crate::{RpcClient, RpcError};
use async_trait::async_trait;
use domain::{CommandState, DeviceIdentity};
use std::time::Duration;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::debug;

/// 建连超时。
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// gRPC 客户端。通道在构造时惰性建立一次，克隆后并发使用。
#[derive(Debug, Clone)]
pub struct GrpcRpcClient {
    channel: Channel,
}

impl GrpcRpcClient {
    /// `addr` 形如 `http://127.0.0.1:9000`，缺省 scheme 时补 `http://`。
    pub fn connect_lazy(addr: &str, timeout: Duration) -> Result<Self, RpcError> {
        let addr = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("http://{}", addr)
        };
        let endpoint = Endpoint::from_shared(addr.clone())
            .map_err(|err| RpcError::InvalidEndpoint(format!("{}: {}", addr, err)))?
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout);
        Ok(Self {
            channel: endpoint.connect_lazy(),
        })
    }

    async fn unary<Req, Resp>(&self, path: &'static str, request: Req) -> Result<Resp, RpcError>
    where
        Req: prost::Message + Send + Sync + 'static,
        Resp: prost::Message + Default + Send + Sync + 'static,
    {
        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|err| RpcError::Unavailable(err.to_string()))?;
        let codec = tonic_prost::ProstCodec::default();
        let response = grpc
            .unary(
                tonic::Request::new(request),
                PathAndQuery::from_static(path),
                codec,
            )
            .await?;
        Ok(response.into_inner())
    }
}

#[async_trait]
impl RpcClient for GrpcRpcClient {
    async fn resolve_device(
        &self,
        device_id: &str,
        allow_offline: bool,
    ) -> Result<DeviceIdentity, RpcError> {
        let response: GetDeviceResponse = self
            .unary(
                GET_DEVICE_PATH,
                GetDeviceRequest {
                    did: device_id.to_string(),
                    offline: allow_offline,
                },
            )
            .await?;
        debug!(
            target: "bridge.rpc",
            device_id = %device_id,
            tenant_id = response.tid,
            project_id = response.pid,
            "device_resolved"
        );
        let did = if response.did.is_empty() {
            device_id.to_string()
        } else {
            response.did
        };
        Ok(DeviceIdentity::new(response.tid, response.pid, did))
    }

    async fn update_command_state(
        &self,
        command_id: &str,
        state: CommandState,
    ) -> Result<(), RpcError> {
        let _: UpdateCommandStateResponse = self
            .unary(
                UPDATE_COMMAND_STATE_PATH,
                UpdateCommandStateRequest {
                    cid: command_id.to_string(),
                    state: state.as_str().to_string(),
                },
            )
            .await?;
        debug!(
            target: "bridge.rpc",
            command_id = %command_id,
            state = %state,
            "command_state_updated"
        );
        Ok(())
    }
}
