//! 远程调用：设备身份解析与命令状态回写。

mod grpc;
mod memory;
pub mod proto;

pub use grpc::GrpcRpcClient;
pub use memory::StaticRpcClient;

use async_trait::async_trait;
use domain::{CommandState, DeviceIdentity};

/// RPC 错误。
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("rpc unavailable: {0}")]
    Unavailable(String),
    #[error("rpc status {code}: {message}")]
    Status { code: String, message: String },
    #[error("device not found: {0}")]
    NotFound(String),
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        Self::Status {
            code: format!("{:?}", status.code()),
            message: status.message().to_string(),
        }
    }
}

/// 资产/命令服务协作方。连接一次建立，可被并发调用。
#[async_trait]
pub trait RpcClient: Send + Sync {
    /// 解析设备 ID 对应的租户/项目身份。
    async fn resolve_device(
        &self,
        device_id: &str,
        allow_offline: bool,
    ) -> Result<DeviceIdentity, RpcError>;

    /// 回写命令状态。
    async fn update_command_state(
        &self,
        command_id: &str,
        state: CommandState,
    ) -> Result<(), RpcError>;
}
