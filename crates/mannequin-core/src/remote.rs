//! 基于 [`ServiceClient`] 的远程协作服务实现

use crate::collaborators::{ControllerManager, LookTarget, TrajectoryLock};
use crate::config::ServiceConfig;
use crate::error::{ConfigError, ServiceError};
use crate::transport::ServiceClient;
use mannequin_protocol::{
    LOOK_TARGET_SERVICE, SWITCH_CONTROLLER_SERVICE, SetBoolRequest, SetBoolResponse,
    SetTargetRequest, SetTargetResponse, SwitchControllerRequest, SwitchControllerResponse,
};
use std::sync::Arc;

/// 远程协作服务
///
/// 一个实例同时实现三个协作接口，共享同一个 [`ServiceClient`]。
pub struct RemoteCollaborators {
    client: Arc<ServiceClient>,
    look_service: String,
    switch_service: String,
}

impl RemoteCollaborators {
    /// 使用默认服务名
    pub fn new(client: Arc<ServiceClient>) -> Self {
        Self {
            client,
            look_service: LOOK_TARGET_SERVICE.to_string(),
            switch_service: SWITCH_CONTROLLER_SERVICE.to_string(),
        }
    }

    /// 由服务配置构建（服务目录、超时、服务名）
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ConfigError> {
        let client = ServiceClient::new(config.directory()?, config.call_timeout());
        Ok(Self::new(Arc::new(client))
            .with_look_service(config.look_target.clone())
            .with_switch_service(config.switch_controller.clone()))
    }

    pub fn with_look_service(mut self, service: impl Into<String>) -> Self {
        self.look_service = service.into();
        self
    }

    pub fn with_switch_service(mut self, service: impl Into<String>) -> Self {
        self.switch_service = service.into();
        self
    }

    pub fn client(&self) -> &ServiceClient {
        &self.client
    }
}

impl LookTarget for RemoteCollaborators {
    fn set_target(&self, request: &SetTargetRequest) -> Result<SetTargetResponse, ServiceError> {
        self.client.call(&self.look_service, request)
    }
}

impl ControllerManager for RemoteCollaborators {
    fn switch_controllers(
        &self,
        request: &SwitchControllerRequest,
    ) -> Result<SwitchControllerResponse, ServiceError> {
        self.client.call(&self.switch_service, request)
    }
}

impl TrajectoryLock for RemoteCollaborators {
    fn set_trajectory_lock(
        &self,
        service: &str,
        enable: bool,
    ) -> Result<SetBoolResponse, ServiceError> {
        self.client.call(service, &SetBoolRequest::new(enable))
    }
}
