//! 人偶模式服务
//!
//! - `set_mannequin_mode` 由 [`ServiceHost`] 的工作线程处理，等待时限从请求到达算起
//! - `get_mannequin_mode` 在查询线程上答复，不受进行中的切换影响
//! - 转发线程把进程内话题（状态、播报）推送给远端订阅者

use crossbeam_channel::{Receiver, Sender, select};
use mannequin_core::{
    Broadcaster, ConfigError, CoordinatorBuilder, HostHandle, MannequinConfig, ModeCoordinator,
    RemoteCollaborators, ServiceHost, TopicPublisher,
};
use mannequin_protocol::{
    BoolMsg, Empty, GET_MANNEQUIN_MODE_SERVICE, MODE_STATE_TOPIC, SAY_TOPIC,
    SET_MANNEQUIN_MODE_SERVICE, SetBoolRequest, SetBoolResponse, StringMsg,
};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// 运行中的服务
pub struct MannequinServer {
    coordinator: Arc<ModeCoordinator>,
    host: Option<HostHandle>,
    relay: Option<JoinHandle<()>>,
    relay_stop: Sender<()>,
}

impl MannequinServer {
    /// 构建协调器并开始提供服务
    pub fn start(config: &MannequinConfig, workers: usize) -> Result<Self, ServerError> {
        let bind = config.services.bind_addr()?;
        let remote = RemoteCollaborators::from_config(&config.services)?;
        let publisher = Arc::new(TopicPublisher::new());

        let coordinator = Arc::new(
            CoordinatorBuilder::new()
                .controllers(config.controllers.clone())
                .remote(Arc::new(remote))
                .publisher(publisher.clone())
                .build()?,
        );

        let mut host = ServiceHost::bind(bind)
            .map_err(|source| ServerError::Bind { addr: bind, source })?
            .workers(workers);

        let c = coordinator.clone();
        host.register_timed(
            SET_MANNEQUIN_MODE_SERVICE,
            move |req: SetBoolRequest, received| {
                SetBoolResponse::from(c.set_mode_requested_at(req.data, received))
            },
        );
        let c = coordinator.clone();
        host.register_query(GET_MANNEQUIN_MODE_SERVICE, move |_: Empty| c.status());

        // 先订阅再发布初始状态，保证初始值也被转发
        let (relay_stop, stop_rx) = crossbeam_channel::bounded(1);
        let relay = spawn_relay(&publisher, host.broadcaster(), stop_rx)?;
        coordinator.publish_current_state();

        let handle = host.spawn()?;
        info!(
            addr = %handle.local_addr(),
            strict = ?config.controllers.strict(),
            loose = ?config.controllers.loose(),
            timeout_ms = config.services.call_timeout_ms,
            max_reply_ms = coordinator.status().max_reply_ms,
            "Mannequin mode server started"
        );
        for (strict, loose) in config.controllers.pairs() {
            debug!(strict, loose, "Joint group");
        }

        Ok(Self {
            coordinator,
            host: Some(handle),
            relay: Some(relay),
            relay_stop,
        })
    }

    /// 实际监听地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.host.as_ref().map(HostHandle::local_addr)
    }

    pub fn coordinator(&self) -> &ModeCoordinator {
        &self.coordinator
    }

    /// 停止服务并等待所有线程退出
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(host) = self.host.take() {
            host.shutdown();
        }
        let _ = self.relay_stop.try_send(());
        if let Some(relay) = self.relay.take()
            && relay.join().is_err()
        {
            error!("Topic relay thread panicked");
        }
        info!("Mannequin mode server stopped");
    }
}

impl Drop for MannequinServer {
    fn drop(&mut self) {
        if self.host.is_some() || self.relay.is_some() {
            self.stop();
        }
    }
}

/// 把进程内话题转发给远端订阅者
fn spawn_relay(
    publisher: &TopicPublisher,
    broadcaster: Broadcaster,
    stop: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    let state_rx = publisher.state().subscribe();
    let say_rx = publisher.say().subscribe();

    thread::Builder::new()
        .name("mannequin-relay".to_string())
        .spawn(move || {
            loop {
                select! {
                    recv(state_rx) -> msg => match msg {
                        Ok(active) => {
                            match broadcaster.publish(MODE_STATE_TOPIC, &BoolMsg { data: active }, true) {
                                Ok(delivered) => debug!(active, delivered, "Mode state relayed"),
                                Err(e) => warn!(error = %e, "Failed to relay mode state"),
                            }
                        },
                        Err(_) => break,
                    },
                    recv(say_rx) -> msg => match msg {
                        Ok(text) => {
                            if let Err(e) = broadcaster.publish(SAY_TOPIC, &StringMsg { data: text }, false) {
                                warn!(error = %e, "Failed to relay announcement");
                            }
                        },
                        Err(_) => break,
                    },
                    recv(stop) -> _ => break,
                }
            }
            debug!("Topic relay stopped");
        })
}
