//! UDP 노드
//!
//! 소켓 하나로 `XferManager`를 구동한다. 수신 데이터그램은 디코딩 후
//! 관리자에 넘기고, 주기 타이머마다 `tick`을 호출한 뒤
//! 관리자가 쌓아 둔 출력을 소켓으로 내보낸다.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::manager::{Outgoing, XferManager};
use crate::message::XferMessage;
use crate::storage::XferStorage;
use crate::Result;

/// 최대 데이터그램 크기
const MAX_DATAGRAM: usize = 65535;

/// 전송 노드
pub struct XferNode<S: XferStorage> {
    socket: Arc<UdpSocket>,

    manager: Arc<Mutex<XferManager<S>>>,

    /// 실행 중 플래그
    running: AtomicBool,

    /// 하드 리밋 위반으로 끊긴 회선
    disabled: Mutex<HashSet<SocketAddr>>,
}

impl<S: XferStorage> XferNode<S> {
    /// 소켓 바인딩
    pub async fn bind(addr: SocketAddr, manager: XferManager<S>) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        info!("Xfer node listening on {}", socket.local_addr()?);
        Ok(Self {
            socket: Arc::new(socket),
            manager: Arc::new(Mutex::new(manager)),
            running: AtomicBool::new(false),
            disabled: Mutex::new(HashSet::new()),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// 관리자 핸들 (요청 등록, 설정 변경)
    ///
    /// 잠금을 잡은 채로 await 하지 말 것.
    pub fn manager(&self) -> Arc<Mutex<XferManager<S>>> {
        self.manager.clone()
    }

    pub fn is_circuit_disabled(&self, host: &SocketAddr) -> bool {
        self.disabled.lock().contains(host)
    }

    /// 끊긴 회선 복구
    pub fn enable_circuit(&self, host: &SocketAddr) {
        if self.disabled.lock().remove(host) {
            info!("circuit to {} re-enabled", host);
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 수신/타이머 루프. `stop()` 호출 후 다음 틱에 종료.
    pub async fn run(&self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);

        let tick_interval = self.manager.lock().config().tick_interval();
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut buf = vec![0u8; MAX_DATAGRAM];

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, addr)) => self.handle_datagram(&buf[..len], addr),
                        Err(e) => warn!("수신 에러: {}", e),
                    }
                }
                _ = ticker.tick() => {
                    self.manager.lock().tick(Instant::now());
                }
            }
            self.flush().await;
        }

        info!("Xfer node stopped");
        Ok(())
    }

    /// 정지
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    fn handle_datagram(&self, bytes: &[u8], addr: SocketAddr) {
        if self.is_circuit_disabled(&addr) {
            return;
        }
        match XferMessage::from_bytes(bytes) {
            Ok(message) => {
                self.manager
                    .lock()
                    .handle_message(addr, message, Instant::now());
            }
            Err(e) => debug!("{} 에서 잘못된 데이터그램: {}", addr, e),
        }
    }

    /// 관리자 출력 송출
    pub async fn flush(&self) {
        let outgoing = self.manager.lock().drain_outgoing();
        for out in outgoing {
            match out {
                Outgoing::Message { host, message } => {
                    if self.is_circuit_disabled(&host) {
                        continue;
                    }
                    let bytes = match message.to_bytes() {
                        Ok(bytes) => bytes,
                        Err(e) => {
                            warn!("메시지 직렬화 에러: {}", e);
                            continue;
                        }
                    };
                    if let Err(e) = self.socket.send_to(&bytes, host).await {
                        warn!("{} 송신 에러: {}", host, e);
                    }
                }
                Outgoing::DisableCircuit(host) => {
                    warn!("disabling circuit to {}", host);
                    self.disabled.lock().insert(host);
                }
            }
        }
    }
}
