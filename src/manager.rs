//! 전송 관리자
//!
//! 송신/수신 목록을 소유하고 들어온 메시지를 해당 Xfer로 라우팅한다.
//! - 회선별 송신 승인 제어 (soft cap, hard limit)
//! - 전체 수신 승인 제어와 대기 다운로드 승격
//! - 재전송 스윕과 확인 패킷 스로틀
//!
//! 소켓을 직접 다루지 않는다. 보낼 것은 `Outgoing` 큐에 쌓이고
//! 디스패치 계층이 `drain_outgoing()`으로 꺼내 간다.
//! 시간에 의존하는 작업은 모두 `now`를 인자로 받는다.

use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Instant;

use bytes::Bytes;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::auth::AuthorizationRegistry;
use crate::config::Config;
use crate::error::ResultCode;
use crate::host::HostTable;
use crate::message::{AbortMessage, ConfirmPacket, DataPacket, FileRequest, XferMessage};
use crate::packet::decode_packet_num;
use crate::stats::XferStats;
use crate::storage::{verify_cache_filename, AssetId, AssetType, PathRoot, XferStorage};
use crate::throttle::AckThrottle;
use crate::xfer::{
    ConfirmOutcome, Direction, ReceiveOutcome, RemoteSource, TransferId, Xfer, XferCallback,
    XferState, XferTarget,
};
use crate::{Error, Result};

/// 확인 패킷 하나의 스로틀 비용 (bits, 1000바이트 패킷 기준)
pub const ACK_COST_BITS: f64 = 8000.0;

/// 캐시 디렉터리를 직접 지정하던 구버전 파일명 접두사
const LEGACY_CACHE_PREFIX: &str = "data/";

/// 디스패치 계층으로 나가는 작업
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// 메시지 송신
    Message {
        host: SocketAddr,
        message: XferMessage,
    },

    /// 회선 종료 (하드 리밋 위반)
    DisableCircuit(SocketAddr),
}

/// 스로틀로 보류된 확인
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XferAckInfo {
    pub id: TransferId,
    pub packet: u32,
    pub host: SocketAddr,
}

/// Xfer 관리자
pub struct XferManager<S: XferStorage> {
    config: Config,
    storage: S,

    send_list: VecDeque<Xfer>,
    receive_list: VecDeque<Xfer>,

    hosts: HostTable,

    /// 보류된 확인 (FIFO)
    ack_queue: VecDeque<XferAckInfo>,
    ack_throttle: AckThrottle,

    /// 송신 승인 (원격 요청으로 나갈 수 있는 파일명)
    expected_transfers: AuthorizationRegistry,

    /// 요청 승인 (로컬에서 요청해도 되는 파일명)
    expected_requests: AuthorizationRegistry,

    /// 하드 리밋 위반 시에도 회선을 끊지 않는 호스트
    trusted_hosts: HashSet<SocketAddr>,

    next_id: TransferId,

    outgoing: VecDeque<Outgoing>,

    stats: XferStats,
}

impl<S: XferStorage> XferManager<S> {
    pub fn new(config: Config, storage: S) -> Self {
        let mut manager = Self {
            config,
            storage,
            send_list: VecDeque::new(),
            receive_list: VecDeque::new(),
            hosts: HostTable::new(),
            ack_queue: VecDeque::new(),
            ack_throttle: AckThrottle::new(0.0),
            expected_transfers: AuthorizationRegistry::new(),
            expected_requests: AuthorizationRegistry::new(),
            trusted_hosts: HashSet::new(),
            next_id: u64::from(rand::thread_rng().gen::<u32>()) + 1,
            outgoing: VecDeque::new(),
            stats: XferStats::new(),
        };
        let rate = manager.clamp_ack_rate(manager.config.ack_throttle_bps);
        manager.config.ack_throttle_bps = rate;
        manager.ack_throttle = AckThrottle::new(rate);
        manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn stats(&self) -> &XferStats {
        &self.stats
    }

    fn next_id(&mut self) -> TransferId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        id
    }

    // ───────────────────────────── 설정 ─────────────────────────────

    pub fn set_max_outgoing_xfers_per_circuit(&mut self, max: usize) {
        self.config.max_outgoing_xfers_per_circuit = max;
    }

    pub fn set_hard_limit_outgoing_xfers_per_circuit(&mut self, max: usize) {
        self.config.hard_limit_outgoing_xfers_per_circuit = max;
    }

    pub fn set_max_incoming_xfers(&mut self, max: usize) {
        self.config.max_incoming_xfers = max;
    }

    pub fn set_use_ack_throttling(&mut self, enabled: bool) {
        self.config.use_ack_throttling = enabled;
    }

    /// 확인 스로틀 속도 설정 (최저 속도 아래로는 내려가지 않음)
    pub fn set_ack_throttle_bps(&mut self, bps: f64, now: Instant) {
        let rate = self.clamp_ack_rate(bps);
        debug!(
            "ack throttle min rate: {:.0} - actual rate: {:.0}",
            self.ack_throttle_floor(),
            rate
        );
        self.config.ack_throttle_bps = rate;
        self.ack_throttle.set_rate(rate, now);
    }

    /// 모든 수신이 타임아웃 간격으로 확인할 수 있는 최저 속도
    fn ack_throttle_floor(&self) -> f64 {
        let timeout = self.config.packet_timeout().as_secs_f64().max(0.001);
        1.1 * ACK_COST_BITS * self.config.max_incoming_xfers as f64 / timeout
    }

    fn clamp_ack_rate(&self, bps: f64) -> f64 {
        bps.max(self.ack_throttle_floor())
    }

    pub fn set_trusted_host(&mut self, host: SocketAddr, trusted: bool) {
        if trusted {
            self.trusted_hosts.insert(host);
        } else {
            self.trusted_hosts.remove(&host);
        }
    }

    // ───────────────────────────── 승인 ─────────────────────────────

    /// 원격 요청으로 보낼 파일 승인 (1회용)
    pub fn expect_file_for_transfer(&mut self, filename: &str) {
        self.expected_transfers.expect(filename);
    }

    pub fn validate_file_for_transfer(&mut self, filename: &str) -> bool {
        self.expected_transfers.validate(filename)
    }

    /// 로컬에서 요청할 파일 승인 (1회용)
    pub fn expect_file_for_request(&mut self, filename: &str) {
        self.expected_requests.expect(filename);
    }

    pub fn validate_file_for_request(&mut self, filename: &str) -> bool {
        self.expected_requests.validate(filename)
    }

    // ───────────────────────────── 조회 ─────────────────────────────

    pub fn num_active_xfers(&self, host: &SocketAddr) -> usize {
        self.hosts.num_active_xfers(host)
    }

    pub fn num_pending_xfers(&self, host: &SocketAddr) -> usize {
        self.hosts.num_pending_xfers(host)
    }

    /// 송신 요청이 하드 리밋의 플러드 비율에 도달했는지
    pub fn is_host_flooded(&self, host: &SocketAddr) -> bool {
        let hard_limit = self.config.hard_limit_outgoing_xfers_per_circuit;
        if hard_limit == 0 {
            return false;
        }
        let threshold = (hard_limit * self.config.flood_threshold_percent / 100).max(1);
        self.hosts.outgoing(host).total() >= threshold
    }

    pub fn print_host_status(&self) {
        self.hosts.print();
    }

    pub fn find_xfer_by_id(&self, id: TransferId, direction: Direction) -> Option<&Xfer> {
        self.list(direction).iter().find(|x| x.id() == id)
    }

    pub fn xfers(&self, direction: Direction) -> impl Iterator<Item = &Xfer> + '_ {
        self.list(direction).iter()
    }

    pub fn ack_queue_len(&self) -> usize {
        self.ack_queue.len()
    }

    // ───────────────────────────── 출력 ─────────────────────────────

    pub fn poll_outgoing(&mut self) -> Option<Outgoing> {
        self.outgoing.pop_front()
    }

    pub fn drain_outgoing(&mut self) -> Vec<Outgoing> {
        self.outgoing.drain(..).collect()
    }

    pub fn has_outgoing(&self) -> bool {
        !self.outgoing.is_empty()
    }

    fn send_message(&mut self, host: SocketAddr, message: XferMessage) {
        self.outgoing.push_back(Outgoing::Message { host, message });
    }

    fn send_data(&mut self, host: SocketAddr, packet: DataPacket, resend: bool) {
        if resend {
            self.stats.packets_resent += 1;
        } else {
            self.stats.packets_sent += 1;
            self.stats.bytes_sent += packet.payload.len() as u64;
        }
        self.send_message(host, XferMessage::DataPacket(packet));
    }

    fn send_abort(&mut self, host: SocketAddr, id: TransferId, result: ResultCode) {
        self.send_message(
            host,
            XferMessage::Abort(AbortMessage {
                id,
                result: result.code(),
            }),
        );
    }

    /// 확인 패킷 즉시 송신
    pub fn send_confirm_packet(&mut self, id: TransferId, packet: u32, host: SocketAddr) {
        self.stats.confirms_sent += 1;
        self.send_message(host, XferMessage::ConfirmPacket(ConfirmPacket { id, packet }));
    }

    // ───────────────────────────── 목록 ─────────────────────────────

    fn list(&self, direction: Direction) -> &VecDeque<Xfer> {
        match direction {
            Direction::Send => &self.send_list,
            Direction::Receive => &self.receive_list,
        }
    }

    fn list_mut(&mut self, direction: Direction) -> &mut VecDeque<Xfer> {
        match direction {
            Direction::Send => &mut self.send_list,
            Direction::Receive => &mut self.receive_list,
        }
    }

    fn position(&self, id: TransferId, direction: Direction) -> Option<usize> {
        self.list(direction).iter().position(|x| x.id() == id)
    }

    fn ids_for_host(&self, host: SocketAddr, direction: Direction) -> Vec<TransferId> {
        self.list(direction)
            .iter()
            .filter(|x| x.remote_host() == host)
            .map(Xfer::id)
            .collect()
    }

    /// 상태에 해당하는 호스트 카운터 변경
    fn tally(&mut self, host: SocketAddr, direction: Direction, state: XferState, delta: isize) {
        match state {
            XferState::Active | XferState::Completing => {
                self.hosts.change_num_active_xfers(host, direction, delta)
            }
            XferState::Pending | XferState::Registered => {
                self.hosts.change_num_pending_xfers(host, direction, delta)
            }
            _ => {}
        }
    }

    /// 목록에 추가. 우선순위는 앞쪽, 나머지는 뒤쪽.
    fn add_to_list(&mut self, xfer: Xfer, direction: Direction, is_priority: bool) {
        self.tally(xfer.remote_host(), direction, xfer.state(), 1);
        let list = self.list_mut(direction);
        if is_priority {
            list.push_front(xfer);
        } else {
            list.push_back(xfer);
        }
    }

    /// 목록에서 제거하고 호스트 카운터 반영
    fn remove_xfer(&mut self, id: TransferId, direction: Direction) -> Option<Xfer> {
        let index = self.position(id, direction)?;
        let xfer = self.list_mut(direction).remove(index)?;
        self.tally(xfer.remote_host(), direction, xfer.state(), -1);
        Some(xfer)
    }

    /// 종료 처리: 목록 제거, 콜백 1회 호출
    fn terminate(
        &mut self,
        id: TransferId,
        direction: Direction,
        state: XferState,
        result: ResultCode,
    ) -> bool {
        let Some(mut xfer) = self.remove_xfer(id, direction) else {
            return false;
        };
        if direction == Direction::Receive && state != XferState::Done {
            xfer.discard_partial(&mut self.storage);
        }

        match state {
            XferState::Done => {
                self.stats.completed += 1;
                info!(
                    "xfer {} {} with {} complete ({} bytes)",
                    id,
                    xfer.display_name(),
                    xfer.remote_host(),
                    xfer.bytes_transferred()
                );
            }
            XferState::Aborted => {
                self.stats.aborted += 1;
                info!("xfer {} {} aborted: {}", id, xfer.display_name(), result);
            }
            _ => {
                self.stats.failed += 1;
                warn!("xfer {} {} failed: {}", id, xfer.display_name(), result);
            }
        }
        xfer.complete(state, result);
        true
    }

    // ───────────────────────────── 요청 ─────────────────────────────

    /// 원격 호스트에 파일 송신 요청
    #[allow(clippy::too_many_arguments)]
    pub fn request_file(
        &mut self,
        local_path: impl Into<PathBuf>,
        remote_path: &str,
        remote_root: PathRoot,
        remote_host: SocketAddr,
        delete_remote_on_completion: bool,
        callback: Option<XferCallback>,
        is_priority: bool,
        use_big_packets: bool,
    ) -> Result<TransferId> {
        if remote_path.is_empty() {
            return Err(Error::EmptyRemotePath);
        }
        let local_path = local_path.into();

        // 이전 세션에서 남은 임시 파일 정리
        if delete_remote_on_completion
            && remote_path.ends_with(".tmp")
            && self.storage.file_exists(&local_path)
        {
            if let Err(e) = self.storage.remove_file(&local_path) {
                warn!("stale {} not removed: {}", local_path.display(), e);
            }
        }

        let id = self.next_id();
        let xfer = Xfer::new_receive(
            id,
            remote_host,
            XferTarget::File { path: local_path },
            RemoteSource::File {
                path: remote_path.to_owned(),
                root: remote_root,
                delete_on_completion: delete_remote_on_completion,
            },
            self.config.chunk_size_for(use_big_packets),
            is_priority,
            use_big_packets,
            callback,
        );
        debug!("requesting {} from {} as xfer {}", remote_path, remote_host, id);
        self.add_to_list(xfer, Direction::Receive, is_priority);
        self.start_pending_downloads();
        Ok(id)
    }

    /// 원격 호스트에 에셋 송신 요청
    pub fn request_vfile(
        &mut self,
        local_id: AssetId,
        remote_id: AssetId,
        asset_type: AssetType,
        remote_host: SocketAddr,
        callback: Option<XferCallback>,
        is_priority: bool,
    ) -> TransferId {
        let id = self.next_id();
        let xfer = Xfer::new_receive(
            id,
            remote_host,
            XferTarget::Asset {
                id: local_id,
                asset_type,
            },
            RemoteSource::Asset {
                id: remote_id,
                asset_type,
            },
            self.config.chunk_size,
            is_priority,
            false,
            callback,
        );
        debug!(
            "requesting asset {}:{:?} from {} as xfer {}",
            remote_id, asset_type, remote_host, id
        );
        self.add_to_list(xfer, Direction::Receive, is_priority);
        self.start_pending_downloads();
        id
    }

    /// 원격에 등록된 메모리 송신을 ID로 요청
    pub fn request_registered(
        &mut self,
        id: TransferId,
        local_path: impl Into<PathBuf>,
        remote_host: SocketAddr,
        callback: Option<XferCallback>,
        is_priority: bool,
    ) -> Result<TransferId> {
        if self.position(id, Direction::Receive).is_some() {
            return Err(Error::DuplicateTransferId(id));
        }
        let xfer = Xfer::new_receive(
            id,
            remote_host,
            XferTarget::File {
                path: local_path.into(),
            },
            RemoteSource::Registered,
            self.config.chunk_size,
            is_priority,
            false,
            callback,
        );
        self.add_to_list(xfer, Direction::Receive, is_priority);
        self.start_pending_downloads();
        Ok(id)
    }

    /// 메모리 버퍼 송신 등록. 원격이 이 ID로 요청하면 전송 시작.
    pub fn register_memory_send(
        &mut self,
        data: Bytes,
        remote_host: SocketAddr,
        callback: Option<XferCallback>,
        now: Instant,
    ) -> TransferId {
        let id = self.next_id();
        let xfer = Xfer::new_memory_send(
            id,
            remote_host,
            data,
            self.config.chunk_size,
            callback,
            now,
        );
        info!("registered memory xfer {} for {}", id, remote_host);
        self.add_to_list(xfer, Direction::Send, false);
        id
    }

    /// 로컬 요청 취소
    pub fn abort_request_by_id(&mut self, id: TransferId, result: ResultCode) -> bool {
        let Some(xfer) = self.find_xfer_by_id(id, Direction::Receive) else {
            debug!("abort for unknown xfer {}", id);
            return false;
        };
        let host = xfer.remote_host();
        if xfer.state().is_active() {
            self.send_abort(host, id, result);
        }
        self.terminate(id, Direction::Receive, XferState::Aborted, result);
        self.start_pending_downloads();
        true
    }

    // ───────────────────────────── 스윕 ─────────────────────────────

    /// 대기 다운로드 승격 (전체 수신 상한까지)
    pub fn start_pending_downloads(&mut self) {
        let active = self
            .receive_list
            .iter()
            .filter(|x| x.state().is_active())
            .count();
        let mut slots = self.config.max_incoming_xfers.saturating_sub(active);
        if slots == 0 {
            return;
        }

        let pending: Vec<TransferId> = self
            .receive_list
            .iter()
            .filter(|x| x.state() == XferState::Pending)
            .map(Xfer::id)
            .collect();
        if pending.is_empty() {
            return;
        }
        debug!(
            "Xfer in progress: {} - xfer pending: {} - starting: {}",
            active,
            pending.len(),
            slots.min(pending.len())
        );

        for id in pending {
            if slots == 0 {
                break;
            }
            let Some(index) = self.position(id, Direction::Receive) else {
                continue;
            };
            let xfer = &mut self.receive_list[index];
            let host = xfer.remote_host();
            match xfer.start_download(&mut self.storage) {
                Ok(request) => {
                    self.hosts.promote(host, Direction::Receive);
                    self.send_message(host, XferMessage::FileRequest(request));
                    slots -= 1;
                }
                Err(e) => {
                    warn!("xfer {} could not start: {}", id, e);
                    self.terminate(id, Direction::Receive, XferState::Failed, e.result_code());
                }
            }
        }
    }

    /// 송신 목록 스윕: 재전송, 등록 만료, 대기 송신 승격, 보류된 확인 송출
    pub fn retransmit_unacked_packets(&mut self, now: Instant) {
        let timeout = self.config.packet_timeout();
        let registration_timeout = self.config.registration_timeout();
        let retry_limit = self.config.packet_retry_limit;
        let max_outgoing = self.config.max_outgoing_xfers_per_circuit;

        let ids: Vec<TransferId> = self.send_list.iter().map(Xfer::id).collect();
        for id in ids {
            let Some(index) = self.position(id, Direction::Send) else {
                continue;
            };
            let xfer = &mut self.send_list[index];
            let host = xfer.remote_host();

            if xfer.is_ack_expired(now, timeout) {
                let retries = xfer.outstanding().map_or(0, |o| o.attempts.saturating_sub(1));
                if retries > retry_limit {
                    info!(
                        "Dropping xfer {}:{} packet retransmit limit exceeded, xfer dropped",
                        host, id
                    );
                    self.send_abort(host, id, ResultCode::Timeout);
                    self.terminate(id, Direction::Send, XferState::Failed, ResultCode::Timeout);
                    continue;
                }
                if let Some(packet) = xfer.retransmit(now) {
                    info!(
                        "Resending xfer {}:{} packet unconfirmed after {:?}, packet: {}",
                        host,
                        id,
                        timeout,
                        decode_packet_num(packet.packet)
                    );
                    self.send_data(host, packet, true);
                }
            } else if xfer.is_registration_expired(now, registration_timeout) {
                info!("Registered xfer {} never requested, xfer dropped", id);
                self.terminate(id, Direction::Send, XferState::Failed, ResultCode::Timeout);
            } else if xfer.state() == XferState::Pending
                && self.hosts.outgoing(&host).active < max_outgoing
            {
                debug!("Moving pending xfer {} to active", id);
                self.activate_send(id, now);
            }
        }

        self.drain_ack_queue(now);
    }

    /// 주기 작업 (노드 타이머에서 호출)
    pub fn tick(&mut self, now: Instant) {
        self.retransmit_unacked_packets(now);
        self.start_pending_downloads();
    }

    /// 회선 종료: 해당 호스트의 모든 전송 실패 처리
    pub fn circuit_gone(&mut self, host: SocketAddr) {
        for direction in [Direction::Receive, Direction::Send] {
            let ids = self.ids_for_host(host, direction);
            if !ids.is_empty() {
                warn!("circuit to {} gone, dropping {} {:?} xfers", host, ids.len(), direction);
            }
            for id in ids {
                self.terminate(id, direction, XferState::Failed, ResultCode::CircuitGone);
            }
        }
        self.ack_queue.retain(|ack| ack.host != host);
        self.start_pending_downloads();
    }

    // ───────────────────────────── 메시지 처리 ─────────────────────────────

    /// 수신 메시지 디스패치
    pub fn handle_message(&mut self, host: SocketAddr, message: XferMessage, now: Instant) {
        match message {
            XferMessage::FileRequest(request) => self.process_file_request(host, request, now),
            XferMessage::DataPacket(packet) => self.process_receive_data(host, packet, now),
            XferMessage::ConfirmPacket(confirm) => self.process_confirmation(host, confirm, now),
            XferMessage::Abort(abort) => self.process_abort(host, abort),
        }
    }

    /// 데이터 패킷 (수신측)
    pub fn process_receive_data(&mut self, host: SocketAddr, packet: DataPacket, now: Instant) {
        let id = packet.id;
        let Some(index) = self.position(id, Direction::Receive) else {
            warn!("received xfer data from {} for non-existent xfer id: {}", host, id);
            self.stats.unknown_messages += 1;
            return;
        };

        let threshold = self.config.receive_flush_threshold;
        let xfer = &mut self.receive_list[index];
        if xfer.remote_host() != host {
            warn!("xfer {} data from {} but requested from {}", id, host, xfer.remote_host());
            return;
        }
        if !xfer.state().is_active() {
            debug!("xfer {} not active, dropping data packet", id);
            return;
        }

        let before = xfer.bytes_transferred();
        let outcome = xfer.receive_data(&packet, &mut self.storage, threshold);
        let received = xfer.bytes_transferred() - before;

        match outcome {
            Ok(ReceiveOutcome::Accepted { seq, last }) => {
                self.stats.packets_received += 1;
                self.stats.bytes_received += received;
                self.confirm_or_queue(id, seq, host, now);
                if last {
                    self.finish_download(id);
                    self.start_pending_downloads();
                }
            }
            Ok(ReceiveOutcome::Duplicate { seq }) => {
                // 확인이 유실됨
                info!("Reconfirming xfer {}:{} packet {}", host, id, seq);
                self.stats.duplicate_packets += 1;
                self.send_confirm_packet(id, seq, host);
            }
            Ok(ReceiveOutcome::OutOfWindow { seq, expected }) => {
                info!(
                    "Ignoring xfer {}:{} received packet {}; expecting {}",
                    host, id, seq, expected
                );
                self.stats.out_of_window_packets += 1;
            }
            Err(e) => {
                let result = e.result_code();
                warn!("xfer {} from {} could not store data: {}", id, host, e);
                self.send_abort(host, id, result);
                self.terminate(id, Direction::Receive, XferState::Failed, result);
                self.start_pending_downloads();
            }
        }
    }

    fn finish_download(&mut self, id: TransferId) {
        let Some(index) = self.position(id, Direction::Receive) else {
            return;
        };
        let xfer = &mut self.receive_list[index];
        match xfer.finish_receive(&mut self.storage) {
            Ok(()) => {
                self.terminate(id, Direction::Receive, XferState::Done, ResultCode::Ok);
            }
            Err(e) => {
                warn!("xfer {} could not be finalized: {}", id, e);
                self.terminate(id, Direction::Receive, XferState::Failed, e.result_code());
            }
        }
    }

    /// 스로틀 여부에 따라 확인 즉시 송신 또는 보류
    fn confirm_or_queue(&mut self, id: TransferId, packet: u32, host: SocketAddr, now: Instant) {
        if !self.config.use_ack_throttling {
            self.send_confirm_packet(id, packet, host);
            return;
        }
        if self.ack_queue.is_empty() && self.ack_throttle.try_admit(ACK_COST_BITS, now) {
            self.send_confirm_packet(id, packet, host);
            return;
        }
        self.stats.confirms_queued += 1;
        self.ack_queue.push_back(XferAckInfo { id, packet, host });
    }

    /// 예산이 허용하는 만큼 보류된 확인 송출
    fn drain_ack_queue(&mut self, now: Instant) {
        while let Some(ack) = self.ack_queue.front().copied() {
            if self.ack_throttle.check_overflow(ACK_COST_BITS, now) {
                break;
            }
            debug!("Confirm packet queue length: {}", self.ack_queue.len());
            self.ack_queue.pop_front();
            self.send_confirm_packet(ack.id, ack.packet, ack.host);
            self.ack_throttle.throttle_overflow(ACK_COST_BITS, now);
        }
    }

    /// 전송 요청 (송신측)
    pub fn process_file_request(&mut self, host: SocketAddr, request: FileRequest, now: Instant) {
        let id = request.id;
        info!("xfer request id: {} from {}", id, host);

        let asset = request.asset.filter(|a| !a.id.is_nil());
        let is_memory = asset.is_none() && request.filename.is_empty();
        if self
            .find_xfer_by_id(id, Direction::Send)
            .is_some_and(|x| !is_memory || x.state() != XferState::Registered)
        {
            debug!("xfer {} already in progress, ignoring request", id);
            return;
        }

        let target = if let Some(asset) = asset {
            let Some(asset_type) = AssetType::from_i16(asset.asset_type) else {
                warn!(
                    "Invalid type for xfer request: {}:{} from {}",
                    asset.id, asset.asset_type, host
                );
                self.send_abort(host, id, ResultCode::FileNotFound);
                return;
            };
            info!("starting vfile transfer: {},{:?} to {}", asset.id, asset_type, host);
            XferTarget::Asset {
                id: asset.id,
                asset_type,
            }
        } else if !request.filename.is_empty() {
            let root = PathRoot::from_wire(request.path_root);
            let Some(path) = self.resolve_requested_file(&request.filename, root) else {
                self.send_abort(host, id, ResultCode::InsufficientPermissions);
                return;
            };
            info!("starting file transfer: {} to {}", path.display(), host);
            XferTarget::File { path }
        } else {
            self.start_memory_send(host, id, now);
            return;
        };

        let delete_on_completion =
            request.delete_on_completion && matches!(target, XferTarget::File { .. });
        let mut xfer = Xfer::new_send(
            id,
            host,
            target,
            self.config.chunk_size_for(request.use_big_packets),
            delete_on_completion,
        );
        if let Err(e) = xfer.start_send(&mut self.storage) {
            let result = e.result_code();
            warn!("Aborting xfer {} to {} with error: {}", id, host, e);
            self.stats.failed += 1;
            self.send_abort(host, id, result);
            return;
        }

        // 새 요청은 앞쪽
        self.add_to_list(xfer, Direction::Send, true);
        self.admit_send(id, host, now);
    }

    /// 원격이 요청한 파일명 검증 후 로컬 경로로 확장
    fn resolve_requested_file(&mut self, filename: &str, root: PathRoot) -> Option<PathBuf> {
        let mut name = filename;
        let mut root = root;
        if root == PathRoot::None {
            if let Some(stripped) = name.strip_prefix(LEGACY_CACHE_PREFIX) {
                name = stripped;
                root = PathRoot::Cache;
            }
        }

        match root {
            PathRoot::None => {
                if !self.validate_file_for_transfer(name) {
                    warn!("SECURITY: Unapproved filename '{}'", name);
                    return None;
                }
            }
            PathRoot::Cache => {
                if !verify_cache_filename(name) {
                    warn!("SECURITY: Illegal cache filename '{}'", name);
                    return None;
                }
            }
            PathRoot::Other(value) => {
                warn!("SECURITY: Restricted file dir enum: {}", value);
                return None;
            }
        }

        match self.storage.expand_path(root, name) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("SECURITY: {}", e);
                None
            }
        }
    }

    /// 등록된 메모리 송신 시작
    fn start_memory_send(&mut self, host: SocketAddr, id: TransferId, now: Instant) {
        let index = self.position(id, Direction::Send).filter(|&i| {
            let xfer = &self.send_list[i];
            xfer.state() == XferState::Registered && xfer.remote_host() == host
        });
        let Some(index) = index else {
            warn!("memory xfer {} for {} not found", id, host);
            self.send_abort(host, id, ResultCode::FileNotFound);
            return;
        };

        info!("Starting memory transfer: {} to {}", id, host);
        let xfer = &mut self.send_list[index];
        if let Err(e) = xfer.start_send(&mut self.storage) {
            let result = e.result_code();
            self.send_abort(host, id, result);
            self.terminate(id, Direction::Send, XferState::Failed, result);
            return;
        }
        self.admit_send(id, host, now);
    }

    /// 회선 승인 제어. 호출 시점에 xfer는 대기 카운터에 포함되어 있다.
    fn admit_send(&mut self, id: TransferId, host: SocketAddr, now: Instant) {
        let counts = self.hosts.outgoing(&host);
        let pending_ahead = counts.pending.saturating_sub(1);

        if counts.active < self.config.max_outgoing_xfers_per_circuit {
            debug!("Starting xfer {} immediately", id);
            self.activate_send(id, now);
            return;
        }

        if let Some(index) = self.position(id, Direction::Send) {
            self.send_list[index].close_source();
        }

        let hard_limit = self.config.hard_limit_outgoing_xfers_per_circuit;
        if hard_limit == 0 || counts.active + pending_ahead < hard_limit {
            info!(
                "Queueing xfer request id {}, {} active and {} pending ahead of this one",
                id, counts.active, pending_ahead
            );
        } else if self.trusted_hosts.contains(&host) {
            warn!(
                "Trusted circuit to {} has too many xfer requests in the queue: {} active and {} pending ahead of this one",
                host, counts.active, pending_ahead
            );
        } else {
            warn!(
                "Killing circuit to {} for having too many xfer requests queued: {} active and {} pending ahead of this one",
                host, counts.active, pending_ahead
            );
            self.outgoing.push_back(Outgoing::DisableCircuit(host));
            self.circuit_gone(host);
        }
    }

    /// 대기 송신 활성화 후 첫 패킷 송신
    fn activate_send(&mut self, id: TransferId, now: Instant) {
        let Some(index) = self.position(id, Direction::Send) else {
            return;
        };
        let xfer = &mut self.send_list[index];
        let host = xfer.remote_host();
        match xfer.activate(&mut self.storage, now) {
            Ok(packet) => {
                self.hosts.promote(host, Direction::Send);
                self.send_data(host, packet, false);
            }
            Err(e) => {
                let result = e.result_code();
                warn!("Removing failed xfer to {} for id {}: {}", host, id, e);
                self.send_abort(host, id, result);
                self.terminate(id, Direction::Send, XferState::Failed, result);
            }
        }
    }

    /// 패킷 확인 (송신측)
    pub fn process_confirmation(&mut self, host: SocketAddr, confirm: ConfirmPacket, now: Instant) {
        let id = confirm.id;
        let Some(index) = self.position(id, Direction::Send) else {
            debug!("confirm from {} for unknown xfer {}", host, id);
            self.stats.unknown_messages += 1;
            return;
        };

        let xfer = &mut self.send_list[index];
        if xfer.remote_host() != host {
            warn!("xfer {} confirm from {} but sending to {}", id, host, xfer.remote_host());
            return;
        }

        match xfer.on_confirm(confirm.packet) {
            ConfirmOutcome::Advanced => match xfer.next_packet(&mut self.storage, now) {
                Ok(packet) => self.send_data(host, packet, false),
                Err(e) => {
                    let result = e.result_code();
                    warn!("xfer {} to {} read failed: {}", id, host, e);
                    self.send_abort(host, id, result);
                    self.terminate(id, Direction::Send, XferState::Failed, result);
                }
            },
            ConfirmOutcome::Finished => {
                if xfer.delete_on_completion() {
                    if let XferTarget::File { path } = xfer.target() {
                        if let Err(e) = self.storage.remove_file(path) {
                            warn!("{} not deleted after xfer {}: {}", path.display(), id, e);
                        }
                    }
                }
                self.terminate(id, Direction::Send, XferState::Done, ResultCode::Ok);
            }
            ConfirmOutcome::Ignored => {
                debug!("Ignoring confirm {} for xfer {}", confirm.packet, id);
            }
        }
    }

    /// 원격 중단 (양쪽 목록 모두 확인)
    pub fn process_abort(&mut self, host: SocketAddr, abort: AbortMessage) {
        let result = ResultCode::from_code(abort.result);
        for direction in [Direction::Receive, Direction::Send] {
            let matches = self
                .find_xfer_by_id(abort.id, direction)
                .is_some_and(|x| x.remote_host() == host);
            if matches {
                info!("xfer {} aborted by {}: {}", abort.id, host, result);
                self.terminate(abort.id, direction, XferState::Aborted, result);
                if direction == Direction::Receive {
                    self.start_pending_downloads();
                }
                return;
            }
        }
        debug!("abort from {} for unknown xfer {}", host, abort.id);
        self.stats.unknown_messages += 1;
    }
}
