//! 전송 단위 상태 머신
//!
//! Xfer 하나는 한 방향 전송 하나를 나타낸다.
//! - 송신: stop-and-wait, 미확인 패킷 하나와 재전송 기록을 보관
//! - 수신: 순번대로 데이터를 받아 버퍼링 후 저장소로 내보냄
//!
//! ```text
//! Registered ─┐
//!             ▼
//!          Pending → Active → Completing → Done
//!             └────────┴──────────┴──→ Aborted | Failed
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::error::{ExtStatus, ResultCode};
use crate::message::{AssetRef, DataPacket, FileRequest};
use crate::packet::{
    decode_packet_num, encode_first_payload, encode_packet_num, is_last_packet,
    split_first_payload, RawPacketNum,
};
use crate::storage::{AssetId, AssetType, PathRoot, XferStorage};
use crate::{Error, Result};

/// 전송 ID (세션 내 유일)
pub type TransferId = u64;

/// 전송 방향
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Send,
    Receive,
}

/// 전송 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XferState {
    /// 메모리 송신 등록, 원격 요청 대기
    Registered,
    /// 승인 슬롯 대기
    Pending,
    Active,
    /// 마지막 패킷 송신(확인 대기) 또는 수신(저장 중)
    Completing,
    Done,
    Aborted,
    Failed,
}

impl XferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, XferState::Done | XferState::Aborted | XferState::Failed)
    }

    /// 활성 슬롯을 차지하는 상태
    pub fn is_active(self) -> bool {
        matches!(self, XferState::Active | XferState::Completing)
    }
}

/// 완료 통지
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XferOutcome {
    pub id: TransferId,
    pub result: ResultCode,
    pub ext_status: ExtStatus,
}

/// 완료 콜백 (정확히 한 번 호출)
pub type XferCallback = Box<dyn FnOnce(XferOutcome) + Send>;

/// 애플리케이션 컨텍스트를 묶은 콜백 생성
pub fn callback_with_context<C, F>(context: C, f: F) -> XferCallback
where
    C: Send + 'static,
    F: FnOnce(C, XferOutcome) + Send + 'static,
{
    Box::new(move |outcome| f(context, outcome))
}

/// 채널로 완료를 받는 콜백 생성
pub fn completion_channel() -> (XferCallback, crossbeam_channel::Receiver<XferOutcome>) {
    let (tx, rx) = crossbeam_channel::bounded(1);
    let callback: XferCallback = Box::new(move |outcome| {
        let _ = tx.send(outcome);
    });
    (callback, rx)
}

/// 로컬 페이로드 위치
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XferTarget {
    File { path: PathBuf },
    Asset { id: AssetId, asset_type: AssetType },
    /// 등록된 메모리 버퍼 (송신 전용)
    Memory,
}

/// 수신측이 요청할 원격 페이로드
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteSource {
    File {
        path: String,
        root: PathRoot,
        delete_on_completion: bool,
    },
    Asset {
        id: AssetId,
        asset_type: AssetType,
    },
    /// 원격에 등록된 메모리 송신 (ID로 요청)
    Registered,
}

/// 미확인 송신 패킷
#[derive(Debug, Clone)]
pub struct OutstandingPacket {
    pub packet: RawPacketNum,
    pub payload: Bytes,
    pub sent_at: Instant,
    /// 송신 횟수 (1 = 첫 송신)
    pub attempts: u32,
}

/// 수신 패킷 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// 기대한 패킷. 확인 필요.
    Accepted { seq: u32, last: bool },
    /// 직전 패킷 재전송 (확인이 유실됨)
    Duplicate { seq: u32 },
    /// 윈도우 밖
    OutOfWindow { seq: u32, expected: u32 },
}

/// 확인 패킷 처리 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// 다음 패킷 송신 가능
    Advanced,
    /// 마지막 패킷 확인됨
    Finished,
    /// 중복 또는 예상 밖 확인
    Ignored,
}

/// 전송 하나
pub struct Xfer {
    id: TransferId,
    remote_host: SocketAddr,
    direction: Direction,
    state: XferState,
    target: XferTarget,

    /// 수신측 요청 내용
    remote: Option<RemoteSource>,

    is_priority: bool,
    use_big_packets: bool,
    chunk_size: usize,

    /// 송신 완료 후 로컬 원본 삭제
    delete_on_completion: bool,

    /// 송신: 미확인(또는 다음) 패킷 순번, 수신: 기대 순번
    packet_num: u32,

    /// 0번 패킷 이후 확정
    total_size: Option<u64>,

    /// 송신: 읽은 바이트, 수신: 받은 바이트
    offset: u64,

    /// 열린 원본 (에셋/메모리)
    source: Option<Bytes>,
    source_open: bool,

    outstanding: Option<OutstandingPacket>,

    /// 수신 버퍼와 이미 내보낸 바이트
    buffer: BytesMut,
    flushed: u64,

    registered_at: Option<Instant>,

    callback: Option<XferCallback>,
}

impl fmt::Debug for Xfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Xfer")
            .field("id", &self.id)
            .field("remote_host", &self.remote_host)
            .field("direction", &self.direction)
            .field("state", &self.state)
            .field("target", &self.target)
            .field("packet_num", &self.packet_num)
            .field("total_size", &self.total_size)
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl Xfer {
    /// 수신 전송 생성 (Pending)
    #[allow(clippy::too_many_arguments)]
    pub fn new_receive(
        id: TransferId,
        remote_host: SocketAddr,
        target: XferTarget,
        remote: RemoteSource,
        chunk_size: usize,
        is_priority: bool,
        use_big_packets: bool,
        callback: Option<XferCallback>,
    ) -> Self {
        Self::new(id, remote_host, Direction::Receive, target, chunk_size, callback)
            .with_remote(remote, is_priority, use_big_packets)
    }

    /// 원격 요청에 의한 송신 전송 생성 (Pending)
    pub fn new_send(
        id: TransferId,
        remote_host: SocketAddr,
        target: XferTarget,
        chunk_size: usize,
        delete_on_completion: bool,
    ) -> Self {
        let mut xfer = Self::new(id, remote_host, Direction::Send, target, chunk_size, None);
        xfer.delete_on_completion = delete_on_completion;
        xfer
    }

    /// 메모리 송신 등록 (Registered)
    pub fn new_memory_send(
        id: TransferId,
        remote_host: SocketAddr,
        data: Bytes,
        chunk_size: usize,
        callback: Option<XferCallback>,
        now: Instant,
    ) -> Self {
        let mut xfer = Self::new(
            id,
            remote_host,
            Direction::Send,
            XferTarget::Memory,
            chunk_size,
            callback,
        );
        xfer.state = XferState::Registered;
        xfer.total_size = Some(data.len() as u64);
        xfer.source = Some(data);
        xfer.source_open = true;
        xfer.registered_at = Some(now);
        xfer
    }

    fn new(
        id: TransferId,
        remote_host: SocketAddr,
        direction: Direction,
        target: XferTarget,
        chunk_size: usize,
        callback: Option<XferCallback>,
    ) -> Self {
        Self {
            id,
            remote_host,
            direction,
            state: XferState::Pending,
            target,
            remote: None,
            is_priority: false,
            use_big_packets: false,
            chunk_size: chunk_size.max(1),
            delete_on_completion: false,
            packet_num: 0,
            total_size: None,
            offset: 0,
            source: None,
            source_open: false,
            outstanding: None,
            buffer: BytesMut::new(),
            flushed: 0,
            registered_at: None,
            callback,
        }
    }

    fn with_remote(mut self, remote: RemoteSource, is_priority: bool, use_big_packets: bool) -> Self {
        self.remote = Some(remote);
        self.is_priority = is_priority;
        self.use_big_packets = use_big_packets;
        self
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn remote_host(&self) -> SocketAddr {
        self.remote_host
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn state(&self) -> XferState {
        self.state
    }

    pub fn target(&self) -> &XferTarget {
        &self.target
    }

    pub fn is_priority(&self) -> bool {
        self.is_priority
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn packet_num(&self) -> u32 {
        self.packet_num
    }

    pub fn total_size(&self) -> Option<u64> {
        self.total_size
    }

    /// 송신: 읽어 보낸 바이트, 수신: 받은 바이트
    pub fn bytes_transferred(&self) -> u64 {
        self.offset
    }

    pub fn outstanding(&self) -> Option<&OutstandingPacket> {
        self.outstanding.as_ref()
    }

    pub fn delete_on_completion(&self) -> bool {
        self.delete_on_completion
    }

    /// 로그용 이름
    pub fn display_name(&self) -> String {
        match &self.target {
            XferTarget::File { path } => path.display().to_string(),
            XferTarget::Asset { id, asset_type } => format!("{}:{:?}", id, asset_type),
            XferTarget::Memory => format!("mem:{}", self.id),
        }
    }

    // ───────────────────────────── 수신측 ─────────────────────────────

    /// 원격에 보낼 요청 메시지
    pub fn request_message(&self) -> Option<FileRequest> {
        let remote = self.remote.as_ref()?;
        let mut request = FileRequest {
            id: self.id,
            filename: String::new(),
            path_root: PathRoot::None.to_wire(),
            asset: None,
            delete_on_completion: false,
            is_priority: self.is_priority,
            use_big_packets: self.use_big_packets,
        };
        match remote {
            RemoteSource::File {
                path,
                root,
                delete_on_completion,
            } => {
                request.filename = path.clone();
                request.path_root = root.to_wire();
                request.delete_on_completion = *delete_on_completion;
            }
            RemoteSource::Asset { id, asset_type } => {
                request.asset = Some(AssetRef {
                    id: *id,
                    asset_type: asset_type.as_i16(),
                });
            }
            RemoteSource::Registered => {}
        }
        Some(request)
    }

    /// 수신 중 파일 경로 (`<path>.part`)
    pub fn part_path(&self) -> Option<PathBuf> {
        match &self.target {
            XferTarget::File { path } => Some(part_path_for(path)),
            _ => None,
        }
    }

    /// 다운로드 시작: 남은 part 파일 정리 후 Active
    pub fn start_download(&mut self, storage: &mut dyn XferStorage) -> Result<FileRequest> {
        let request = self
            .request_message()
            .ok_or_else(|| Error::RestrictedPath(self.display_name()))?;
        if let Some(part) = self.part_path() {
            if storage.file_exists(&part) {
                storage.remove_file(&part)?;
            }
        }
        self.state = XferState::Active;
        Ok(request)
    }

    /// 데이터 패킷 수신
    pub fn receive_data(
        &mut self,
        packet: &DataPacket,
        storage: &mut dyn XferStorage,
        flush_threshold: usize,
    ) -> Result<ReceiveOutcome> {
        let seq = decode_packet_num(packet.packet);
        if seq != self.packet_num {
            if seq.wrapping_add(1) == self.packet_num {
                return Ok(ReceiveOutcome::Duplicate { seq });
            }
            return Ok(ReceiveOutcome::OutOfWindow {
                seq,
                expected: self.packet_num,
            });
        }

        let data = if seq == 0 {
            let (total_size, data) = split_first_payload(&packet.payload).ok_or(Error::Truncated {
                len: packet.payload.len(),
            })?;
            self.total_size = Some(u64::from(total_size));
            // 원격이 선언한 크기는 신뢰하지 않음
            if matches!(self.target, XferTarget::File { .. }) {
                self.buffer.reserve((total_size as usize).min(flush_threshold));
            }
            data
        } else {
            packet.payload.clone()
        };

        let last = is_last_packet(packet.packet);
        let offset = self.offset + data.len() as u64;
        if let Some(total) = self.total_size {
            if offset > total || (last && offset != total) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!(
                        "{} size mismatch: received {} of {} bytes",
                        self.display_name(),
                        offset,
                        total
                    ),
                )));
            }
        }

        self.buffer.extend_from_slice(&data);
        self.offset = offset;
        if self.buffer.len() >= flush_threshold {
            self.flush(storage)?;
        }

        self.packet_num += 1;
        if last {
            self.state = XferState::Completing;
        }
        Ok(ReceiveOutcome::Accepted { seq, last })
    }

    /// 파일 수신 버퍼를 part 파일로 내보냄
    fn flush(&mut self, storage: &mut dyn XferStorage) -> Result<()> {
        let Some(part) = self.part_path() else {
            return Ok(());
        };
        if self.buffer.is_empty() {
            return Ok(());
        }
        storage.append_file(&part, &self.buffer)?;
        self.flushed += self.buffer.len() as u64;
        self.buffer.clear();
        Ok(())
    }

    /// EOF 이후 저장 완료
    pub fn finish_receive(&mut self, storage: &mut dyn XferStorage) -> Result<()> {
        match self.target.clone() {
            XferTarget::File { path } => {
                self.flush(storage)?;
                let part = part_path_for(&path);
                if self.flushed == 0 {
                    // 빈 파일도 생성
                    storage.append_file(&part, &[])?;
                }
                storage.rename_file(&part, &path)?;
            }
            XferTarget::Asset { id, asset_type } => {
                let data = self.buffer.split().freeze();
                storage.store_asset(&id, asset_type, data)?;
            }
            XferTarget::Memory => {}
        }
        Ok(())
    }

    /// 중단된 수신의 part 파일 정리
    pub fn discard_partial(&mut self, storage: &mut dyn XferStorage) {
        self.buffer.clear();
        if let Some(part) = self.part_path() {
            if storage.file_exists(&part) {
                let _ = storage.remove_file(&part);
            }
        }
    }

    // ───────────────────────────── 송신측 ─────────────────────────────

    /// 원본 열기 (크기 확정)
    pub fn open_source(&mut self, storage: &mut dyn XferStorage) -> Result<()> {
        match &self.target {
            XferTarget::File { path } => {
                let len = storage.file_len(path)?;
                if len > u64::from(u32::MAX) {
                    return Err(Error::PayloadTooLarge { size: len });
                }
                self.total_size = Some(len);
            }
            XferTarget::Asset { id, asset_type } => {
                let data = storage.read_asset(id, *asset_type)?;
                if data.len() as u64 > u64::from(u32::MAX) {
                    return Err(Error::PayloadTooLarge {
                        size: data.len() as u64,
                    });
                }
                self.total_size = Some(data.len() as u64);
                self.source = Some(data);
            }
            XferTarget::Memory => {}
        }
        self.source_open = true;
        Ok(())
    }

    /// 대기열로 갈 때 원본을 닫음
    pub fn close_source(&mut self) {
        if let XferTarget::Memory = self.target {
            return;
        }
        self.source = None;
        self.source_open = false;
    }

    /// 요청 수락: 원본을 열고 Pending
    pub fn start_send(&mut self, storage: &mut dyn XferStorage) -> Result<()> {
        self.open_source(storage)?;
        self.state = XferState::Pending;
        self.registered_at = None;
        Ok(())
    }

    /// 활성화 후 첫 패킷 송신 (실패 시 상태 유지)
    pub fn activate(&mut self, storage: &mut dyn XferStorage, now: Instant) -> Result<DataPacket> {
        if !self.source_open {
            self.open_source(storage)?;
        }
        let previous = self.state;
        self.state = XferState::Active;
        self.next_packet(storage, now).map_err(|e| {
            self.state = previous;
            e
        })
    }

    /// 다음 패킷 생성 후 미확인으로 보관
    pub fn next_packet(&mut self, storage: &mut dyn XferStorage, now: Instant) -> Result<DataPacket> {
        let total = self.total_size.unwrap_or(0);
        let remaining = total.saturating_sub(self.offset);
        let len = remaining.min(self.chunk_size as u64) as usize;

        let data = match &self.target {
            XferTarget::File { path } => storage.read_file(path, self.offset, len)?,
            XferTarget::Asset { .. } | XferTarget::Memory => {
                let source = self.source.as_ref().ok_or_else(|| {
                    Error::Io(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        "source not open",
                    ))
                })?;
                let start = self.offset as usize;
                source.slice(start..start + len)
            }
        };
        if data.len() < len {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("{} shrank during transfer", self.display_name()),
            )));
        }

        let last = self.offset + len as u64 >= total;
        let payload = if self.packet_num == 0 {
            encode_first_payload(total as u32, &data)
        } else {
            data
        };
        let packet = encode_packet_num(self.packet_num, last);

        self.offset += len as u64;
        self.outstanding = Some(OutstandingPacket {
            packet,
            payload: payload.clone(),
            sent_at: now,
            attempts: 1,
        });
        if last {
            self.state = XferState::Completing;
        }

        Ok(DataPacket {
            id: self.id,
            packet,
            payload,
        })
    }

    /// 확인 처리. 미확인 패킷과 순번이 같을 때만 윈도우가 움직인다.
    pub fn on_confirm(&mut self, packet: u32) -> ConfirmOutcome {
        let matches = self
            .outstanding
            .as_ref()
            .is_some_and(|o| decode_packet_num(o.packet) == decode_packet_num(packet));
        if !matches {
            return ConfirmOutcome::Ignored;
        }

        self.outstanding = None;
        self.packet_num += 1;
        if self.state == XferState::Completing {
            ConfirmOutcome::Finished
        } else {
            ConfirmOutcome::Advanced
        }
    }

    /// 확인 타임아웃 여부
    pub fn is_ack_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.outstanding
            .as_ref()
            .is_some_and(|o| now.saturating_duration_since(o.sent_at) > timeout)
    }

    /// 미확인 패킷 재전송
    pub fn retransmit(&mut self, now: Instant) -> Option<DataPacket> {
        let outstanding = self.outstanding.as_mut()?;
        outstanding.attempts += 1;
        outstanding.sent_at = now;
        Some(DataPacket {
            id: self.id,
            packet: outstanding.packet,
            payload: outstanding.payload.clone(),
        })
    }

    /// 등록 타임아웃 여부
    pub fn is_registration_expired(&self, now: Instant, timeout: Duration) -> bool {
        self.state == XferState::Registered
            && self
                .registered_at
                .is_some_and(|t| now.saturating_duration_since(t) > timeout)
    }

    /// 종료 상태로 전이하고 콜백 호출 (최초 1회만)
    pub fn complete(&mut self, state: XferState, result: ResultCode) -> bool {
        self.state = state;
        self.outstanding = None;
        match self.callback.take() {
            Some(callback) => {
                callback(XferOutcome {
                    id: self.id,
                    result,
                    ext_status: result.ext_status(),
                });
                true
            }
            None => false,
        }
    }
}

fn part_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".part");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn host() -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], 13000))
    }

    fn sender(storage: &mut MemoryStorage, data: &[u8], chunk: usize) -> Xfer {
        storage.insert_file("src.bin", data.to_vec());
        let mut xfer = Xfer::new_send(
            1,
            host(),
            XferTarget::File {
                path: PathBuf::from("src.bin"),
            },
            chunk,
            false,
        );
        xfer.start_send(storage).unwrap();
        xfer
    }

    fn receiver(path: &str) -> Xfer {
        Xfer::new_receive(
            1,
            host(),
            XferTarget::File {
                path: PathBuf::from(path),
            },
            RemoteSource::File {
                path: "remote.bin".into(),
                root: PathRoot::None,
                delete_on_completion: false,
            },
            4,
            false,
            false,
            None,
        )
    }

    #[test]
    fn test_send_packets_and_eof() {
        let t0 = Instant::now();
        let mut storage = MemoryStorage::new();
        let mut xfer = sender(&mut storage, b"0123456789", 4);

        let p0 = xfer.activate(&mut storage, t0).unwrap();
        assert_eq!(decode_packet_num(p0.packet), 0);
        assert!(!is_last_packet(p0.packet));
        assert_eq!(split_first_payload(&p0.payload).unwrap().0, 10);

        assert_eq!(xfer.on_confirm(0), ConfirmOutcome::Advanced);
        let p1 = xfer.next_packet(&mut storage, t0).unwrap();
        assert_eq!(&p1.payload[..], b"4567");

        assert_eq!(xfer.on_confirm(1), ConfirmOutcome::Advanced);
        let p2 = xfer.next_packet(&mut storage, t0).unwrap();
        assert!(is_last_packet(p2.packet));
        assert_eq!(&p2.payload[..], b"89");
        assert_eq!(xfer.state(), XferState::Completing);

        assert_eq!(xfer.on_confirm(2), ConfirmOutcome::Finished);
        assert!(xfer.outstanding().is_none());
        assert_eq!(xfer.on_confirm(2), ConfirmOutcome::Ignored);
    }

    #[test]
    fn test_duplicate_confirm_is_idempotent() {
        let t0 = Instant::now();
        let mut storage = MemoryStorage::new();
        let mut xfer = sender(&mut storage, &[7u8; 12], 4);
        xfer.activate(&mut storage, t0).unwrap();

        assert_eq!(xfer.on_confirm(0), ConfirmOutcome::Advanced);
        let packet_num = xfer.packet_num();
        assert_eq!(xfer.on_confirm(0), ConfirmOutcome::Ignored);
        assert_eq!(xfer.packet_num(), packet_num);
        assert!(xfer.outstanding().is_none());
    }

    #[test]
    fn test_zero_length_single_packet() {
        let t0 = Instant::now();
        let mut storage = MemoryStorage::new();
        let mut xfer = sender(&mut storage, &[], 4);
        let packet = xfer.activate(&mut storage, t0).unwrap();
        assert!(is_last_packet(packet.packet));
        assert_eq!(packet.payload.len(), crate::packet::SIZE_PREFIX_LEN);

        let mut rx = receiver("empty.bin");
        rx.start_download(&mut storage).unwrap();
        assert_eq!(
            rx.receive_data(&packet, &mut storage, 1024).unwrap(),
            ReceiveOutcome::Accepted { seq: 0, last: true }
        );
        rx.finish_receive(&mut storage).unwrap();
        assert_eq!(storage.file("empty.bin"), Some(&[][..]));
    }

    #[test]
    fn test_retransmit_counts_attempts() {
        let t0 = Instant::now();
        let mut storage = MemoryStorage::new();
        let mut xfer = sender(&mut storage, b"abcdefgh", 4);
        let first = xfer.activate(&mut storage, t0).unwrap();

        let timeout = Duration::from_secs(3);
        assert!(!xfer.is_ack_expired(t0 + Duration::from_secs(1), timeout));
        assert!(xfer.is_ack_expired(t0 + Duration::from_secs(4), timeout));

        let again = xfer.retransmit(t0 + Duration::from_secs(4)).unwrap();
        assert_eq!(again, first);
        assert_eq!(xfer.outstanding().unwrap().attempts, 2);
    }

    #[test]
    fn test_receive_window() {
        let mut storage = MemoryStorage::new();
        let mut rx = receiver("out.bin");
        rx.start_download(&mut storage).unwrap();

        let p0 = DataPacket {
            id: 1,
            packet: encode_packet_num(0, false),
            payload: encode_first_payload(6, b"abc"),
        };
        let p2 = DataPacket {
            id: 1,
            packet: encode_packet_num(2, true),
            payload: Bytes::from_static(b"zzz"),
        };

        assert_eq!(
            rx.receive_data(&p0, &mut storage, 2).unwrap(),
            ReceiveOutcome::Accepted { seq: 0, last: false }
        );
        assert_eq!(
            rx.receive_data(&p0, &mut storage, 2).unwrap(),
            ReceiveOutcome::Duplicate { seq: 0 }
        );
        assert_eq!(
            rx.receive_data(&p2, &mut storage, 2).unwrap(),
            ReceiveOutcome::OutOfWindow { seq: 2, expected: 1 }
        );
        assert_eq!(rx.bytes_transferred(), 3);
        assert_eq!(rx.total_size(), Some(6));
        // threshold 2 이상이므로 part 파일로 내보냄
        assert_eq!(storage.file("out.bin.part"), Some(&b"abc"[..]));
    }

    #[test]
    fn test_declared_size_not_preallocated() {
        let mut storage = MemoryStorage::new();
        let mut rx = receiver("huge.bin");
        rx.start_download(&mut storage).unwrap();

        let p0 = DataPacket {
            id: 1,
            packet: encode_packet_num(0, false),
            payload: encode_first_payload(1_000_000_000, b"abc"),
        };
        assert_eq!(
            rx.receive_data(&p0, &mut storage, 1024).unwrap(),
            ReceiveOutcome::Accepted { seq: 0, last: false }
        );
        assert_eq!(rx.total_size(), Some(1_000_000_000));
        assert!(rx.buffer.capacity() < 64 * 1024);
    }

    #[test]
    fn test_size_mismatch_rejected() {
        let mut storage = MemoryStorage::new();

        // EOF 인데 선언 크기보다 짧음
        let mut rx = receiver("short.bin");
        rx.start_download(&mut storage).unwrap();
        let short = DataPacket {
            id: 1,
            packet: encode_packet_num(0, true),
            payload: encode_first_payload(6, b"abc"),
        };
        let err = rx.receive_data(&short, &mut storage, 1024).unwrap_err();
        assert_eq!(err.result_code(), ResultCode::CannotOpenFile);
        assert_ne!(rx.state(), XferState::Completing);
        assert_eq!(rx.bytes_transferred(), 0);

        // 선언 크기 초과
        let mut rx = receiver("long.bin");
        rx.start_download(&mut storage).unwrap();
        let p0 = DataPacket {
            id: 1,
            packet: encode_packet_num(0, false),
            payload: encode_first_payload(4, b"abc"),
        };
        let p1 = DataPacket {
            id: 1,
            packet: encode_packet_num(1, true),
            payload: Bytes::from_static(b"de"),
        };
        rx.receive_data(&p0, &mut storage, 1024).unwrap();
        assert!(rx.receive_data(&p1, &mut storage, 1024).is_err());
        assert_eq!(rx.bytes_transferred(), 3);
    }

    #[test]
    fn test_callback_fires_once() {
        let (callback, rx) = completion_channel();
        let mut xfer = Xfer::new_receive(
            5,
            host(),
            XferTarget::File {
                path: PathBuf::from("x"),
            },
            RemoteSource::File {
                path: "y".into(),
                root: PathRoot::None,
                delete_on_completion: false,
            },
            1000,
            false,
            false,
            Some(callback),
        );
        assert!(xfer.complete(XferState::Aborted, ResultCode::Other(-1)));
        assert!(!xfer.complete(XferState::Failed, ResultCode::Timeout));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.id, 5);
        assert_eq!(outcome.result, ResultCode::Other(-1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_context_callback() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let callback = callback_with_context(("ctx", tx), |(name, tx), outcome| {
            let _ = tx.send((name, outcome.result));
        });
        callback(XferOutcome {
            id: 1,
            result: ResultCode::Ok,
            ext_status: ExtStatus::None,
        });
        assert_eq!(rx.try_recv().unwrap(), ("ctx", ResultCode::Ok));
    }
}
