//! 프로토콜 메시지 정의
//!
//! 전송 하나당 네 가지 메시지만 오간다:
//! - FileRequest: 수신측 -> 송신측, 전송 시작 요청
//! - DataPacket: 송신측 -> 수신측, 순번 붙은 데이터
//! - ConfirmPacket: 수신측 -> 송신측, 패킷 확인
//! - Abort: 양방향, 전송 중단

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::packet::RawPacketNum;
use crate::storage::AssetId;
use crate::xfer::TransferId;
use crate::{Error, Result, MAGIC_NUMBER, PROTOCOL_VERSION};

/// 메시지 타입
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum MessageType {
    /// 전송 요청
    FileRequest = 1,

    /// 데이터 패킷
    DataPacket = 2,

    /// 패킷 확인
    ConfirmPacket = 3,

    /// 전송 중단
    Abort = 4,
}

/// 메시지 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageHeader {
    /// 매직 넘버
    pub magic: u32,

    /// 프로토콜 버전
    pub version: u8,

    /// 메시지 타입
    pub msg_type: MessageType,

    /// 메시지 길이 (헤더 제외)
    pub payload_len: u32,

    /// 페이로드 CRC32
    pub crc32: u32,
}

impl MessageHeader {
    pub fn new(msg_type: MessageType, payload: &[u8]) -> Self {
        Self {
            magic: MAGIC_NUMBER,
            version: PROTOCOL_VERSION,
            msg_type,
            payload_len: payload.len() as u32,
            crc32: crc32fast::hash(payload),
        }
    }
}

/// 요청 대상 에셋
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub id: AssetId,

    /// 와이어 타입 값 (수신측에서 검증)
    pub asset_type: i16,
}

/// 전송 요청 (수신측 -> 송신측)
///
/// `filename`과 `asset` 모두 없으면 등록된 메모리 전송을 ID로 찾는다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub id: TransferId,

    /// 송신측 기준 파일명
    pub filename: String,

    /// 파일명 기준 디렉터리 (와이어 값)
    pub path_root: u8,

    pub asset: Option<AssetRef>,

    /// 완료 후 송신측 원본 삭제
    pub delete_on_completion: bool,

    pub is_priority: bool,

    pub use_big_packets: bool,
}

/// 데이터 패킷 (송신측 -> 수신측)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataPacket {
    pub id: TransferId,

    /// 순번 + EOF 플래그
    pub packet: RawPacketNum,

    /// 데이터 (0번 패킷은 전체 크기 prefix 포함)
    pub payload: Bytes,
}

/// 패킷 확인 (수신측 -> 송신측)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmPacket {
    pub id: TransferId,

    /// 확인하는 순번 (플래그 없음)
    pub packet: u32,
}

/// 전송 중단
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbortMessage {
    pub id: TransferId,

    /// 결과 코드
    pub result: i32,
}

/// 통합 메시지 enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XferMessage {
    FileRequest(FileRequest),
    DataPacket(DataPacket),
    ConfirmPacket(ConfirmPacket),
    Abort(AbortMessage),
}

impl XferMessage {
    /// 메시지 타입 반환
    pub fn msg_type(&self) -> MessageType {
        match self {
            XferMessage::FileRequest(_) => MessageType::FileRequest,
            XferMessage::DataPacket(_) => MessageType::DataPacket,
            XferMessage::ConfirmPacket(_) => MessageType::ConfirmPacket,
            XferMessage::Abort(_) => MessageType::Abort,
        }
    }

    /// 대상 전송 ID
    pub fn transfer_id(&self) -> TransferId {
        match self {
            XferMessage::FileRequest(m) => m.id,
            XferMessage::DataPacket(m) => m.id,
            XferMessage::ConfirmPacket(m) => m.id,
            XferMessage::Abort(m) => m.id,
        }
    }

    /// 바이트로 직렬화 (헤더 + 페이로드)
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let payload = match self {
            XferMessage::FileRequest(m) => bincode::serialize(m)?,
            XferMessage::DataPacket(m) => bincode::serialize(m)?,
            XferMessage::ConfirmPacket(m) => bincode::serialize(m)?,
            XferMessage::Abort(m) => bincode::serialize(m)?,
        };
        let header = MessageHeader::new(self.msg_type(), &payload);
        let header_bytes = bincode::serialize(&header)?;

        let mut buf = Vec::with_capacity(header_bytes.len() + payload.len());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// 바이트에서 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let header: MessageHeader = bincode::deserialize(bytes)?;
        if header.magic != MAGIC_NUMBER {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_NUMBER,
                got: header.magic,
            });
        }
        if header.version != PROTOCOL_VERSION {
            return Err(Error::InvalidVersion {
                expected: PROTOCOL_VERSION,
                got: header.version,
            });
        }

        // bincode는 고정 길이 인코딩이므로 헤더 크기는 재직렬화로 확인
        let header_size = bincode::serialized_size(&header)? as usize;
        let payload = bytes
            .get(header_size..header_size + header.payload_len as usize)
            .ok_or(Error::Truncated { len: bytes.len() })?;

        let crc = crc32fast::hash(payload);
        if crc != header.crc32 {
            return Err(Error::CrcMismatch {
                expected: header.crc32,
                got: crc,
            });
        }

        let message = match header.msg_type {
            MessageType::FileRequest => XferMessage::FileRequest(bincode::deserialize(payload)?),
            MessageType::DataPacket => XferMessage::DataPacket(bincode::deserialize(payload)?),
            MessageType::ConfirmPacket => {
                XferMessage::ConfirmPacket(bincode::deserialize(payload)?)
            }
            MessageType::Abort => XferMessage::Abort(bincode::deserialize(payload)?),
        };
        Ok(message)
    }
}
