//! 에러 타입 및 결과 코드 정의

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Xfer 엔진 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO 에러: {0}")]
    Io(#[from] std::io::Error),

    #[error("직렬화 에러: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("유효하지 않은 매직 넘버: expected {expected:08X}, got {got:08X}")]
    InvalidMagicNumber { expected: u32, got: u32 },

    #[error("유효하지 않은 프로토콜 버전: expected {expected}, got {got}")]
    InvalidVersion { expected: u8, got: u8 },

    #[error("CRC 불일치: expected {expected:08X}, got {got:08X}")]
    CrcMismatch { expected: u32, got: u32 },

    #[error("잘린 데이터그램: {len} bytes")]
    Truncated { len: usize },

    #[error("원격 경로가 비어 있음")]
    EmptyRemotePath,

    #[error("페이로드 크기 초과: {size} bytes")]
    PayloadTooLarge { size: u64 },

    #[error("에셋 없음: {id}")]
    AssetNotFound { id: uuid::Uuid },

    #[error("유효하지 않은 에셋 타입: {0}")]
    InvalidAssetType(i16),

    #[error("허용되지 않은 경로: {0}")]
    RestrictedPath(String),

    #[error("이미 사용 중인 전송 ID: {0}")]
    DuplicateTransferId(u64),

    #[error("연결 종료")]
    ConnectionClosed,
}

impl Error {
    /// 로컬 실패를 콜백 결과 코드로 변환
    pub fn result_code(&self) -> ResultCode {
        match self {
            Error::Io(e) if e.kind() == std::io::ErrorKind::NotFound => ResultCode::FileNotFound,
            Error::Io(_) => ResultCode::CannotOpenFile,
            Error::AssetNotFound { .. } => ResultCode::FileNotFound,
            Error::RestrictedPath(_) => ResultCode::InsufficientPermissions,
            Error::ConnectionClosed => ResultCode::CircuitGone,
            _ => ResultCode::CannotOpenFile,
        }
    }
}

/// Result 타입 별칭
pub type Result<T> = std::result::Result<T, Error>;

/// 전송 결과 코드
///
/// 콜백과 Abort 메시지에 실리는 값. 와이어 표현은 `i32`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ResultCode {
    Ok,
    InsufficientPermissions,
    Eof,
    CannotOpenFile,
    FileNotFound,
    FileEmpty,
    Timeout,
    CircuitGone,
    Other(i32),
}

impl ResultCode {
    pub fn code(self) -> i32 {
        match self {
            ResultCode::Ok => 0,
            ResultCode::InsufficientPermissions => -5,
            ResultCode::Eof => -39,
            ResultCode::CannotOpenFile => -42,
            ResultCode::FileNotFound => -43,
            ResultCode::FileEmpty => -44,
            ResultCode::Timeout => -23016,
            ResultCode::CircuitGone => -23017,
            ResultCode::Other(code) => code,
        }
    }

    pub fn from_code(code: i32) -> Self {
        match code {
            0 => ResultCode::Ok,
            -5 => ResultCode::InsufficientPermissions,
            -39 => ResultCode::Eof,
            -42 => ResultCode::CannotOpenFile,
            -43 => ResultCode::FileNotFound,
            -44 => ResultCode::FileEmpty,
            -23016 => ResultCode::Timeout,
            -23017 => ResultCode::CircuitGone,
            other => ResultCode::Other(other),
        }
    }

    pub fn is_ok(self) -> bool {
        self == ResultCode::Ok
    }

    /// 결과 코드에 대응하는 확장 상태
    pub fn ext_status(self) -> ExtStatus {
        match self {
            ResultCode::FileNotFound => ExtStatus::NonexistentFile,
            _ => ExtStatus::None,
        }
    }
}

impl From<i32> for ResultCode {
    fn from(code: i32) -> Self {
        ResultCode::from_code(code)
    }
}

impl From<ResultCode> for i32 {
    fn from(code: ResultCode) -> Self {
        code.code()
    }
}

impl std::fmt::Display for ResultCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, self.code())
    }
}

/// 확장 상태 (결과 코드 보조 정보)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtStatus {
    #[default]
    None,
    NonexistentFile,
    NullAssetId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_code_wire_values() {
        assert_eq!(ResultCode::Ok.code(), 0);
        assert_eq!(ResultCode::from_code(-23016), ResultCode::Timeout);
        assert_eq!(ResultCode::from_code(-7), ResultCode::Other(-7));
        assert_eq!(ResultCode::Other(-7).code(), -7);
    }

    #[test]
    fn test_io_error_mapping() {
        let missing = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert_eq!(missing.result_code(), ResultCode::FileNotFound);
        assert_eq!(missing.result_code().ext_status(), ExtStatus::NonexistentFile);

        let denied = Error::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no"));
        assert_eq!(denied.result_code(), ResultCode::CannotOpenFile);
    }
}
