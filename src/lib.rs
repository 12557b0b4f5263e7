//! # Xfer
//!
//! 데이터그램 메시지 계층 위의 stop-and-wait 대용량 전송 엔진
//!
//! ## 핵심 특징
//! - **stop-and-wait**: 전송당 미확인 패킷 하나, 타임아웃 재전송
//! - **회선별 승인 제어**: 동시 송신 soft cap + 남용 회선 차단용 hard limit
//! - **수신 승인 제어**: 전체 동시 다운로드 상한, 우선순위 요청 먼저
//! - **확인 스로틀**: 확인 트래픽 속도 제한, 초과분은 FIFO 보류
//! - **1회용 송신 승인**: 원격 요청 파일명은 미리 승인된 것만
//! - **sans-IO 관리자**: 시간은 인자로, 출력은 큐로

pub mod auth;
pub mod config;
pub mod error;
pub mod host;
pub mod manager;
pub mod message;
pub mod node;
pub mod packet;
pub mod stats;
pub mod storage;
pub mod throttle;
pub mod xfer;

pub use config::Config;
pub use error::{Error, ExtStatus, Result, ResultCode};
pub use manager::{Outgoing, XferManager};
pub use message::XferMessage;
pub use node::XferNode;
pub use stats::XferStats;
pub use storage::{AssetId, AssetType, LocalStorage, MemoryStorage, PathRoot, XferStorage};
pub use xfer::{completion_channel, Direction, TransferId, XferCallback, XferOutcome, XferState};

/// 프로토콜 버전
pub const PROTOCOL_VERSION: u8 = 1;

/// 기본 패킷 페이로드 크기 (바이트)
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// big packet 페이로드 크기 (바이트)
pub const LARGE_CHUNK_SIZE: usize = 7680;

/// 매직 넘버 (패킷 식별용)
pub const MAGIC_NUMBER: u32 = 0x5846_4552; // "XFER"
