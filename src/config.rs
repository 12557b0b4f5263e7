//! 전송 관리자 설정

use std::time::Duration;

use crate::{DEFAULT_CHUNK_SIZE, LARGE_CHUNK_SIZE};

/// Xfer 관리자 설정
#[derive(Debug, Clone)]
pub struct Config {
    /// 회선(호스트)당 동시 송신 전송 수
    /// 초과분은 대기열로 들어감
    pub max_outgoing_xfers_per_circuit: usize,

    /// 회선당 송신 전송 하드 리밋 (0이면 비활성)
    /// 초과 시 회선 남용으로 간주하고 회선 종료
    pub hard_limit_outgoing_xfers_per_circuit: usize,

    /// 전체 동시 수신 전송 수
    pub max_incoming_xfers: usize,

    /// 플러드 판정 비율 (하드 리밋 대비 %)
    pub flood_threshold_percent: usize,

    /// 패킷 확인 대기 타임아웃 (밀리초)
    pub packet_timeout_ms: u64,

    /// 패킷 재전송 한도
    pub packet_retry_limit: u32,

    /// 등록된 메모리 전송이 요청을 기다리는 시간 (밀리초)
    pub registration_timeout_ms: u64,

    /// 확인 패킷 스로틀링 사용 여부
    pub use_ack_throttling: bool,

    /// 확인 패킷 스로틀 속도 (bits/sec)
    pub ack_throttle_bps: f64,

    /// 기본 패킷 페이로드 크기 (바이트)
    pub chunk_size: usize,

    /// big packet 협상 시 페이로드 크기 (바이트)
    pub large_chunk_size: usize,

    /// 수신 버퍼를 디스크로 내보내는 기준 (바이트)
    pub receive_flush_threshold: usize,

    /// 노드 주기 작업 간격 (밀리초)
    pub tick_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_outgoing_xfers_per_circuit: 10,
            hard_limit_outgoing_xfers_per_circuit: 500,
            max_incoming_xfers: 1000,
            flood_threshold_percent: 80,
            packet_timeout_ms: 3000,          // 3초
            packet_retry_limit: 10,
            registration_timeout_ms: 60_000,  // 60초
            use_ack_throttling: false,
            ack_throttle_bps: 100_000.0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            large_chunk_size: LARGE_CHUNK_SIZE,
            receive_flush_threshold: 64 * 1024, // 64KB
            tick_interval_ms: 100,
        }
    }
}

impl Config {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    pub fn packet_timeout(&self) -> Duration {
        Duration::from_millis(self.packet_timeout_ms)
    }

    pub fn registration_timeout(&self) -> Duration {
        Duration::from_millis(self.registration_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// 요청 시 협상된 패킷 크기
    pub fn chunk_size_for(&self, use_big_packets: bool) -> usize {
        if use_big_packets {
            self.large_chunk_size
        } else {
            self.chunk_size
        }
    }

    /// 혼잡한 리전 서버용 설정
    pub fn busy_region() -> Self {
        Self {
            max_outgoing_xfers_per_circuit: 4,
            hard_limit_outgoing_xfers_per_circuit: 200,
            max_incoming_xfers: 100,
            use_ack_throttling: true,
            ack_throttle_bps: 300_000.0,
            ..Self::default()
        }
    }

    /// 신뢰된 백엔드 회선용 설정 (하드 리밋 없음)
    pub fn trusted_backend() -> Self {
        Self {
            max_outgoing_xfers_per_circuit: 32,
            hard_limit_outgoing_xfers_per_circuit: 0,
            packet_timeout_ms: 1000,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.max_outgoing_xfers_per_circuit, 10);
        assert_eq!(config.hard_limit_outgoing_xfers_per_circuit, 500);
        assert_eq!(config.packet_timeout(), Duration::from_secs(3));
        assert_eq!(config.chunk_size_for(false), 1000);
        assert_eq!(config.chunk_size_for(true), 7680);
    }

    #[test]
    fn test_presets() {
        assert!(Config::busy_region().use_ack_throttling);
        assert_eq!(Config::trusted_backend().hard_limit_outgoing_xfers_per_circuit, 0);
    }
}
