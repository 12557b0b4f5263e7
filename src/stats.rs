//! 전송 통계

use std::time::{Duration, Instant};

/// 관리자 전체 전송 통계
#[derive(Debug, Clone)]
pub struct XferStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 송신 데이터 패킷 수 (재전송 제외)
    pub packets_sent: u64,

    /// 재전송 패킷 수
    pub packets_resent: u64,

    /// 수신 데이터 패킷 수 (순서대로 받은 것만)
    pub packets_received: u64,

    /// 중복 수신 패킷 수
    pub duplicate_packets: u64,

    /// 윈도우 밖 패킷 수
    pub out_of_window_packets: u64,

    /// 송출한 확인 패킷 수
    pub confirms_sent: u64,

    /// 스로틀로 대기열에 들어간 확인 수
    pub confirms_queued: u64,

    /// 송신 바이트
    pub bytes_sent: u64,

    /// 수신 바이트
    pub bytes_received: u64,

    /// 완료된 전송 수
    pub completed: u64,

    /// 중단된 전송 수
    pub aborted: u64,

    /// 실패한 전송 수
    pub failed: u64,

    /// 알 수 없는 ID로 버려진 메시지 수
    pub unknown_messages: u64,
}

impl XferStats {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            packets_sent: 0,
            packets_resent: 0,
            packets_received: 0,
            duplicate_packets: 0,
            out_of_window_packets: 0,
            confirms_sent: 0,
            confirms_queued: 0,
            bytes_sent: 0,
            bytes_received: 0,
            completed: 0,
            aborted: 0,
            failed: 0,
            unknown_messages: 0,
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 송신 처리율 (bytes/sec)
    pub fn send_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_sent as f64 / elapsed
    }

    /// 수신 처리율 (bytes/sec)
    pub fn receive_throughput(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.bytes_received as f64 / elapsed
    }

    /// 재전송 비율
    pub fn resend_ratio(&self) -> f64 {
        let total = self.packets_sent + self.packets_resent;
        if total == 0 {
            return 0.0;
        }
        self.packets_resent as f64 / total as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Sent: {} pkts ({} B, {:.2}% resent) | Received: {} pkts ({} B, {} dup) | Confirms: {} ({} queued) | Done: {} Aborted: {} Failed: {}",
            self.elapsed().as_secs_f64(),
            self.packets_sent,
            self.bytes_sent,
            self.resend_ratio() * 100.0,
            self.packets_received,
            self.bytes_received,
            self.duplicate_packets,
            self.confirms_sent,
            self.confirms_queued,
            self.completed,
            self.aborted,
            self.failed,
        )
    }
}

impl Default for XferStats {
    fn default() -> Self {
        Self::new()
    }
}
