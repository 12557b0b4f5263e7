//! 확인 패킷 스로틀
//!
//! 부하가 클 때 확인(ack) 트래픽이 회선을 포화시키지 않도록
//! 송출 속도를 제한한다. 예산은 초당 비트 단위로 쌓이고
//! 한 번에 `lookahead` 만큼까지만 모아 둔다. 첫 사용 시점에는
//! `lookahead` 만큼 채워진 상태로 시작한다.

use std::time::Instant;

/// 기본 lookahead (초)
const DEFAULT_LOOKAHEAD_SECS: f64 = 0.25;

/// 확인 패킷 스로틀
#[derive(Debug, Clone)]
pub struct AckThrottle {
    /// 속도 (bits/sec)
    rate: f64,

    /// 남은 예산 (음수 가능: 과사용 후 회복 중)
    available: f64,

    /// 예산 상한 시간
    lookahead_secs: f64,

    /// 마지막 예산 정산 시각 (첫 사용 시 설정)
    last_send: Option<Instant>,
}

impl AckThrottle {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            available: 0.0,
            lookahead_secs: DEFAULT_LOOKAHEAD_SECS,
            last_send: None,
        }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// 속도 변경. 지금까지 쌓인 예산은 유지.
    pub fn set_rate(&mut self, rate: f64, now: Instant) {
        if self.last_send.is_some() {
            self.available = self.available_at(now);
            self.last_send = Some(now);
        }
        self.rate = rate;
    }

    fn available_at(&self, now: Instant) -> f64 {
        match self.last_send {
            Some(last) => {
                let elapsed = now.saturating_duration_since(last).as_secs_f64();
                self.available + self.rate * elapsed
            }
            None => self.lookahead_amount(),
        }
    }

    fn lookahead_amount(&self) -> f64 {
        self.rate * self.lookahead_secs
    }

    /// 시계 시작, 예산은 lookahead 만큼
    fn start_clock(&mut self, now: Instant) {
        if self.last_send.is_none() {
            self.available = self.lookahead_amount();
            self.last_send = Some(now);
        }
    }

    /// `amount` 송출 시 초과 여부 (상태 변경 없음, 첫 호출만 시계 시작)
    ///
    /// `true`면 지금 보내면 안 됨
    pub fn check_overflow(&mut self, amount: f64, now: Instant) -> bool {
        self.start_clock(now);
        let available = self.available_at(now);
        !(available >= self.lookahead_amount() || available > amount)
    }

    /// `amount` 송출을 예산에 반영
    ///
    /// 이미 보낸 뒤 호출한다. 반환값은 초과 여부.
    pub fn throttle_overflow(&mut self, amount: f64, now: Instant) -> bool {
        self.start_clock(now);
        let lookahead = self.lookahead_amount();
        self.available = self.available_at(now);
        self.last_send = Some(now);

        let overflow = if self.available >= lookahead {
            // 채널이 비어 있으면 크기와 무관하게 허용
            self.available = lookahead;
            false
        } else {
            self.available <= amount
        };

        // 음수가 되면 회복 시간이 필요함
        self.available -= amount;
        overflow
    }

    /// 승인되면 예산을 차감하고 `true`
    pub fn try_admit(&mut self, amount: f64, now: Instant) -> bool {
        if self.check_overflow(amount, now) {
            return false;
        }
        self.throttle_overflow(amount, now);
        true
    }
}
