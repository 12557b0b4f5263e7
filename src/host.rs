//! 호스트별 전송 집계
//!
//! 회선 승인 제어에 쓰이는 원격 호스트별 활성/대기 전송 수.
//! 모든 Xfer 상태 전이는 정확히 한 호스트의 카운터를 ±1 한다.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{info, warn};

use crate::xfer::Direction;

/// 활성/대기 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct XferCounts {
    pub active: usize,
    pub pending: usize,
}

impl XferCounts {
    pub fn total(&self) -> usize {
        self.active + self.pending
    }
}

/// 원격 호스트 상태
#[derive(Debug, Clone)]
pub struct HostStatus {
    pub host: SocketAddr,

    /// 송신 전송 (이 호스트가 요청한 것)
    pub outgoing: XferCounts,

    /// 수신 전송 (이 호스트에 요청한 것)
    pub incoming: XferCounts,
}

impl HostStatus {
    pub fn new(host: SocketAddr) -> Self {
        Self {
            host,
            outgoing: XferCounts::default(),
            incoming: XferCounts::default(),
        }
    }

    pub fn num_active(&self) -> usize {
        self.outgoing.active + self.incoming.active
    }

    pub fn num_pending(&self) -> usize {
        self.outgoing.pending + self.incoming.pending
    }

    pub fn counts(&self, direction: Direction) -> XferCounts {
        match direction {
            Direction::Send => self.outgoing,
            Direction::Receive => self.incoming,
        }
    }

    fn counts_mut(&mut self, direction: Direction) -> &mut XferCounts {
        match direction {
            Direction::Send => &mut self.outgoing,
            Direction::Receive => &mut self.incoming,
        }
    }

    fn is_idle(&self) -> bool {
        self.outgoing.total() == 0 && self.incoming.total() == 0
    }
}

/// 카운터 변경 (0 미만 방지)
fn apply_delta(value: &mut usize, delta: isize, host: SocketAddr, what: &str) {
    if delta >= 0 {
        *value += delta as usize;
    } else if let Some(next) = value.checked_sub(delta.unsigned_abs()) {
        *value = next;
    } else {
        warn!("host {} {} 카운터 음수 방지: {} {:+}", host, what, value, delta);
        *value = 0;
    }
}

/// 호스트 상태 테이블
#[derive(Debug, Default)]
pub struct HostTable {
    hosts: HashMap<SocketAddr, HostStatus>,
}

impl HostTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 호스트 상태 조회 (없으면 생성)
    pub fn find_host_status(&mut self, host: SocketAddr) -> &mut HostStatus {
        self.hosts.entry(host).or_insert_with(|| HostStatus::new(host))
    }

    pub fn get(&self, host: &SocketAddr) -> Option<&HostStatus> {
        self.hosts.get(host)
    }

    pub fn num_active_xfers(&self, host: &SocketAddr) -> usize {
        self.hosts.get(host).map_or(0, HostStatus::num_active)
    }

    pub fn num_pending_xfers(&self, host: &SocketAddr) -> usize {
        self.hosts.get(host).map_or(0, HostStatus::num_pending)
    }

    pub fn outgoing(&self, host: &SocketAddr) -> XferCounts {
        self.counts(host, Direction::Send)
    }

    pub fn counts(&self, host: &SocketAddr, direction: Direction) -> XferCounts {
        self.get(host)
            .map(|s| s.counts(direction))
            .unwrap_or_default()
    }

    pub fn change_num_active_xfers(&mut self, host: SocketAddr, direction: Direction, delta: isize) {
        let status = self.find_host_status(host);
        apply_delta(&mut status.counts_mut(direction).active, delta, host, "active");
        self.prune(host);
    }

    pub fn change_num_pending_xfers(&mut self, host: SocketAddr, direction: Direction, delta: isize) {
        let status = self.find_host_status(host);
        apply_delta(&mut status.counts_mut(direction).pending, delta, host, "pending");
        self.prune(host);
    }

    /// 대기 -> 활성
    pub fn promote(&mut self, host: SocketAddr, direction: Direction) {
        let status = self.find_host_status(host);
        let counts = status.counts_mut(direction);
        apply_delta(&mut counts.pending, -1, host, "pending");
        counts.active += 1;
    }

    fn prune(&mut self, host: SocketAddr) {
        if self.hosts.get(&host).is_some_and(HostStatus::is_idle) {
            self.hosts.remove(&host);
        }
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// 진단용 출력
    pub fn print(&self) {
        if self.hosts.is_empty() {
            return;
        }
        info!("Xfer hosts:");
        for status in self.hosts.values() {
            info!(
                "    {} - outgoing active: {} pending: {} - incoming active: {} pending: {}",
                status.host,
                status.outgoing.active,
                status.outgoing.pending,
                status.incoming.active,
                status.incoming.pending
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_created_on_demand() {
        let mut table = HostTable::new();
        assert_eq!(table.num_active_xfers(&host(1)), 0);
        assert!(table.is_empty());

        table.change_num_pending_xfers(host(1), Direction::Send, 1);
        assert_eq!(table.num_pending_xfers(&host(1)), 1);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_promote_and_release() {
        let mut table = HostTable::new();
        table.change_num_pending_xfers(host(1), Direction::Receive, 1);
        table.promote(host(1), Direction::Receive);
        assert_eq!(table.num_active_xfers(&host(1)), 1);
        assert_eq!(table.num_pending_xfers(&host(1)), 0);

        table.change_num_active_xfers(host(1), Direction::Receive, -1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_never_negative() {
        let mut table = HostTable::new();
        table.change_num_pending_xfers(host(2), Direction::Send, 1);
        table.change_num_active_xfers(host(2), Direction::Send, -1);
        assert_eq!(table.num_active_xfers(&host(2)), 0);
        assert_eq!(table.num_pending_xfers(&host(2)), 1);
    }

    #[test]
    fn test_directions_are_separate() {
        let mut table = HostTable::new();
        table.change_num_active_xfers(host(3), Direction::Send, 1);
        table.change_num_pending_xfers(host(3), Direction::Receive, 1);
        assert_eq!(table.outgoing(&host(3)).active, 1);
        assert_eq!(table.outgoing(&host(3)).pending, 0);
        assert_eq!(
            table.counts(&host(3), Direction::Receive),
            XferCounts { active: 0, pending: 1 }
        );
        assert_eq!(table.get(&host(3)).map(HostStatus::num_pending), Some(1));
        assert!(table.get(&host(4)).is_none());
        assert_eq!(table.num_active_xfers(&host(3)), 1);
        assert_eq!(table.num_pending_xfers(&host(3)), 1);
    }
}
