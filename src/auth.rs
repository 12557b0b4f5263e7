//! 파일명 승인 목록
//!
//! 요청받았다는 이유만으로 임의의 로컬 파일이 나가지 않도록
//! 송신 승인과 요청 승인을 1회용으로 관리한다.
//! 같은 이름을 여러 번 등록할 수 있고, 검증은 정확히 하나를 소비한다.

use std::collections::HashMap;

/// 1회용 파일명 승인 목록 (파일명 -> 대기 개수)
#[derive(Debug, Default, Clone)]
pub struct AuthorizationRegistry {
    pending: HashMap<String, usize>,
}

impl AuthorizationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 승인 하나 추가
    pub fn expect(&mut self, filename: &str) {
        *self.pending.entry(filename.to_owned()).or_insert(0) += 1;
    }

    /// 승인 확인 후 하나 소비
    pub fn validate(&mut self, filename: &str) -> bool {
        match self.pending.get_mut(filename) {
            Some(count) => {
                *count -= 1;
                if *count == 0 {
                    self.pending.remove(filename);
                }
                true
            }
            None => false,
        }
    }

    pub fn pending_count(&self, filename: &str) -> usize {
        self.pending.get(filename).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
