//! 패킷 번호 코덱
//!
//! 패킷 번호 필드 하나에 순번과 EOF 플래그를 함께 담는다.
//! - 최상위 비트: 마지막 패킷 플래그
//! - 상위 4비트: 예약 (순번 비교 시 제거)
//! - 하위 28비트: 순번

use bytes::{BufMut, Bytes, BytesMut};

/// 와이어 패킷 번호 (플래그 포함)
pub type RawPacketNum = u32;

/// 마지막 패킷 플래그
pub const LAST_PACKET_FLAG: u32 = 0x8000_0000;

/// 순번 마스크 (예약 비트 제거)
pub const PACKET_NUM_MASK: u32 = 0x0FFF_FFFF;

/// 첫 패킷 앞에 붙는 전체 크기 필드 길이
pub const SIZE_PREFIX_LEN: usize = 4;

/// 순번 + EOF 플래그 인코딩
pub fn encode_packet_num(seq: u32, last: bool) -> RawPacketNum {
    let seq = seq & PACKET_NUM_MASK;
    if last {
        seq | LAST_PACKET_FLAG
    } else {
        seq
    }
}

/// 예약 비트를 제거한 순번
pub fn decode_packet_num(raw: RawPacketNum) -> u32 {
    raw & PACKET_NUM_MASK
}

/// 마지막 패킷 여부
pub fn is_last_packet(raw: RawPacketNum) -> bool {
    raw & LAST_PACKET_FLAG != 0
}

/// 첫 패킷 페이로드 생성 (전체 크기 prefix + 데이터)
pub fn encode_first_payload(total_size: u32, data: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(SIZE_PREFIX_LEN + data.len());
    buf.put_u32_le(total_size);
    buf.extend_from_slice(data);
    buf.freeze()
}

/// 첫 패킷 페이로드 분리
///
/// prefix보다 짧으면 `None`
pub fn split_first_payload(payload: &Bytes) -> Option<(u32, Bytes)> {
    if payload.len() < SIZE_PREFIX_LEN {
        return None;
    }
    let total_size = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Some((total_size, payload.slice(SIZE_PREFIX_LEN..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_num_round_trip() {
        for seq in [0u32, 1, 2, 999, PACKET_NUM_MASK] {
            assert_eq!(decode_packet_num(encode_packet_num(seq, false)), seq);
            assert_eq!(decode_packet_num(encode_packet_num(seq, true)), seq);
            assert!(is_last_packet(encode_packet_num(seq, true)));
            assert!(!is_last_packet(encode_packet_num(seq, false)));
        }
    }

    #[test]
    fn test_reserved_bits_stripped() {
        let raw = 0x7000_0005;
        assert_eq!(decode_packet_num(raw), 5);
        assert!(!is_last_packet(raw));
    }

    #[test]
    fn test_first_payload() {
        let payload = encode_first_payload(3, b"abc");
        let (size, data) = split_first_payload(&payload).unwrap();
        assert_eq!(size, 3);
        assert_eq!(&data[..], b"abc");

        let empty = encode_first_payload(0, &[]);
        assert_eq!(empty.len(), SIZE_PREFIX_LEN);
        assert_eq!(split_first_payload(&empty).unwrap().1.len(), 0);

        assert!(split_first_payload(&Bytes::from_static(b"ab")).is_none());
    }
}
