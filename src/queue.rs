//! Unacknowledged send queue: ordered retention of outbound `DATA` payloads
//! that have been sent but not yet acknowledged by the server.

use std::collections::VecDeque;

/// `(payloadBytes, cumulativeBytesSentAtEnd)` — see `spec.md` §3.
#[derive(Debug, Clone)]
struct UnacknowledgedEntry {
    payload: Vec<u8>,
    cumulative_bytes_sent_at_end: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("ack {new} does not strictly advance past the previous ack {previous}")]
    NotMonotonic { previous: u64, new: u64 },
    #[error("ack {acked_total} exceeds bytes sent total {bytes_sent_total}")]
    ExceedsSent { acked_total: u64, bytes_sent_total: u64 },
    #[error("ack {acked_total} does not land on a frame boundary")]
    NotOnFrameBoundary { acked_total: u64 },
}

/// In-memory ordered queue of outbound frames pending server acknowledgement.
#[derive(Debug, Default)]
pub struct SendQueue {
    entries: VecDeque<UnacknowledgedEntry>,
    bytes_sent_total: u64,
    bytes_acked_total: u64,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a payload that was just handed to the channel successfully.
    pub fn append(&mut self, payload: Vec<u8>) {
        self.bytes_sent_total += payload.len() as u64;
        self.entries.push_back(UnacknowledgedEntry {
            payload,
            cumulative_bytes_sent_at_end: self.bytes_sent_total,
        });
    }

    /// Apply a regular `ACK`: the new value must strictly exceed the
    /// previous `bytesAckedTotal`.
    pub fn trim_to(&mut self, acked_total: u64) -> Result<(), QueueError> {
        self.apply_ack(acked_total, false)
    }

    /// Apply a `RECONNECT_SUCCESS_ACK`: the server's reported cumulative
    /// received-byte count may legitimately equal the current
    /// `bytesAckedTotal` (nothing new acked since the last attempt, e.g.
    /// a resume where nothing was ever acknowledged) without that being a
    /// protocol violation.
    pub fn resume_to(&mut self, acked_total: u64) -> Result<(), QueueError> {
        self.apply_ack(acked_total, true)
    }

    fn apply_ack(&mut self, acked_total: u64, allow_noop: bool) -> Result<(), QueueError> {
        if acked_total < self.bytes_acked_total
            || (acked_total == self.bytes_acked_total && !allow_noop)
        {
            return Err(QueueError::NotMonotonic {
                previous: self.bytes_acked_total,
                new: acked_total,
            });
        }
        if acked_total > self.bytes_sent_total {
            return Err(QueueError::ExceedsSent {
                acked_total,
                bytes_sent_total: self.bytes_sent_total,
            });
        }
        if acked_total == self.bytes_acked_total {
            return Ok(());
        }

        let mut landed = false;
        while let Some(front_end) = self.entries.front().map(|e| e.cumulative_bytes_sent_at_end) {
            if front_end > acked_total {
                break;
            }
            self.entries.pop_front();
            if front_end == acked_total {
                landed = true;
                break;
            }
        }
        if !landed {
            return Err(QueueError::NotOnFrameBoundary { acked_total });
        }
        self.bytes_acked_total = acked_total;
        Ok(())
    }

    /// Ordered payloads of every entry still outstanding, for replay on a
    /// freshly resumed channel.
    pub fn replay_all(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().map(|e| e.payload.as_slice())
    }

    pub fn unacknowledged_count(&self) -> usize {
        self.entries.len()
    }

    pub fn bytes_sent_total(&self) -> u64 {
        self.bytes_sent_total
    }

    pub fn bytes_acked_total(&self) -> u64 {
        self.bytes_acked_total
    }

    /// Aggregate payload length still outstanding. Always equals
    /// `bytes_sent_total - bytes_acked_total` (invariant 2 in `spec.md` §8).
    pub fn outstanding_bytes(&self) -> u64 {
        self.bytes_sent_total - self.bytes_acked_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trims_entries_up_to_boundary_and_updates_acked_total() {
        let mut q = SendQueue::new();
        q.append(vec![0u8; 4]);
        q.append(vec![0u8; 4]);
        q.append(vec![0u8; 4]);
        assert_eq!(q.bytes_sent_total(), 12);

        q.trim_to(4).unwrap();
        assert_eq!(q.unacknowledged_count(), 2);
        assert_eq!(q.bytes_acked_total(), 4);

        q.trim_to(12).unwrap();
        assert_eq!(q.unacknowledged_count(), 0);
        assert_eq!(q.outstanding_bytes(), 0);
    }

    #[test]
    fn rejects_non_monotonic_ack() {
        let mut q = SendQueue::new();
        q.append(vec![0u8; 4]);
        let err = q.trim_to(0).unwrap_err();
        assert_eq!(
            err,
            QueueError::NotMonotonic {
                previous: 0,
                new: 0
            }
        );
    }

    #[test]
    fn rejects_ack_exceeding_bytes_sent() {
        let mut q = SendQueue::new();
        q.append(vec![0u8; 4]);
        let err = q.trim_to(10).unwrap_err();
        assert_eq!(
            err,
            QueueError::ExceedsSent {
                acked_total: 10,
                bytes_sent_total: 4
            }
        );
    }

    #[test]
    fn rejects_ack_off_frame_boundary() {
        let mut q = SendQueue::new();
        q.append(vec![0u8; 4]);
        q.append(vec![0u8; 4]);
        let err = q.trim_to(6).unwrap_err();
        assert_eq!(err, QueueError::NotOnFrameBoundary { acked_total: 6 });
    }

    #[test]
    fn resume_to_zero_is_a_noop_when_nothing_ever_acked() {
        let mut q = SendQueue::new();
        q.append(vec![1, 2, 3]);
        q.resume_to(0).unwrap();
        assert_eq!(q.unacknowledged_count(), 1);
        assert_eq!(q.bytes_acked_total(), 0);
        let replayed: Vec<&[u8]> = q.replay_all().collect();
        assert_eq!(replayed, vec![&[1u8, 2, 3][..]]);
    }

    #[test]
    fn resume_to_rejects_regression() {
        let mut q = SendQueue::new();
        q.append(vec![0u8; 4]);
        q.trim_to(4).unwrap();
        let err = q.resume_to(0).unwrap_err();
        assert_eq!(
            err,
            QueueError::NotMonotonic {
                previous: 4,
                new: 0
            }
        );
    }

    #[test]
    fn replay_all_preserves_submission_order() {
        let mut q = SendQueue::new();
        q.append(b"a".to_vec());
        q.append(b"b".to_vec());
        q.append(b"c".to_vec());
        let replayed: Vec<&[u8]> = q.replay_all().collect();
        assert_eq!(replayed, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }
}
