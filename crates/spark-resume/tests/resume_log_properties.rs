//! ResumeLog 性质验证
//!
//! - **核心目标 (Why)**：容量淘汰、位置重置与重放的正确性取决于帧长与操作顺序的组合，
//!   这里用 Proptest 生成随机操作序列，每一步之后检查日志不变式；
//! - **结构说明 (How)**：`Op` 描述一次发送、接收或重置，`Model` 记录“理论上已发送的全部帧”，
//!   用来核对重放结果恰好是保留帧且与原始字节一致；
//! - **断言清单 (What)**：
//!   1. `retained_bytes <= capacity_bytes`；
//!   2. 帧位置严格递增、首帧位置等于 `first`、末帧结束于 `last`；
//!   3. `last` 始终可用，重放内容与模型一致；
//!   4. 统计仪表与日志自身的计数一致。

use std::sync::Arc;

use bytes::Bytes;
use proptest::prelude::*;
use spark_resume::{FrameType, ResumeBufferGauge, ResumeLog, ResumePosition};

#[derive(Debug, Clone)]
enum Op {
    Send { len: usize, frame_type: FrameType },
    Receive { len: usize, frame_type: FrameType },
    Reset { offset: u64 },
}

fn frame_type() -> impl Strategy<Value = FrameType> {
    prop_oneof![
        4 => Just(FrameType::Payload),
        2 => Just(FrameType::RequestStream),
        1 => Just(FrameType::RequestN),
        1 => Just(FrameType::Keepalive),
        1 => Just(FrameType::MetadataPush),
    ]
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (1usize..160, frame_type()).prop_map(|(len, frame_type)| Op::Send { len, frame_type }),
        1 => (1usize..64, frame_type()).prop_map(|(len, frame_type)| Op::Receive { len, frame_type }),
        2 => (0u64..400).prop_map(|offset| Op::Reset { offset }),
    ]
}

#[derive(Default)]
struct Model {
    sent: Vec<(ResumePosition, Bytes)>,
    next: ResumePosition,
    implied: ResumePosition,
    counter: u8,
}

impl Model {
    fn frame(&mut self, len: usize) -> Bytes {
        self.counter = self.counter.wrapping_add(1);
        Bytes::from(vec![self.counter; len])
    }
}

fn check_invariants(log: &ResumeLog, gauge: &ResumeBufferGauge, model: &Model) {
    assert!(log.retained_bytes() <= log.capacity_bytes());
    assert_eq!(log.last_sent_position(), model.next);
    assert_eq!(log.implied_position(), model.implied);
    assert!(log.first_sent_position() <= log.last_sent_position());
    assert!(log.is_position_available(log.last_sent_position()));

    let positions: Vec<_> = log.positions().collect();
    assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
    match positions.first() {
        Some(first) => assert_eq!(*first, log.first_sent_position()),
        None => assert_eq!(log.first_sent_position(), log.last_sent_position()),
    }

    let expected: Vec<Bytes> = model
        .sent
        .iter()
        .filter(|(position, _)| *position >= log.first_sent_position())
        .map(|(_, frame)| frame.clone())
        .collect();
    let mut replayed = Vec::new();
    log.send_frames_from_position(log.first_sent_position(), &mut replayed);
    assert_eq!(replayed, expected);
    assert_eq!(replayed.iter().map(Bytes::len).sum::<usize>(), log.retained_bytes());

    assert_eq!(gauge.frames(), log.retained_frames() as i64);
    assert_eq!(gauge.bytes(), log.retained_bytes() as i64);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 256, .. ProptestConfig::default() })]

    #[test]
    fn invariants_hold_after_every_operation(
        capacity in 1usize..200,
        ops in prop::collection::vec(op(), 1..64),
    ) {
        let gauge = Arc::new(ResumeBufferGauge::new());
        let mut log = ResumeLog::new(capacity).with_stats(gauge.clone());
        let mut model = Model::default();

        for op in ops {
            match op {
                Op::Send { len, frame_type } => {
                    let frame = model.frame(len);
                    log.track_sent_frame(&frame, frame_type, 1, 0);
                    if frame_type.is_resumable() {
                        model.sent.push((model.next, frame));
                        model.next += len as u64;
                    }
                }
                Op::Receive { len, frame_type } => {
                    log.track_received_frame(len, frame_type, 1, 0);
                    if frame_type.is_resumable() {
                        model.implied += len as u64;
                    }
                }
                Op::Reset { offset } => {
                    log.reset_up_to_position(log.first_sent_position() + offset);
                }
            }
            check_invariants(&log, &gauge, &model);
        }

        drop(log);
        prop_assert_eq!(gauge.frames(), 0);
        prop_assert_eq!(gauge.bytes(), 0);
    }

    #[test]
    fn every_retained_position_replays_its_suffix(
        lens in prop::collection::vec(1usize..40, 1..24),
    ) {
        let mut log = ResumeLog::new(128);
        for (index, len) in lens.iter().enumerate() {
            log.track_sent_frame(&Bytes::from(vec![index as u8; *len]), FrameType::Payload, 3, 0);
        }
        let positions: Vec<_> = log.positions().collect();
        for (index, position) in positions.iter().enumerate() {
            prop_assert!(log.is_position_available(*position));
            let mut sink = Vec::new();
            let replayed = log.send_frames_from_position(*position, &mut sink);
            prop_assert_eq!(replayed, positions.len() - index);
            prop_assert_eq!(sink.len(), replayed);
        }
    }
}
