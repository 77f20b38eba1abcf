//! 重连握手中对续传日志的判定。
//!
//! # 契约说明（What）
//! - 服务端收到 RESUME：客户端位置未声明，或不超过本端 `implied` 位置，且服务端位置可用时接受；
//!   接受后先回 RESUME_OK（携带 `implied` 位置），再从服务端位置重放；
//! - 客户端收到 RESUME_OK：对端声明的位置必须在本端日志中可用；
//! - 保活帧携带的位置是对端已确认的进度，据此释放日志前缀。

use tracing::{debug, warn};

use crate::{
    error::ResumeError,
    frame::ResumePosition,
    manager::ResumeManager,
    transport::FrameSink,
};

const TARGET: &str = "spark_resume::log";

/// 握手时两端缓冲状态的快照，用于观测。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeReport {
    /// 本端已接收而客户端声称已发送的差值；客户端未声明位置时为 `None`。
    pub client_available: Option<i64>,
    /// 本端保留可重放的字节数。
    pub server_available: i64,
    /// 客户端尚未收到的字节数。
    pub server_delta: i64,
}

impl ResumeReport {
    pub fn compute<M: ResumeManager + ?Sized>(
        manager: &M,
        server_position: ResumePosition,
        client_position: Option<ResumePosition>,
    ) -> Self {
        let signed = |position: ResumePosition| i64::try_from(position).unwrap_or(i64::MAX);
        Self {
            client_available: client_position
                .map(|client| signed(manager.implied_position()) - signed(client)),
            server_available: signed(manager.last_sent_position())
                - signed(manager.first_sent_position()),
            server_delta: signed(manager.last_sent_position()) - signed(server_position),
        }
    }
}

/// 服务端接受续传的结论。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeAccepted {
    /// 写入 RESUME_OK 的位置。
    pub implied_position: ResumePosition,
    /// 重放起点。
    pub replay_from: ResumePosition,
    pub report: ResumeReport,
}

/// 判定服务端能否接受续传，不产生副作用。
pub fn evaluate_server_resume<M: ResumeManager + ?Sized>(
    manager: &M,
    server_position: ResumePosition,
    client_position: Option<ResumePosition>,
) -> Result<ResumeAccepted, ResumeError> {
    let report = ResumeReport::compute(manager, server_position, client_position);
    let implied_position = manager.implied_position();
    if let Some(client_position) = client_position
        && client_position > implied_position
    {
        warn!(
            target: TARGET,
            client_position, implied_position, "cannot resume server, client position is ahead"
        );
        return Err(ResumeError::ClientPositionAhead {
            client_position,
            implied_position,
        });
    }
    ensure_available(manager, server_position)?;
    Ok(ResumeAccepted {
        implied_position,
        replay_from: server_position,
        report,
    })
}

/// 判定并在接受时立即重放。
pub fn resume_server<M: ResumeManager + ?Sized>(
    manager: &M,
    server_position: ResumePosition,
    client_position: Option<ResumePosition>,
    sink: &mut dyn FrameSink,
) -> Result<ResumeAccepted, ResumeError> {
    let accepted = evaluate_server_resume(manager, server_position, client_position)?;
    let replayed = manager.send_frames_from_position(accepted.replay_from, sink);
    debug!(target: TARGET, replayed, report = ?accepted.report, "server resumed");
    Ok(accepted)
}

/// 客户端收到 RESUME_OK 时校验对端位置。
pub fn evaluate_resume_ok<M: ResumeManager + ?Sized>(
    manager: &M,
    position: ResumePosition,
) -> Result<(), ResumeError> {
    ensure_available(manager, position)
}

/// 位置可用时重放并返回帧数，否则返回错误且不触碰传输端。
pub fn replay_or_reject<M: ResumeManager + ?Sized>(
    manager: &M,
    position: ResumePosition,
    sink: &mut dyn FrameSink,
) -> Result<usize, ResumeError> {
    ensure_available(manager, position)?;
    Ok(manager.send_frames_from_position(position, sink))
}

/// 处理保活帧携带的已确认位置。
pub fn apply_keepalive<M: ResumeManager + ?Sized>(manager: &mut M, position: ResumePosition) {
    manager.reset_up_to_position(position);
}

fn ensure_available<M: ResumeManager + ?Sized>(
    manager: &M,
    position: ResumePosition,
) -> Result<(), ResumeError> {
    if manager.is_position_available(position) {
        return Ok(());
    }
    warn!(
        target: TARGET,
        position,
        first_available = manager.first_sent_position(),
        last_sent = manager.last_sent_position(),
        "resume position is not available"
    );
    Err(ResumeError::PositionUnavailable {
        position,
        first_available: manager.first_sent_position(),
        last_sent: manager.last_sent_position(),
    })
}
