//! 共享状态机的状态标签。
//!
//! 每个状态占用独立的比特位，便于以掩码形式表达“允许的状态集合”：
//!
//! ```text
//! Start --(P set_result)--> OnlyResult --(C set_callback)--> Done
//! Start --(C set_callback)--> OnlyCallback | OnlyCallbackAllowInline --(P set_result)--> Done
//! Start --(P set_proxy)--> Proxy --(C set_callback)--> Empty
//! OnlyCallback | OnlyCallbackAllowInline --(P set_proxy)--> Empty
//! ```

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoreState {
    Start = 1 << 0,
    OnlyResult = 1 << 1,
    OnlyCallback = 1 << 2,
    OnlyCallbackAllowInline = 1 << 3,
    Proxy = 1 << 4,
    Done = 1 << 5,
    Empty = 1 << 6,
}

impl CoreState {
    pub(crate) const RESULT_READABLE: u8 = Self::OnlyResult.bits() | Self::Done.bits();
    pub(crate) const CALLBACK_ATTACHED: u8 = Self::OnlyCallback.bits()
        | Self::OnlyCallbackAllowInline.bits()
        | Self::Done.bits()
        | Self::Empty.bits();
    pub(crate) const AWAITING_RESULT: u8 =
        Self::OnlyCallback.bits() | Self::OnlyCallbackAllowInline.bits();

    pub const fn bits(self) -> u8 {
        self as u8
    }

    /// 把原始比特还原为状态；非法比特说明内存已被破坏，直接终止。
    pub(crate) fn from_bits(bits: u8) -> Self {
        match bits {
            0x01 => Self::Start,
            0x02 => Self::OnlyResult,
            0x04 => Self::OnlyCallback,
            0x08 => Self::OnlyCallbackAllowInline,
            0x10 => Self::Proxy,
            0x20 => Self::Done,
            0x40 => Self::Empty,
            other => panic!("shared state protocol violation: corrupted state bits {other:#04x}"),
        }
    }

    pub const fn is_in(self, mask: u8) -> bool {
        self.bits() & mask != 0
    }

    /// 是否为终态（不会再发生任何迁移）。
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Empty)
    }
}

/// 回调是否允许在完成方所在执行器上就地运行。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineContinuation {
    /// 完成方与回调绑定的执行器相同时就地运行。
    Permit,
    /// 总是重新投递。
    #[default]
    Forbid,
}

impl InlineContinuation {
    pub(crate) const fn awaiting_state(self) -> CoreState {
        match self {
            Self::Permit => CoreState::OnlyCallbackAllowInline,
            Self::Forbid => CoreState::OnlyCallback,
        }
    }

    pub(crate) const fn from_awaiting(state: CoreState) -> Self {
        match state {
            CoreState::OnlyCallbackAllowInline => Self::Permit,
            _ => Self::Forbid,
        }
    }
}
