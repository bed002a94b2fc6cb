//! 内部 sealed 模块用于控制外部扩展边界。
//!
//! # 设计背景（Why）
//! - `ripple-core` 向外暴露若干可实现的契约 Trait，需要在 SemVer 框架下保持未来演进空间。
//! - 通过统一的 `Sealed` 标记，我们能够在不破坏公开 API 的情况下，为框架自有 Trait
//!   增加默认方法或强化约束。
//!
//! # 逻辑解析（How）
//! - 定义私有模块级 Trait `Sealed`，并对所有类型提供 blanket 实现。
//! - 框架自有（不希望外部实现语义漂移的）Trait 通过 `: crate::sealed::Sealed`
//!   间接依赖该标记。
//!
//! # 契约说明（What）
//! - `Sealed` 无需调用方显式实现；任意类型默认满足该约束。
//!
//! # 风险与考量（Trade-offs）
//! - Blanket 实现意味着当前不会限制实现者；若未来收紧条件，需要同步发布兼容性公告。
pub(crate) trait Sealed {}

impl<T: ?Sized> Sealed for T {}
