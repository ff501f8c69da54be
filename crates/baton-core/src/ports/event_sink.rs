//! EventSink port - audit / metrics へのイベント記録
//!
//! granularity によるフィルタは呼び出し側（`app::events::EventGate`）が行うので、
//! 実装は届いたイベントをそのまま記録すればよいです。

use crate::domain::DomainEvent;

/// EventSink はドメインイベントを記録
///
/// 記録の失敗で coordination を止めないよう、戻り値はありません。
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &DomainEvent);
}
