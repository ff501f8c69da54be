//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **CoordinatorBuilder / Coordinator**: ワイヤリングと外部向け操作
//! - **TaskBroker**: タスクの生成・enqueue・取消・結果報告
//! - **LeaseManager**: job card の取得・更新・解放
//! - **WorkerGroup / Executor**: take_next→acquire→process(+heartbeat)→report
//! - **WatchdogLoop**: 期限切れ lease の回収と再投入
//! - **HandoverSender / HandoverReceiver**: ノード間の受け渡し
//! - **SnapshotFlusher**: write-behind 永続化と FINALISED への遷移

pub mod broker;
pub mod builder;
pub mod events;
pub mod handover;
pub mod lease_manager;
pub mod persister_loop;
pub mod records;
pub mod retry;
pub mod sequencer;
pub mod status;
pub mod watchdog_loop;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::broker::{OutcomeReport, TaskBroker};
pub use self::builder::{BuildError, Coordinator, CoordinatorBuilder, SubmitOutcome};
pub use self::events::EventGate;
pub use self::handover::{HandoverReceipt, HandoverReceiver, HandoverSender, SendPolicy};
pub use self::lease_manager::LeaseManager;
pub use self::persister_loop::{FlushReport, SnapshotFlusher};
pub use self::retry::RetryPolicy;
pub use self::sequencer::SequenceGenerator;
pub use self::status::TaskCounts;
pub use self::watchdog_loop::{ScanReport, WatchdogLoop};
pub use self::worker_loop::{Executor, ExecutorSettings, RunOutcome, WorkerGroup};
