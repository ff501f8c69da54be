//! Ports - 抽象化レイヤー
//!
//! このモジュールは Hexagonal Architecture の「ポート」を定義します。
//! 各 trait は共有ストア・ノード間 transport・処理パイプラインなどへの
//! インターフェースを提供し、実装の詳細を隠蔽します。
//!
//! # 設計原則
//! - 共有状態（job card, task record, queue）は条件付き操作でのみ変更する
//! - 時刻と ID は Clock / IdGenerator 経由で取得する（テストで固定できる）

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod lease_store;
pub mod participant_queue;
pub mod pipeline;
pub mod snapshot_store;
pub mod task_store;
pub mod topology;
pub mod transport;

// 主要な trait を再エクスポート
pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::lease_store::LeaseStore;
pub use self::participant_queue::ParticipantQueue;
pub use self::pipeline::{PipelineError, ProcessingPipeline};
pub use self::snapshot_store::SnapshotStore;
pub use self::task_store::TaskStore;
pub use self::topology::{ManifestMatcher, Topology};
pub use self::transport::{HandoverInbox, HandoverTransport};
