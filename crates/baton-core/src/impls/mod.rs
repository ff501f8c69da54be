//! Impls - ports の実装（開発・テスト・単一プロセス demo 用）
//!
//! どれも 1 プロセス内でだけ linearizable です。共有ストアや実ネットワークの
//! 実装は同じ trait を実装して差し替えます。

pub mod event_sinks;
pub mod handler_pipeline;
pub mod inmem_lease_store;
pub mod inmem_queue;
pub mod inmem_snapshot;
pub mod inmem_task_store;
pub mod loopback_transport;
pub mod static_topology;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::handler_pipeline::{DuplicateHandler, FnHandler, HandlerPipeline, HandlerRegistry, TaskHandler};
pub use self::inmem_lease_store::InMemoryLeaseStore;
pub use self::inmem_queue::InMemoryParticipantQueue;
pub use self::inmem_snapshot::InMemorySnapshotStore;
pub use self::inmem_task_store::InMemoryTaskStore;
pub use self::loopback_transport::LoopbackTransport;
pub use self::static_topology::{RuleManifestMatcher, StaticTopology};
