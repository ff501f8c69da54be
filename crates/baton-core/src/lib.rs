//! baton-core
//!
//! Core building blocks for distributed task coordination: sequenced tasks,
//! per-participant queues, job-card leases with a recovery watchdog, and an
//! at-least-once handover protocol between nodes.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, sequence, task, state, oversight, record, job_card, handover, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, LeaseStore, ParticipantQueue, HandoverTransport, ProcessingPipeline, など）
//! - **app**: アプリケーションロジック（broker, lease_manager, worker_loop, watchdog_loop, handover, builder, など）
//! - **impls**: 実装（InMemoryLeaseStore, LoopbackTransport など開発用）
//! - **config**: 設定の読み込み（defaults + file + env）
//! - **observability**: tracing subscriber の初期化

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;

pub use app::{Coordinator, CoordinatorBuilder};
pub use config::BatonConfig;
pub use domain::CoordinationError;
