//! # claimq
//!
//! Durable work queue on a single Postgres table.
//!
//! Producers [`enqueue`](db::Db::enqueue) messages; any number of workers
//! race to [`claim`](db::Db::process_oldest_task) them with
//! `FOR UPDATE SKIP LOCKED`, run a [`Task`](task::Task), and commit the
//! `PROCESSED` state in the same transaction that held the row lock. A
//! failed task rolls back and leaves the message claimable again.
//! LISTEN/NOTIFY [subscriptions](listener::Subscription) wake idle workers;
//! polling covers missed notifications.

pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod listener;
pub mod model;
pub mod task;
pub mod telemetry;
