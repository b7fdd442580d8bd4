// SPDX-License-Identifier: MIT

//! Core kit - building blocks shared by the scheduler
//!
//! - [status] - the lifecycle vocabulary used by nodes, layers and dags
//! - [event] - status-keyed publish/subscribe dispatch table
//! - [error] - typed error hierarchy

pub mod error;
pub mod event;
pub mod status;
