// SPDX-License-Identifier: MIT

//! Layered workflow scheduler
//!
//! - [flow] - definitions, dag model and builder, stores, execution controller
//! - [dispatch] - remote execution of node work on actuators
//! - [config] - scheduler settings
//! - [server] - HTTP control surface

pub mod config;
pub mod dispatch;
pub mod flow;
pub mod server;
