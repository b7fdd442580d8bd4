// SPDX-License-Identifier: MIT

pub mod builder;
pub mod dag;
pub mod executor;
pub mod loader;
pub mod store;
pub mod types;
