// Copyright blockvault contributors
// SPDX-License-Identifier: Apache-2.0, MIT

//! Per-file version history: snapshot nodes with inheritance, retention,
//! and a small selector grammar for resolving `name@selector` lookups.

pub mod chain;
pub mod node;
pub mod selector;

pub use chain::VersionChain;
pub use node::VersionNode;
pub use selector::Selector;
