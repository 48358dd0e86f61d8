// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod list;
pub mod prune;
pub mod run;

pub use list::list_command;
pub use prune::prune_command;
pub use run::run_command;
