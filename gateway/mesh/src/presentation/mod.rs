// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! | Module | Contents |
//! |--------|----------|
//! | [`api`] | Messaging routes, merged into the gateway router by the daemon |

pub mod api;
