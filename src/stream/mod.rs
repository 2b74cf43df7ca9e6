// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Processor traits, windows and sinks
pub mod operator;
/// Time sources
pub mod time;
