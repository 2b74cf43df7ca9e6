// Copyright (c) 2021, KTH Royal Institute of Technology.
// SPDX-License-Identifier: AGPL-3.0-only

/// Window snapshots and the catalog keeping them
pub mod snapshot;
