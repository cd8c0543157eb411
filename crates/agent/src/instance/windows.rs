// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Windows instance lock interface (§4.H): a named mutex in the `Global\`
//! namespace. Not implemented — no Windows toolchain in this corpus to
//! ground a DACL-granting implementation on; kept as a `cfg`-gated surface
//! so callers compile unconditionally against the same API.

use std::path::Path;

use crate::error::InstanceError;

pub struct InstanceHandler;

impl InstanceHandler {
    pub fn try_acquire(_run_dir: &Path) -> Result<Self, InstanceError> {
        Err(InstanceError::Unsupported)
    }
}
