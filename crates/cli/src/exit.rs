// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Exit-code policy: 0 clean, 1 configuration error, 2 runtime fatal.

use cuckoo_daemon::{ConfigError, LifecycleError};

/// Map an error chain to the process exit code.
pub fn code_for(error: &anyhow::Error) -> i32 {
    for cause in error.chain() {
        if cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<cuckoo_core::CwdError>().is_some()
            || cause.downcast_ref::<cuckoo_machinery::MachineryConfError>().is_some()
            || matches!(
                cause.downcast_ref::<LifecycleError>(),
                Some(LifecycleError::Config(_)) | Some(LifecycleError::Machinery(_))
            )
        {
            return 1;
        }
    }
    2
}

#[cfg(test)]
#[path = "exit_tests.rs"]
mod tests;
