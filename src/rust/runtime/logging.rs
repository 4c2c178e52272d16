// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::Logger;
use ::std::sync::Once;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function.
static INIT_LOG: Once = Once::new();

/// Log specification used when `RUST_LOG` is not set.
const DEFAULT_LOG_SPEC: &str = "info";

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features.
///
/// The log level is taken from `RUST_LOG`. Calling this more than once is
/// harmless.
pub fn initialize() {
    INIT_LOG.call_once(|| {
        let logger = match Logger::try_with_env_or_str(DEFAULT_LOG_SPEC) {
            Ok(logger) => logger,
            Err(e) => {
                eprintln!("invalid log specification ({:?})", e);
                return;
            },
        };
        match logger.start() {
            // The handle must outlive every log call in the process.
            Ok(handle) => ::std::mem::forget(handle),
            Err(e) => eprintln!("failed to start logger ({:?})", e),
        }
    });
}
