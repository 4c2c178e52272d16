// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod launch_log;

//==============================================================================
// Macros
//==============================================================================

/// Hot-path trace printed in color when built with `rx-log` and `RX_LOG=all`.
macro_rules! __rx_log {
    ($($arg:tt)*) => {
        #[cfg(feature = "rx-log")]
        if let Ok(val) = ::std::env::var("RX_LOG") {
            if val == "all" {
                eprintln!("{}", ::colored::Colorize::cyan(format!($($arg)*).as_str()));
            }
        }
    };
}

#[allow(unused)]
pub(crate) use __rx_log as rx_log;

//==============================================================================
// Exports
//==============================================================================

pub use self::launch_log::LaunchLog;
