// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Macros
//==============================================================================

macro_rules! engine_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(usize);

        impl From<usize> for $name {
            fn from(val: usize) -> Self {
                $name(val)
            }
        }

        impl From<$name> for usize {
            fn from(val: $name) -> Self {
                val.0
            }
        }
    };
}

//==============================================================================
// Structures
//==============================================================================

engine_handle!(
    /// Execution Stream Handle
    ///
    /// Work submitted to the same stream completes in submission order.
    StreamId
);

engine_handle!(
    /// Completion Event Handle
    EventId
);

engine_handle!(
    /// Device Buffer Handle
    DeviceBufferId
);
