// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

pub mod fail;
pub mod gpu;
pub mod logging;
pub mod network;
