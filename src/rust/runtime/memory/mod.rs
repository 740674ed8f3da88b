// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

mod buffer_pool;

pub use self::buffer_pool::{
    DmaBuffer,
    DmaPool,
};
