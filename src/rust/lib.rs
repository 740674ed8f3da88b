// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

#![cfg_attr(feature = "strict", deny(warnings))]
#![deny(clippy::all)]

#[macro_use]
extern crate log;

pub mod config;
pub mod irq;
pub mod pal;
pub mod ring;
pub mod runtime;

pub use self::{
    config::RingConfig,
    irq::{
        IrqGlue,
        StackPort,
    },
    pal::{
        CacheOps,
        CoherentCache,
        DevicePort,
    },
    ring::{
        slot::SlotOwner,
        stats::RingStats,
        RingEngine,
        TxFrame,
    },
    runtime::memory::{
        DmaBuffer,
        DmaPool,
    },
};

//======================================================================================================================
// Macros
//======================================================================================================================

/// Ensures that two expressions are equal, bailing out of the calling test with a descriptive
/// error when they are not. Intended for tests that return [`anyhow::Result`].
#[macro_export]
macro_rules! ensure_eq {
    ($left:expr, $right:expr) => {{
        let left = &$left;
        let right = &$right;
        if left != right {
            ::anyhow::bail!(
                "ensure_eq failed: `{} == {}` (left: `{:?}`, right: `{:?}`)",
                stringify!($left),
                stringify!($right),
                left,
                right
            );
        }
    }};
}
