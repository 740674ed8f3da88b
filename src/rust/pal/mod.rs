// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

mod cache;
mod device;

pub use self::{
    cache::{
        CacheOps,
        CoherentCache,
    },
    device::DevicePort,
};

//======================================================================================================================
// Constants
//======================================================================================================================

cfg_if::cfg_if! {
    if #[cfg(any(target_arch = "x86", target_arch = "x86_64", target_arch = "aarch64"))] {
        /// Size of a data cache line, in bytes.
        pub const CPU_DATA_CACHE_LINE_SIZE: usize = 64;
    } else {
        /// Size of a data cache line, in bytes. The reference switch cores sit behind 32-byte-line
        /// MIPS and ARM9 CPUs.
        pub const CPU_DATA_CACHE_LINE_SIZE: usize = 32;
    }
}

//======================================================================================================================
// Standalone Functions
//======================================================================================================================

/// Translates a CPU pointer into the 32-bit bus address the switch core dereferences. The
/// reference platform identity-maps low memory; ports with an IOMMU or a fixed DMA window supply
/// their own translation behind this call.
pub fn bus_addr(ptr: *const u8) -> u32 {
    ptr as usize as u32
}
