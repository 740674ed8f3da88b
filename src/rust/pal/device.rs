// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Traits
//======================================================================================================================

/// Register-level access to the switch core.
///
/// These are the memory-mapped I/O calls the engine consumes but does not implement: engine
/// start/stop, the descriptor fetch trigger, the three ring base registers, and interrupt
/// mask/ack. The completion glue drives them; register programming details stay out of the ring
/// engine entirely.
pub trait DevicePort {
    /// Starts the transmit engine.
    fn start_tx(&mut self);

    /// Stops the transmit engine.
    fn stop_tx(&mut self);

    /// Starts the receive engine.
    fn start_rx(&mut self);

    /// Stops the receive engine.
    fn stop_rx(&mut self);

    /// Triggers a descriptor fetch on the transmit engine. Called after the transmit ring
    /// transitions from empty to non-empty.
    fn kick_tx(&mut self);

    /// Programs the transmit ring base register.
    fn set_tx_base(&mut self, addr: u32);

    /// Programs the receive packet-header ring base register.
    fn set_rx_header_base(&mut self, addr: u32);

    /// Programs the receive buffer-descriptor ring base register.
    fn set_rx_buffer_base(&mut self, addr: u32);

    /// Unmasks completion interrupts.
    fn irq_enable(&mut self);

    /// Masks completion interrupts.
    fn irq_disable(&mut self);

    /// Acknowledges any pending completion interrupt.
    fn irq_ack(&mut self);
}
