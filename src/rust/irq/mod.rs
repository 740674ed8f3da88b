// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Imports
//======================================================================================================================

use crate::{
    config::RingConfig,
    pal::DevicePort,
    ring::{
        RingEngine,
        TxFrame,
    },
    runtime::{
        fail::Fail,
        memory::DmaBuffer,
    },
};
use ::std::time::{
    Duration,
    Instant,
};

//======================================================================================================================
// Traits
//======================================================================================================================

/// The network-stack hand-off point.
///
/// Completed receive buffers and released transmit frames flow up through here, and the
/// backpressure policy signals the stack's producer side to stop and resume offering packets.
/// Receive buffers identify their origin pool themselves, so the stack returns memory by simply
/// dropping the [`DmaBuffer`] when done.
pub trait StackPort {
    /// Hands one received packet upward.
    fn deliver(&mut self, buffer: DmaBuffer, len: usize);

    /// Releases one transmitted (or force-reset) frame back to its producer.
    fn release(&mut self, frame: TxFrame);

    /// Tells the producer to stop offering packets.
    fn pause_tx(&mut self);

    /// Tells the producer to resume offering packets.
    fn resume_tx(&mut self);
}

//======================================================================================================================
// Structures
//======================================================================================================================

/// Bridges hardware completion signals to ring reclaim and the network-stack hand-off.
///
/// Driven from three serialized paths: the producer's [`IrqGlue::send`], the interrupt (or
/// fallback timer) firing [`IrqGlue::interrupt`]/[`IrqGlue::timer_tick`], and the watchdog hidden
/// inside the timer path. Nothing here blocks; a poll pass is bounded by the configured budget
/// and interrupts stay masked while passes are still pending (work-conserving, no interrupt
/// storms under load).
pub struct IrqGlue {
    /// The ring pair.
    engine: RingEngine,
    /// Switch core registers.
    device: Box<dyn DevicePort>,
    /// Network-stack hand-off.
    stack: Box<dyn StackPort>,
    /// Maximum packets per poll pass.
    poll_budget: usize,
    /// Pause the producer below this many free transmit slots.
    stop_threshold: usize,
    /// Resume the producer at this many free transmit slots.
    wake_threshold: usize,
    /// Transmit stall tolerance.
    watchdog_timeout: Duration,
    /// Whether the producer is currently paused.
    paused: bool,
    /// Whether a budget-exhausted poll pass left work behind.
    poll_pending: bool,
    /// Last time the transmit ring made forward progress while occupied.
    last_progress: Instant,
}

//======================================================================================================================
// Associated Functions
//======================================================================================================================

impl IrqGlue {
    /// Wires the engine to the device: programs the three ring base registers, starts both
    /// engines, and unmasks interrupts.
    pub fn bring_up(
        engine: RingEngine,
        mut device: Box<dyn DevicePort>,
        stack: Box<dyn StackPort>,
        config: &RingConfig,
        now: Instant,
    ) -> Self {
        device.set_tx_base(engine.tx_base_addr());
        device.set_rx_header_base(engine.rx_header_base_addr());
        device.set_rx_buffer_base(engine.rx_buffer_base_addr());
        device.start_rx();
        device.start_tx();
        device.irq_enable();

        Self {
            engine,
            device,
            stack,
            poll_budget: config.poll_budget,
            stop_threshold: config.stop_threshold,
            wake_threshold: config.wake_threshold,
            watchdog_timeout: config.watchdog_timeout,
            paused: false,
            poll_pending: false,
            last_progress: now,
        }
    }

    /// Producer entry point: submits one frame, kicks the device's fetch trigger on the
    /// empty-to-non-empty transition, and applies backpressure when free capacity runs low. A
    /// saturated ring surfaces as `EAGAIN` after pausing the producer; retry is reclaim-driven.
    pub fn send(&mut self, frame: TxFrame, now: Instant) -> Result<(), Fail> {
        match self.engine.submit(frame) {
            Ok(was_empty) => {
                if was_empty {
                    // A fresh burst: the stall window starts here, not at the last reclaim.
                    self.last_progress = now;
                    self.device.kick_tx();
                }
                if !self.paused && self.engine.free_count() < self.stop_threshold {
                    debug!("backpressure: pausing producer at {} free slots", self.engine.free_count());
                    self.paused = true;
                    self.stack.pause_tx();
                }
                Ok(())
            },
            Err(e) if e.errno == libc::EAGAIN => {
                if !self.paused {
                    self.paused = true;
                    self.stack.pause_tx();
                }
                Err(e)
            },
            Err(e) => Err(e),
        }
    }

    /// Interrupt entry point: masks and acknowledges the interrupt, runs one poll pass, and
    /// unmasks only if the pass finished with budget to spare. An exhausted budget leaves the
    /// interrupt masked and schedules the fallback timer to continue instead.
    pub fn interrupt(&mut self, now: Instant) {
        self.device.irq_disable();
        self.device.irq_ack();

        if self.poll_pass(now) {
            self.poll_pending = true;
        } else {
            self.poll_pending = false;
            self.device.irq_enable();
        }
    }

    /// Periodic fallback: continues pending poll passes, covers missed interrupts, and runs the
    /// transmit watchdog. Returns whether the watchdog had to reset the ring.
    pub fn timer_tick(&mut self, now: Instant) -> bool {
        let had_pending: bool = self.poll_pending;
        if self.poll_pass(now) {
            self.poll_pending = true;
        } else if had_pending {
            self.poll_pending = false;
            self.device.irq_enable();
        }

        let stalled: bool = self.engine.tx_in_flight() > 0
            && now.duration_since(self.last_progress) >= self.watchdog_timeout;
        if stalled {
            self.watchdog_reset(now);
        }
        stalled
    }

    /// Whether the producer is currently paused by backpressure.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// The underlying ring engine, read-only.
    pub fn engine(&self) -> &RingEngine {
        &self.engine
    }

    /// One bounded poll pass: receive up to the budget, then reclaim transmits. Returns whether
    /// the receive budget was exhausted (more work may remain).
    fn poll_pass(&mut self, now: Instant) -> bool {
        let budget: usize = self.poll_budget;

        let stack: &mut dyn StackPort = self.stack.as_mut();
        let delivered: usize = self.engine.poll(budget, |buffer, len| stack.deliver(buffer, len));
        let (packets, _bytes): (usize, usize) = self.engine.reclaim(|frame| stack.release(frame));

        if packets > 0 {
            self.last_progress = now;
        }
        self.maybe_resume();

        delivered == budget
    }

    /// Resumes the producer once free capacity clears the wake threshold. The gap between stop
    /// and wake thresholds keeps the producer from thrashing at the boundary.
    fn maybe_resume(&mut self) {
        if self.paused && self.engine.free_count() >= self.wake_threshold {
            debug!("backpressure: resuming producer at {} free slots", self.engine.free_count());
            self.paused = false;
            self.stack.resume_tx();
        }
    }

    /// Stall recovery: stop the transmit engine, force-release everything in flight, put the
    /// ring back to its initial state, re-announce the base address, and restart. The device is
    /// assumed unresponsive, so nothing waits on it.
    fn watchdog_reset(&mut self, now: Instant) {
        warn!(
            "tx watchdog: no completion progress for {:?} with {} frames in flight, resetting",
            self.watchdog_timeout,
            self.engine.tx_in_flight()
        );
        self.device.stop_tx();

        let stack: &mut dyn StackPort = self.stack.as_mut();
        self.engine.tx_reset(|frame| stack.release(frame));

        self.device.set_tx_base(self.engine.tx_base_addr());
        self.device.start_tx();
        self.last_progress = now;
        self.maybe_resume();
    }
}

//======================================================================================================================
// Test Accessors
//======================================================================================================================

#[cfg(test)]
impl IrqGlue {
    /// The underlying ring engine, for the simulated device side.
    pub(crate) fn engine_mut(&mut self) -> &mut RingEngine {
        &mut self.engine
    }
}

//======================================================================================================================
// Unit Tests
//======================================================================================================================

#[cfg(test)]
mod tests {
    use super::{
        IrqGlue,
        StackPort,
    };
    use crate::{
        config::RingConfig,
        ensure_eq,
        pal::{
            CoherentCache,
            DevicePort,
        },
        ring::{
            testing::SimSwitch,
            RingEngine,
            TxFrame,
        },
        runtime::memory::{
            DmaBuffer,
            DmaPool,
        },
    };
    use ::anyhow::{
        ensure,
        Result,
    };
    use ::std::{
        cell::RefCell,
        rc::Rc,
        time::{
            Duration,
            Instant,
        },
    };

    /// Everything the mock collaborators observed.
    #[derive(Default)]
    struct Record {
        delivered: Vec<usize>,
        released: Vec<u64>,
        pauses: usize,
        resumes: usize,
        kicks: usize,
        irq_enables: usize,
        irq_disables: usize,
        irq_acks: usize,
        tx_starts: usize,
        tx_stops: usize,
        rx_starts: usize,
        base_writes: Vec<(&'static str, u32)>,
    }

    type SharedRecord = Rc<RefCell<Record>>;

    struct TestStack {
        record: SharedRecord,
    }

    struct TestDevice {
        record: SharedRecord,
    }

    impl StackPort for TestStack {
        fn deliver(&mut self, buffer: DmaBuffer, len: usize) {
            self.record.borrow_mut().delivered.push(len);
            drop(buffer);
        }

        fn release(&mut self, frame: TxFrame) {
            self.record.borrow_mut().released.push(frame.token);
        }

        fn pause_tx(&mut self) {
            self.record.borrow_mut().pauses += 1;
        }

        fn resume_tx(&mut self) {
            self.record.borrow_mut().resumes += 1;
        }
    }

    impl DevicePort for TestDevice {
        fn start_tx(&mut self) {
            self.record.borrow_mut().tx_starts += 1;
        }

        fn stop_tx(&mut self) {
            self.record.borrow_mut().tx_stops += 1;
        }

        fn start_rx(&mut self) {
            self.record.borrow_mut().rx_starts += 1;
        }

        fn stop_rx(&mut self) {}

        fn kick_tx(&mut self) {
            self.record.borrow_mut().kicks += 1;
        }

        fn set_tx_base(&mut self, addr: u32) {
            self.record.borrow_mut().base_writes.push(("tx", addr));
        }

        fn set_rx_header_base(&mut self, addr: u32) {
            self.record.borrow_mut().base_writes.push(("rx_header", addr));
        }

        fn set_rx_buffer_base(&mut self, addr: u32) {
            self.record.borrow_mut().base_writes.push(("rx_buffer", addr));
        }

        fn irq_enable(&mut self) {
            self.record.borrow_mut().irq_enables += 1;
        }

        fn irq_disable(&mut self) {
            self.record.borrow_mut().irq_disables += 1;
        }

        fn irq_ack(&mut self) {
            self.record.borrow_mut().irq_acks += 1;
        }
    }

    fn test_config() -> RingConfig {
        RingConfig {
            tx_ring_size: 8,
            rx_ring_size: 4,
            rx_bd_ring_size: 4,
            poll_budget: 2,
            stop_threshold: 2,
            wake_threshold: 4,
            watchdog_timeout: Duration::from_secs(2),
            ..RingConfig::default()
        }
    }

    fn make_glue(config: &RingConfig) -> Result<(IrqGlue, SharedRecord)> {
        let record: SharedRecord = Rc::new(RefCell::new(Record::default()));
        let pool: DmaPool = DmaPool::create(config.buffer_size, 16)?;
        let engine: RingEngine = RingEngine::create(config, pool, Rc::new(CoherentCache))?;
        let glue: IrqGlue = IrqGlue::bring_up(
            engine,
            Box::new(TestDevice {
                record: record.clone(),
            }),
            Box::new(TestStack {
                record: record.clone(),
            }),
            config,
            Instant::now(),
        );
        Ok((glue, record))
    }

    fn frame(len: u16, token: u64) -> TxFrame {
        TxFrame {
            payload: vec![0u8; len as usize].into_boxed_slice(),
            len,
            vlan: 0,
            port_mask: 0x01,
            token,
        }
    }

    #[test]
    fn bring_up_programs_the_device() -> Result<()> {
        let config: RingConfig = test_config();
        let (_glue, record) = make_glue(&config)?;

        let record = record.borrow();
        let names: Vec<&str> = record.base_writes.iter().map(|(name, _)| *name).collect();
        ensure_eq!(names, vec!["tx", "rx_header", "rx_buffer"]);
        ensure_eq!(record.rx_starts, 1);
        ensure_eq!(record.tx_starts, 1);
        ensure_eq!(record.irq_enables, 1);
        Ok(())
    }

    #[test]
    fn send_kicks_only_on_empty_transition() -> Result<()> {
        let config: RingConfig = test_config();
        let (mut glue, record) = make_glue(&config)?;
        let now: Instant = Instant::now();

        glue.send(frame(100, 1), now)?;
        glue.send(frame(100, 2), now)?;
        ensure_eq!(record.borrow().kicks, 1);

        // Drain the ring; the next send is an empty transition again.
        let mut sim: SimSwitch = SimSwitch::new();
        sim.complete_tx(glue.engine_mut(), 2);
        glue.interrupt(now);
        glue.send(frame(100, 3), now)?;
        ensure_eq!(record.borrow().kicks, 2);
        Ok(())
    }

    #[test]
    fn backpressure_pauses_and_resumes_with_hysteresis() -> Result<()> {
        let config: RingConfig = test_config();
        let (mut glue, record) = make_glue(&config)?;
        let mut sim: SimSwitch = SimSwitch::new();
        let now: Instant = Instant::now();

        // 7 usable slots; free count drops below the stop threshold (2) at the sixth send.
        for token in 0..6 {
            glue.send(frame(100, token), now)?;
        }
        ensure!(glue.is_paused());
        ensure_eq!(record.borrow().pauses, 1);

        // One completion brings free count to 2: below the wake threshold, still paused.
        sim.complete_tx(glue.engine_mut(), 1);
        glue.interrupt(now);
        ensure_eq!(glue.engine().free_count(), 2);
        ensure!(glue.is_paused());
        ensure_eq!(record.borrow().resumes, 0);

        // Two more completions reach the wake threshold (4): resumed exactly once.
        sim.complete_tx(glue.engine_mut(), 2);
        glue.interrupt(now);
        ensure_eq!(glue.engine().free_count(), 4);
        ensure!(!glue.is_paused());
        ensure_eq!(record.borrow().resumes, 1);
        ensure_eq!(record.borrow().pauses, 1);
        Ok(())
    }

    #[test]
    fn saturated_ring_pauses_and_surfaces_eagain() -> Result<()> {
        let config: RingConfig = test_config();
        let (mut glue, record) = make_glue(&config)?;
        let now: Instant = Instant::now();

        for token in 0..7 {
            glue.send(frame(100, token), now)?;
        }
        let err = glue.send(frame(100, 99), now).unwrap_err();
        ensure_eq!(err.errno, libc::EAGAIN);
        ensure!(glue.is_paused());
        ensure_eq!(record.borrow().pauses, 1);
        Ok(())
    }

    #[test]
    fn exhausted_poll_budget_defers_interrupt_enable() -> Result<()> {
        let config: RingConfig = test_config();
        let (mut glue, record) = make_glue(&config)?;
        let mut sim: SimSwitch = SimSwitch::new();
        let now: Instant = Instant::now();

        // Three packets against a budget of two: the first pass exhausts its budget.
        for _ in 0..3 {
            ensure!(sim.deliver_rx(glue.engine_mut(), 100));
        }
        let enables_before: usize = record.borrow().irq_enables;
        glue.interrupt(now);
        ensure_eq!(record.borrow().irq_disables, 1);
        ensure_eq!(record.borrow().irq_acks, 1);
        // Work-conserving: interrupts stay masked while a pass is pending.
        ensure_eq!(record.borrow().irq_enables, enables_before);
        ensure_eq!(record.borrow().delivered.len(), 2);

        // The fallback timer finishes the job and unmasks.
        glue.timer_tick(now);
        ensure_eq!(record.borrow().delivered.len(), 3);
        ensure_eq!(record.borrow().irq_enables, enables_before + 1);
        Ok(())
    }

    #[test]
    fn watchdog_resets_a_stuck_ring_once() -> Result<()> {
        let config: RingConfig = test_config();
        let (mut glue, record) = make_glue(&config)?;
        let start: Instant = Instant::now();

        for token in 0..3 {
            glue.send(frame(100, token), start)?;
        }

        // Within the stall tolerance nothing happens.
        ensure!(!glue.timer_tick(start + Duration::from_millis(500)));
        ensure_eq!(record.borrow().tx_stops, 0);

        // Past it, the ring resets: stop, force-release, re-announce base, restart.
        ensure!(glue.timer_tick(start + Duration::from_secs(3)));
        {
            let record = record.borrow();
            ensure_eq!(record.tx_stops, 1);
            ensure_eq!(record.tx_starts, 2);
            let tx_writes: usize = record.base_writes.iter().filter(|(name, _)| *name == "tx").count();
            ensure_eq!(tx_writes, 2);
            let mut released: Vec<u64> = record.released.clone();
            released.sort_unstable();
            ensure_eq!(released, vec![0, 1, 2]);
        }
        ensure_eq!(glue.engine().tx_in_flight(), 0);
        ensure_eq!(glue.engine().stats().watchdog_resets, 1);

        // An idle ring never re-fires the watchdog.
        ensure!(!glue.timer_tick(start + Duration::from_secs(10)));
        ensure_eq!(record.borrow().tx_stops, 1);
        Ok(())
    }
}
