use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use canpipe_driver::{
    Client, ControlCommand, Device, DispatchSummary, DriverError, TransmitState,
};
use canpipe_frame::CanFrame;
use canpipe_hw::SimController;
use tracing::{debug, info, warn};

use crate::cmd::{DeviceArgs, SimulateArgs};
use crate::exit::{driver_error, hw_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_received, print_summary, ClientSummary, OutputFormat, Received, RunSummary};

const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Default)]
struct Totals {
    delivered: usize,
    dropped: usize,
}

impl Totals {
    fn add(&mut self, summary: &DispatchSummary) {
        self.delivered += summary.delivered;
        self.dropped += summary.dropped;
    }
}

pub fn run(args: SimulateArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = device_args.resolve()?;
    let sim = SimController::new();
    let device = Device::new(sim.clone(), &config)
        .map_err(|err| driver_error("device start failed", err))?;

    let stop = Arc::new(AtomicBool::new(false));
    install_ctrlc_handler(device.clone(), Arc::clone(&stop))?;

    let (tx, rx) = mpsc::channel();
    let mut readers = Vec::with_capacity(args.clients);
    for _ in 0..args.clients {
        let client = device
            .open()
            .map_err(|err| driver_error("open failed", err))?;
        client
            .accept_messages()
            .map_err(|err| driver_error("accept failed", err))?;
        readers.push(spawn_reader(client, tx.clone())?);
    }
    drop(tx);

    let writer = device
        .open()
        .map_err(|err| driver_error("open failed", err))?;
    if args.loopback {
        writer
            .control(ControlCommand::EnableLoopback)
            .map_err(|err| driver_error("loopback failed", err))?;
    }
    if let Some(bits) = args.raise_errors {
        sim.raise_error(bits);
    }

    info!(
        device = %config.name,
        clients = args.clients,
        frames = args.frames,
        burst = args.burst,
        "simulation started"
    );

    let mut totals = Totals::default();
    let mut timer = args.start_timer;
    let mut injected = 0u32;
    let mut written = 0u32;

    while injected < args.frames && !stop.load(Ordering::SeqCst) {
        let burst = (args.frames - injected).min(args.burst as u32);
        // Latch in reverse so slot order disagrees with arrival order.
        for k in (0..burst).rev() {
            let stamp = timer.wrapping_add(args.tick.wrapping_mul(k as u16));
            sim.inject(traffic_frame(injected + k), stamp)
                .map_err(|err| hw_error("inject failed", err))?;
        }
        timer = timer.wrapping_add(args.tick.wrapping_mul(burst as u16));
        injected += burst;
        sim.set_timer(timer);

        if written < args.writes && try_write(&writer, written)? {
            written += 1;
        }
        sim.complete_transmit();
        let summary = device.handle_interrupt();
        debug!(drained = summary.drained, delivered = summary.delivered, status = %summary.status, "burst dispatched");
        totals.add(&summary);
    }

    while written < args.writes && !stop.load(Ordering::SeqCst) {
        if try_write(&writer, written)? {
            written += 1;
        }
        sim.complete_transmit();
        totals.add(&device.handle_interrupt());
    }
    while device.transmit_state() == TransmitState::Busy && !stop.load(Ordering::SeqCst) {
        sim.complete_transmit();
        totals.add(&device.handle_interrupt());
    }

    let mut received = Vec::with_capacity(totals.delivered);
    while received.len() < totals.delivered && !stop.load(Ordering::SeqCst) {
        match rx.recv_timeout(DRAIN_TIMEOUT) {
            Ok(item) => received.push(item),
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    expected = totals.delivered,
                    received = received.len(),
                    "readers stalled"
                );
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let clients = device
        .client_stats()
        .into_iter()
        .map(|(client, stats)| ClientSummary { client, stats })
        .collect();
    let stats = device.stats();
    let summary = RunSummary {
        device: config.name.clone(),
        interrupts: stats.isr_count,
        delivered: totals.delivered,
        dropped: totals.dropped,
        stats,
        pool: device.pool_stats(),
        clients,
    };

    // Readers that are not blocked right now still see `Closed` on their
    // next read.
    writer.close();
    device.shutdown();
    for reader in readers {
        if reader.join().is_err() {
            warn!("reader thread panicked");
        }
    }
    received.extend(rx.try_iter());
    received.sort_by_key(|item| item.client);

    if !args.quiet {
        print_received(&received, format);
    }
    print_summary(&summary, format);
    info!(
        injected,
        written,
        delivered = totals.delivered,
        dropped = totals.dropped,
        "simulation finished"
    );
    Ok(SUCCESS)
}

/// Returns false when the pool is momentarily exhausted.
fn try_write(writer: &Client<SimController>, n: u32) -> CliResult<bool> {
    let frame = CanFrame::standard(0x700 + (n % 0x80), &n.to_le_bytes());
    match writer.write(&frame.to_record()) {
        Ok(_) => Ok(true),
        Err(err) if err.is_retryable() => {
            debug!(%err, "write deferred");
            Ok(false)
        }
        Err(err) => Err(driver_error("write failed", err)),
    }
}

fn traffic_frame(seq: u32) -> CanFrame {
    let payload = seq.to_le_bytes();
    if seq % 4 == 3 {
        CanFrame::extended(0x18DA_0000 | (seq & 0xFFFF), &payload)
    } else {
        CanFrame::standard(0x100 + (seq % 0x600), &payload[..2])
    }
}

fn spawn_reader(
    client: Client<SimController>,
    tx: Sender<Received>,
) -> CliResult<JoinHandle<()>> {
    let id = client.id();
    thread::Builder::new()
        .name(format!("reader-{id}"))
        .spawn(move || loop {
            match client.read_message() {
                Ok(message) => {
                    if tx.send(Received { client: id, message }).is_err() {
                        break;
                    }
                }
                Err(DriverError::Interrupted | DriverError::Closed) => break,
                Err(err) => {
                    warn!(client = id, %err, "read failed");
                    break;
                }
            }
        })
        .map_err(|err| CliError::new(INTERNAL, format!("reader spawn failed: {err}")))
}

fn install_ctrlc_handler(device: Device<SimController>, stop: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::SeqCst);
        device.interrupt_all();
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}
