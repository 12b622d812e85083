use std::fs::File;
use std::io::{BufReader, BufWriter};

use canpipe_driver::Device;
use canpipe_frame::{FrameReader, FrameWriter, Message};
use canpipe_hw::SimController;
use tracing::{debug, info, warn};

use crate::cmd::{DeviceArgs, ReplayArgs};
use crate::exit::{driver_error, frame_error, hw_error, io_error, CliResult, SUCCESS};
use crate::output::{print_received, print_summary, ClientSummary, OutputFormat, Received, RunSummary};

pub fn run(args: ReplayArgs, device_args: &DeviceArgs, format: OutputFormat) -> CliResult<i32> {
    let config = device_args.resolve()?;
    let file = File::open(&args.capture).map_err(|err| io_error("open capture failed", err))?;
    let mut reader = FrameReader::new(BufReader::new(file));
    let mut out = match &args.out {
        Some(path) => Some(FrameWriter::new(BufWriter::new(
            File::create(path).map_err(|err| io_error("create output failed", err))?,
        ))),
        None => None,
    };

    let sim = SimController::new();
    let device = Device::new(sim.clone(), &config)
        .map_err(|err| driver_error("device start failed", err))?;
    let client = device
        .open()
        .map_err(|err| driver_error("open failed", err))?;
    client
        .accept_messages()
        .map_err(|err| driver_error("accept failed", err))?;

    let mut received = Vec::new();
    let mut timer: u16 = 0;
    let mut skipped_status = 0usize;
    let mut delivered = 0usize;
    let mut dropped = 0usize;
    let mut eof = false;

    while !eof {
        let mut latched = 0;
        while latched < args.batch {
            match reader
                .read_message()
                .map_err(|err| frame_error("capture read failed", err))?
            {
                Some(Message::Frame(frame)) => {
                    sim.inject(frame, timer)
                        .map_err(|err| hw_error("inject failed", err))?;
                    timer = timer.wrapping_add(1);
                    latched += 1;
                }
                Some(Message::Status(status)) => {
                    debug!(status = %status.status1, "status record in capture skipped");
                    skipped_status += 1;
                }
                None => {
                    eof = true;
                    break;
                }
            }
        }
        if latched == 0 {
            continue;
        }

        sim.set_timer(timer);
        let summary = device.handle_interrupt();
        delivered += summary.delivered;
        dropped += summary.dropped;

        while client.pending() > 0 {
            let message = client
                .read_message()
                .map_err(|err| driver_error("read failed", err))?;
            if let Some(out) = out.as_mut() {
                out.write_message(&message)
                    .map_err(|err| frame_error("output write failed", err))?;
            }
            received.push(Received {
                client: client.id(),
                message,
            });
        }
    }

    if let Some(out) = out.as_mut() {
        out.flush()
            .map_err(|err| frame_error("output flush failed", err))?;
    }
    if skipped_status > 0 {
        warn!(skipped_status, "capture contained status records");
    }

    let stats = device.stats();
    let summary = RunSummary {
        device: config.name.clone(),
        interrupts: stats.isr_count,
        delivered,
        dropped,
        stats,
        pool: device.pool_stats(),
        clients: device
            .client_stats()
            .into_iter()
            .map(|(client, stats)| ClientSummary { client, stats })
            .collect(),
    };
    info!(
        capture = %args.capture.display(),
        records = received.len(),
        "replay finished"
    );

    if !args.quiet {
        print_received(&received, format);
    }
    print_summary(&summary, format);
    Ok(SUCCESS)
}
