use std::io::{IsTerminal, Write};

use canpipe_driver::{ClientStats, DeviceStats, PoolStats};
use canpipe_frame::{FrameType, Message};
use canpipe_hw::Register;
use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One record as a client received it.
#[derive(Debug, Clone, Copy)]
pub struct Received {
    pub client: u64,
    pub message: Message,
}

#[derive(Serialize)]
struct ReceivedOutput<'a> {
    client: u64,
    #[serde(flatten)]
    message: &'a Message,
}

/// Counters printed at the end of a run.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub device: String,
    pub interrupts: u64,
    pub delivered: usize,
    pub dropped: usize,
    pub stats: DeviceStats,
    pub pool: PoolStats,
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize)]
pub struct ClientSummary {
    pub client: u64,
    #[serde(flatten)]
    pub stats: ClientStats,
}

pub fn print_received(received: &[Received], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for item in received {
                let out = ReceivedOutput {
                    client: item.client,
                    message: &item.message,
                };
                println!(
                    "{}",
                    serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            if received.is_empty() {
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["CLIENT", "KIND", "ID", "TYPE", "DLC", "DATA"]);
            for item in received {
                table.add_row(message_row(item));
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for item in received {
                println!("client={} {}", item.client, describe(&item.message));
            }
        }
        OutputFormat::Raw => {
            let mut out = std::io::stdout().lock();
            for item in received {
                let _ = out.write_all(&item.message.to_record());
            }
            let _ = out.flush();
        }
    }
}

pub fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string(summary).unwrap_or_else(|_| "{}".to_string())
        ),
        OutputFormat::Table | OutputFormat::Pretty => {
            let stats = &summary.stats;
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METRIC", "VALUE"]);
            let rows: Vec<(&str, String)> = vec![
                ("device", summary.device.clone()),
                ("interrupts", stats.isr_count.to_string()),
                ("copies delivered", summary.delivered.to_string()),
                ("copies dropped", summary.dropped.to_string()),
                ("slots drained (total)", stats.drained.total.to_string()),
                ("slots drained (max)", stats.drained.max.to_string()),
                ("frames transmitted", stats.transmitted.to_string()),
                ("tx queue (max)", stats.tx_queue.max.to_string()),
                ("tx flushed", stats.tx_flushed.to_string()),
                ("bus errors", stats.errors.total().to_string()),
                ("isr time max (ns)", stats.isr_time.max_ns.to_string()),
                ("isr time total (ns)", stats.isr_time.total_ns.to_string()),
                (
                    "pool in use / capacity",
                    format!("{} / {}", summary.pool.in_use, summary.pool.capacity),
                ),
                ("pool low water", summary.pool.low_water.to_string()),
            ];
            for (metric, value) in rows {
                table.add_row(vec![metric.to_string(), value]);
            }
            println!("{table}");

            if !summary.clients.is_empty() {
                let mut clients = Table::new();
                clients
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic)
                    .set_header(vec!["CLIENT", "READS", "WRITES", "DIRECT", "QUEUED", "MAX DEPTH"]);
                for client in &summary.clients {
                    clients.add_row(vec![
                        client.client.to_string(),
                        client.stats.read_count.to_string(),
                        client.stats.write_count.to_string(),
                        client.stats.transmits_direct.to_string(),
                        client.stats.transmits_queued.to_string(),
                        client.stats.rx_queue.max.to_string(),
                    ]);
                }
                println!("{clients}");
            }
        }
        // Raw output carries records only.
        OutputFormat::Raw => {}
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct RegisterValue {
    pub register: Register,
    pub value: u32,
}

pub fn print_registers(values: &[RegisterValue], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            for value in values {
                println!(
                    "{}",
                    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
                );
            }
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["REGISTER", "VALUE"]);
            for value in values {
                table.add_row(vec![
                    value.register.to_string(),
                    format!("{:#010x}", value.value),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for value in values {
                println!("{} = {:#010x}", value.register, value.value);
            }
        }
        // Little-endian words in request order.
        OutputFormat::Raw => {
            let mut out = std::io::stdout().lock();
            for value in values {
                let _ = out.write_all(&value.value.to_le_bytes());
            }
            let _ = out.flush();
        }
    }
}

fn message_row(item: &Received) -> Vec<String> {
    match &item.message {
        Message::Frame(frame) => vec![
            item.client.to_string(),
            "frame".to_string(),
            format!("{:#x}", frame.id),
            type_name(frame.frame_type).to_string(),
            frame.data_length.to_string(),
            hex(frame.payload()),
        ],
        Message::Status(status) => vec![
            item.client.to_string(),
            "status".to_string(),
            "-".to_string(),
            "-".to_string(),
            "-".to_string(),
            status.status1.to_string(),
        ],
    }
}

/// One-line description of a record.
pub fn describe(message: &Message) -> String {
    match message {
        Message::Frame(frame) => format!(
            "frame id={:#x} type={} dlc={} data=[{}]",
            frame.id,
            type_name(frame.frame_type),
            frame.data_length,
            hex(frame.payload())
        ),
        Message::Status(status) => format!("status {}", status.status1),
    }
}

fn type_name(frame_type: FrameType) -> &'static str {
    match frame_type {
        FrameType::Standard => "std",
        FrameType::Extended => "ext",
        FrameType::Undefined => "undef",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
