use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use framerelay_frame::{direction, Packet, PacketCatalog};
use framerelay_relay::StatsSnapshot;
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

#[derive(Serialize)]
struct PacketOutput<'a> {
    code: u32,
    name: &'a str,
    payload_size: usize,
    payload: String,
    source: &'a str,
    timestamp: String,
}

pub fn print_packet(packet: &Packet, source: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = PacketOutput {
                code: packet.code,
                name: &packet.name,
                payload_size: packet.payload.len(),
                payload: payload_preview(packet.payload.as_ref()),
                source,
                timestamp: now_unix_seconds(),
            };
            print_json(&out);
        }
        OutputFormat::Table => {
            let mut table = new_table(vec!["CODE", "NAME", "SIZE", "SOURCE", "PAYLOAD"]);
            table.add_row(vec![
                packet.code.to_string(),
                packet.name.clone(),
                packet.payload.len().to_string(),
                source.to_string(),
                payload_preview(packet.payload.as_ref()),
            ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "code={} ({}) size={} source={} payload={}",
                packet.code,
                packet.name,
                packet.payload.len(),
                source,
                payload_preview(packet.payload.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(packet.payload.as_ref()),
    }
}

#[derive(Serialize)]
struct CatalogEntry<'a> {
    code: u32,
    name: &'a str,
    direction: &'a str,
}

pub fn print_catalog(catalog: &PacketCatalog, format: OutputFormat) {
    let entries: Vec<CatalogEntry<'_>> = catalog
        .entries()
        .map(|(code, name)| CatalogEntry {
            code,
            name,
            direction: direction(code).map_or("not relayed", |d| d.as_str()),
        })
        .collect();

    match format {
        OutputFormat::Json => print_json(&entries),
        OutputFormat::Table => {
            let mut table = new_table(vec!["CODE", "NAME", "DIRECTION"]);
            for entry in &entries {
                table.add_row(vec![
                    entry.code.to_string(),
                    entry.name.to_string(),
                    entry.direction.to_string(),
                ]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            for entry in &entries {
                println!("{} {} {}", entry.code, entry.name, entry.direction);
            }
        }
    }
}

pub fn print_stats(stats: &StatsSnapshot, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(stats),
        OutputFormat::Table => {
            let mut table = new_table(vec!["COUNTER", "VALUE"]);
            for (name, value) in stat_rows(stats) {
                table.add_row(vec![name.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let line: Vec<String> = stat_rows(stats)
                .iter()
                .map(|(name, value)| format!("{name}={value}"))
                .collect();
            println!("{}", line.join(" "));
        }
    }
}

fn stat_rows(stats: &StatsSnapshot) -> [(&'static str, u64); 6] {
    [
        ("forwarded_to_worker", stats.forwarded_to_worker),
        ("relayed_to_client", stats.relayed_to_client),
        ("rejected", stats.rejected),
        ("worker_unavailable", stats.worker_unavailable),
        ("send_failures", stats.send_failures),
        ("routing_failures", stats.routing_failures),
    ]
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn new_table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) => text.to_string(),
        Err(_) => format!("<binary {} bytes>", payload.len()),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
