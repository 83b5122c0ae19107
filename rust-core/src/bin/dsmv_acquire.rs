//! Headless acquisition: configure the board, stream frames and log the analysis
//!
//! Usage: `dsmv-acquire [CONFIG.toml] [--list-ports]`; the config path can
//! also come from `$DSMV_CONFIG`.
//!
//! Commands on stdin: `run`, `pause`, `reset`, `export <path>`, `quit`.

use std::error::Error;
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use dsmv_spectral::acquisition::{CsvExporter, DisplaySink, FrameReport};
use dsmv_spectral::port::{SerialBackend, StreamConfig};
use dsmv_spectral::{AcquisitionConfig, AcquisitionLoop, ConnectionState, LoopMessage, RunState, StreamingPort, SystemSerial};

#[derive(Parser, Debug)]
#[command(name = "dsmv-acquire")]
#[command(about = "Stream frames from the DSMV board and log their spectra")]
#[command(version)]
struct CliArgs {
    /// TOML configuration; built-in defaults when absent
    #[arg(env = "DSMV_CONFIG", value_name = "CONFIG.toml")]
    config: Option<PathBuf>,

    /// Print the enumerated serial ports and exit
    #[arg(long)]
    list_ports: bool,
}

/// Frames between info-level summaries
const SUMMARY_EVERY: usize = 50;

/// Display sink that writes frame summaries to the log
#[derive(Default)]
struct LogSink {
    frames: usize,
}

impl DisplaySink for LogSink {
    fn publish(&mut self, report: &FrameReport) {
        self.frames += 1;

        let mut summary = format!("averaged {}", report.averaged);
        for (index, slot) in report.slots.iter().enumerate() {
            if let Some(slot) = slot {
                summary.push_str(&format!(" | slot {} {} ENBW {:.3} Hz", index + 1, slot.window, slot.enbw));
                if let Some(peak) = slot.peak {
                    summary.push_str(&format!(" peak {:.2} Hz = {:.4e}", peak.frequency, peak.value));
                }
            }
        }
        if let Some(power) = report.band_power {
            summary.push_str(&format!(" | band power {:.5e} V^2", power));
        }

        if self.frames % SUMMARY_EVERY == 1 {
            log::info!("{}", summary);
        } else {
            log::debug!("{}", summary);
        }
    }

    fn connection_changed(&mut self, state: ConnectionState) {
        log::info!("Connection: {:?}", state);
    }

    fn run_state_changed(&mut self, state: RunState) {
        log::info!("Acquisition {:?}", state);
    }
}

/// Parse one stdin control line
fn parse_command(line: &str) -> Option<LoopMessage> {
    let mut parts = line.trim().splitn(2, ' ');
    match parts.next()? {
        "run" => Some(LoopMessage::Start),
        "pause" => Some(LoopMessage::Pause),
        "reset" => Some(LoopMessage::Reset),
        "export" => parts.next().map(|p| LoopMessage::Export(PathBuf::from(p.trim()))),
        "quit" | "exit" => Some(LoopMessage::Shutdown),
        "" => None,
        other => {
            log::warn!("Unknown command '{}'", other);
            None
        }
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = CliArgs::parse();
    let config = AcquisitionConfig::load(args.config.as_deref())?;
    let backend = SystemSerial::new(config.port.baud_rate, config.port.read_timeout());

    if args.list_ports {
        for (index, name) in backend.enumerate()?.iter().enumerate() {
            println!("{}: {}", index, name);
        }
        return Ok(());
    }

    let mut port = StreamingPort::open(
        Arc::new(backend),
        StreamConfig {
            selector: config.port.selector(),
            max_buffer_bytes: config.port.max_buffer_bytes,
            reconnect_interval: config.port.reconnect_interval(),
        },
    )?;
    port.start(None)?;

    let (acquisition, handle) = AcquisitionLoop::new(port, config, Box::new(LogSink::default()));
    let worker = acquisition.with_exporter(Box::new(CsvExporter)).spawn()?;
    handle.start();

    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if let Some(message) = parse_command(&line) {
            let shutdown = message == LoopMessage::Shutdown;
            if !handle.send(message) || shutdown {
                break;
            }
        }
    }
    handle.shutdown();

    worker.join().map_err(|_| "acquisition thread panicked")?;
    Ok(())
}
