use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use child_frame::InboxConfig;
use clap::Parser;
use ipc_trace::{
    compare_host_messages, outbound_messages, read_jsonl_records, validate_trace,
    write_jsonl_record_line,
};
use log::info;

mod replay;

use replay::{ReplayOptions, replay_trace};

#[derive(Parser)]
#[command(author, version, about = "Replay a child-frame IPC trace through the compositor")]
struct Arguments {
    /// JSONL trace to replay.
    #[arg(value_parser)]
    trace: PathBuf,
    /// Where the replayed trace is written.
    #[arg(long, short = 'o', value_parser, default_value = "target/replay/replayed.jsonl")]
    output: PathBuf,
    /// Fail when the replay's host messages differ from the recorded ones.
    #[arg(long)]
    check: bool,
    /// Replay without validating the input trace first.
    #[arg(long)]
    skip_validation: bool,
    /// Namespace of the surface sequences the replay mints.
    #[arg(long, default_value_t = 1)]
    surface_namespace: u32,
    /// Inbound messages handled per inbox pump.
    #[arg(long, default_value_t = InboxConfig::default().batch_size)]
    batch_size: usize,
}

fn main() -> Result<()> {
    env_logger::init();
    let arguments = Arguments::parse();
    if arguments.surface_namespace == 0 {
        return Err(anyhow::anyhow!("surface namespace 0 is reserved"));
    }

    let file = File::open(&arguments.trace)
        .with_context(|| format!("open trace {}", arguments.trace.display()))?;
    let records = read_jsonl_records(&mut BufReader::new(file))
        .with_context(|| format!("read trace {}", arguments.trace.display()))?;
    if !arguments.skip_validation {
        validate_trace(&records)
            .with_context(|| format!("validate trace {}", arguments.trace.display()))?;
    }

    let options = ReplayOptions {
        surface_id_namespace: arguments.surface_namespace,
        inbox: InboxConfig {
            batch_size: arguments.batch_size,
            ..InboxConfig::default()
        },
        ..ReplayOptions::default()
    };
    let replayed = replay_trace(&records, options);

    if let Some(parent) = arguments.output.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create output directory {}", parent.display()))?;
    }
    let output = File::create(&arguments.output)
        .with_context(|| format!("create output {}", arguments.output.display()))?;
    let mut writer = BufWriter::new(output);
    for record in &replayed {
        write_jsonl_record_line(&mut writer, record)
            .with_context(|| format!("write output {}", arguments.output.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("flush output {}", arguments.output.display()))?;

    let produced = outbound_messages(&replayed);
    info!(
        "replayed {} records into {} ({} host messages)",
        records.len(),
        arguments.output.display(),
        produced.len()
    );

    if arguments.check {
        compare_host_messages(&outbound_messages(&records), &produced)
            .context("replayed host messages differ from the trace")?;
        info!("host messages match the recording");
    }
    Ok(())
}
