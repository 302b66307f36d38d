//! container_dump - inspect an IVF recording
//!
//! Prints the file header and one line per record. With `--payloads` the
//! record payloads are written back to back on stdout instead, which turns a
//! container of uncompressed frames into a raw frame stream.

use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};

use peer_motion::container::ContainerReader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Inspect an IVF container")]
struct Args {
    /// Container to read ("-" for stdin).
    #[arg(default_value = "-")]
    input: String,

    /// Write record payloads to stdout instead of a listing.
    #[arg(long)]
    payloads: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let input: Box<dyn Read> = if args.input == "-" {
        Box::new(io::stdin().lock())
    } else {
        let file =
            File::open(&args.input).with_context(|| format!("failed to open {}", args.input))?;
        Box::new(BufReader::new(file))
    };
    let mut reader = ContainerReader::new(input)?;
    let mut out = io::stdout().lock();

    if args.payloads {
        while let Some(packet) = reader.next_packet()? {
            out.write_all(&packet.payload)?;
            out.flush()?;
        }
        return Ok(());
    }

    let header = *reader.header();
    writeln!(
        out,
        "fourcc={} size={}x{} timebase={}/{} frames={}",
        String::from_utf8_lossy(&header.fourcc),
        header.width,
        header.height,
        header.timebase_num,
        header.timebase_den,
        header.frame_count
    )?;
    let mut records = 0u64;
    let mut bytes = 0u64;
    while let Some(packet) = reader.next_packet()? {
        writeln!(out, "{:>8} {:>10}", packet.sequence, packet.payload.len())?;
        records += 1;
        bytes += packet.payload.len() as u64;
    }
    writeln!(out, "{} records, {} payload bytes", records, bytes)?;
    Ok(())
}
