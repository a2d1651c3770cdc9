// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! hros-probe - Inspect live TCPROS publisher endpoints
//!
//! Like `rostopic info` / `rostopic echo`, but pointed straight at one
//! publisher's data port instead of going through the master.

use chrono::Local;
use clap::{Parser, Subcommand};
use colored::*;
use hros::config::{MAX_FRAME_LEN, MAX_HEADER_LEN};
use hros::transport::{fields, ClientHandshake, ConnectionHeader, FrameCodec};
use hros::MessageDefinition;
use std::io::{self, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CALLER_ID: &str = "/hros_probe";
const DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Inspect live TCPROS publisher endpoints
#[derive(Parser, Debug)]
#[command(name = "hros-probe")]
#[command(version)]
#[command(about = "Probe or echo a TCPROS publisher endpoint")]
struct Args {
    #[command(subcommand)]
    mode: Mode,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Fetch a topic's advertised header without subscribing
    Info {
        /// Publisher endpoint, host:port
        endpoint: String,

        /// Topic name
        topic: String,

        /// Print the full message definition text
        #[arg(short, long)]
        definition: bool,
    },
    /// Subscribe with wildcard type and print incoming frames
    Echo {
        /// Publisher endpoint, host:port
        endpoint: String,

        /// Topic name
        topic: String,

        /// Maximum number of frames to receive (0 = unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u64,

        /// Hex dump every frame instead of trying to decode strings
        #[arg(long)]
        hex: bool,
    },
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if args.no_color || !is_tty() {
        colored::control::set_override(false);
    }

    let result = match args.mode {
        Mode::Info {
            ref endpoint,
            ref topic,
            definition,
        } => run_info(endpoint, topic, definition),
        Mode::Echo {
            ref endpoint,
            ref topic,
            count,
            hex,
        } => run_echo(endpoint, topic, count, hex),
    };

    if let Err(e) = result {
        eprintln!("{}: {}", "Error".red().bold(), e);
        std::process::exit(1);
    }
}

fn run_info(
    endpoint: &str,
    topic: &str,
    show_definition: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = dial(endpoint)?;

    let mut handshake = ClientHandshake::probe(CALLER_ID, topic);
    let header = handshake.execute(&mut stream, MAX_HEADER_LEN)?;

    eprintln!(
        "{} {} {} {}",
        ">>>".green().bold(),
        "Topic".bold(),
        topic.cyan(),
        format!("at {}", endpoint).dimmed()
    );
    eprintln!();

    print_field(&header, fields::TYPE, "type");
    print_field(&header, fields::MD5_SUM, "md5sum");
    print_field(&header, fields::CALLER_ID, "publisher");
    print_field(&header, fields::LATCHING, "latching");

    if show_definition {
        if let Some(text) = header.get(fields::MESSAGE_DEFINITION) {
            println!();
            println!("{}", "definition:".bold());
            for line in text.lines() {
                println!("  {}", line);
            }
        }
    } else if let Some(text) = header.get(fields::MESSAGE_DEFINITION) {
        println!(
            "{:>10}: {}",
            "definition",
            format!("{} bytes, pass --definition to print", text.len()).dimmed()
        );
    }

    Ok(())
}

fn run_echo(
    endpoint: &str,
    topic: &str,
    max_frames: u64,
    hex: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut stream = dial(endpoint)?;

    // Ctrl+C unblocks the reader by killing the socket.
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    let hook = stream.try_clone()?;
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
        let _ = hook.shutdown(Shutdown::Both);
    })?;

    // Wildcard subscription: accept whatever type the publisher carries.
    let wildcard = MessageDefinition::new("*", "*", "");
    let mut handshake = ClientHandshake::subscriber(CALLER_ID, topic, &wildcard, true);
    let header = handshake.execute(&mut stream, MAX_HEADER_LEN)?;
    handshake.mark_data();

    // The dial timeout guarded the handshake; data frames may be sparse.
    stream.set_read_timeout(None)?;

    eprintln!(
        "{} {} {} {}",
        ">>>".green().bold(),
        "Echoing".bold(),
        topic.cyan(),
        format!(
            "({}, md5 {})",
            header.get(fields::TYPE).unwrap_or("?"),
            header.get(fields::MD5_SUM).unwrap_or("?")
        )
        .dimmed()
    );
    eprintln!("{}", "Press Ctrl+C to stop".dimmed());
    eprintln!();

    let codec = FrameCodec::new(MAX_FRAME_LEN);
    let mut received = 0u64;
    while running.load(Ordering::SeqCst) {
        if max_frames > 0 && received >= max_frames {
            break;
        }
        match codec.read_frame(&mut stream) {
            Ok(Some(payload)) => {
                received += 1;
                print_frame(&payload, received, hex);
                let _ = io::stdout().flush();
            }
            Ok(None) => {
                eprintln!("{}", "Publisher closed the connection".yellow());
                break;
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    eprintln!("{}: {}", "Read failed".yellow(), e);
                }
                break;
            }
        }
    }

    eprintln!("\n{} Received {} frame(s)", "---".dimmed(), received);
    Ok(())
}

fn dial(endpoint: &str) -> Result<TcpStream, Box<dyn std::error::Error>> {
    let addr = resolve(endpoint)?;
    let stream = TcpStream::connect_timeout(&addr, DIAL_TIMEOUT)?;
    stream.set_read_timeout(Some(Duration::from_secs(30)))?;
    Ok(stream)
}

fn resolve(endpoint: &str) -> Result<SocketAddr, Box<dyn std::error::Error>> {
    endpoint
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| format!("endpoint '{}' did not resolve", endpoint).into())
}

fn print_field(header: &ConnectionHeader, key: &str, label: &str) {
    if let Some(value) = header.get(key) {
        println!("{:>10}: {}", label, value.green());
    }
}

fn print_frame(payload: &[u8], seq: u64, hex: bool) {
    let timestamp = Local::now().format("%H:%M:%S%.3f");
    println!(
        "{} {} ({} bytes)",
        format!("[{}]", timestamp).dimmed(),
        format!("#{}", seq).yellow(),
        payload.len()
    );

    if !hex {
        if let Some(s) = try_decode_string(payload) {
            println!("  {}: {}", "string".cyan(), s.green());
            println!();
            return;
        }
    }

    print_hex_dump(payload);
    println!();
}

/// Decode a single-string payload: LE u32 byte count, then UTF-8.
fn try_decode_string(payload: &[u8]) -> Option<String> {
    if payload.len() < 4 {
        return None;
    }
    let len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]) as usize;
    if 4 + len != payload.len() {
        return None;
    }
    let s = std::str::from_utf8(&payload[4..]).ok()?;
    if s.chars()
        .all(|c| c.is_ascii_graphic() || c.is_ascii_whitespace())
    {
        Some(format!("\"{}\"", s))
    } else {
        None
    }
}

fn print_hex_dump(data: &[u8]) {
    for (i, chunk) in data.chunks(16).enumerate() {
        print!("  {:04x}  ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            if j == 8 {
                print!(" ");
            }
            print!("{:02x} ", byte);
        }

        for j in chunk.len()..16 {
            if j == 8 {
                print!(" ");
            }
            print!("   ");
        }

        print!(" |");
        for byte in chunk {
            print!(
                "{}",
                if *byte >= 0x20 && *byte < 0x7f {
                    *byte as char
                } else {
                    '.'
                }
            );
        }
        println!("|");
    }
}

fn is_tty() -> bool {
    #[cfg(unix)]
    unsafe {
        libc::isatty(libc::STDOUT_FILENO) != 0
    }
    #[cfg(not(unix))]
    true
}
