// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

// YASNAC ERC serial link tools
mod catalog;
mod command;
mod emulator;
mod engine;
mod error;
mod frame;
mod hostlink;
mod protocol;
mod serial;
mod transfer;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use clap::{Parser, Subcommand};
use log::info;
use serialport::{DataBits, Parity, StopBits};
use catalog::DiskCatalog;
use command::{Command, Controller};
use emulator::{DiskEmulator, Drive, EmulatorConfig};
use engine::{Engine, LinkConfig};
use error::Error;
use hostlink::{HostLink, HostLinkCodec};
use protocol::{DEFAULT_ATTEMPTS, FC1_BAUD, HOST_LINK_BAUD};
use serial::RealSerialPort;
use transfer::DiskClient;

#[derive(Parser)]
#[command(name = "motolink")]
#[command(about = "Remote commands, file transfer and FC1 drive emulation for YASNAC ERC controllers", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate [default: 4800 for file and serve, 9600 for command and move]
    #[arg(short, long)]
    baud: Option<u32>,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name="BITS")]
    data_bits: u8,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "even")]
    parity: String,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name="BITS")]
    stop_bits: u8,

    /// Wait for each response, in milliseconds
    #[arg(long, default_value = "2000", value_name = "MS")]
    timeout: u64,

    /// Sends of one request before giving up
    #[arg(long, default_value_t = DEFAULT_ATTEMPTS)]
    attempts: u32,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send system control or status commands to the controller
    Command {
        /// Commands such as "SVON 1" or RSTATS, issued in order
        #[arg(required = true)]
        commands: Vec<String>,
    },
    /// File operations against an FC1 drive
    File {
        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        #[command(subcommand)]
        action: FileAction,
    },
    /// Move the robot to a position and wait for it to stop
    Move {
        /// Joint speed in percent, or linear speed in mm/s with --linear
        #[arg(long)]
        speed: f64,

        /// Linear interpolation (MOVL) instead of joint (MOVJ)
        #[arg(long)]
        linear: bool,

        /// Turn servo power on before moving
        #[arg(long)]
        servo_on: bool,

        /// Turn servo power off once stopped
        #[arg(long)]
        servo_off: bool,

        /// Status poll interval in milliseconds
        #[arg(long, default_value = "500", value_name = "MS")]
        poll: u64,

        /// Position string passed to the controller as is
        position: String,
    },
    /// Emulate an FC1 floppy drive backed by local files
    Serve {
        /// Directory holding the files
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Let the controller replace existing files
        #[arg(long)]
        overwrite: bool,

        /// Correct the //NAME line of served jobs to match the file name
        #[arg(long)]
        fix_job_names: bool,

        /// Only offer these files [default: every .JBI file in the directory]
        files: Vec<String>,
    },
    /// Save job and data files the controller sends over the command port
    Receive {
        /// Directory to store the files in
        #[arg(short, long, default_value = ".")]
        dir: PathBuf,

        /// Replace files that already exist
        #[arg(long)]
        overwrite: bool,

        /// Stop after this many files [default: run until interrupted]
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Subcommand)]
enum FileAction {
    /// List the files on the drive
    List {
        /// Printed between names
        #[arg(long, default_value = "\n")]
        separator: String,
    },
    /// Copy a file from the drive
    Get {
        name: String,

        /// Local destination [default: NAME in the current directory]
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Copy a local file to the drive
    Put {
        path: PathBuf,

        /// Name on the drive [default: the local file name]
        #[arg(long)]
        name: Option<String>,
    },
    /// Delete a file on the drive
    Delete {
        name: String,
    },
    /// Show free space on the drive
    Size,
}

fn parse_data_bits(bits: u8) -> Result<DataBits, String> {
    match bits {
        5 => Ok(DataBits::Five),
        6 => Ok(DataBits::Six),
        7 => Ok(DataBits::Seven),
        8 => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: u8) -> Result<StopBits, String> {
    match bits {
        1 => Ok(StopBits::One),
        2 => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn exit_with(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {}", message);
    std::process::exit(1);
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let data_bits = parse_data_bits(cli.data_bits).unwrap_or_else(|e| exit_with(e));
    let parity = parse_parity(&cli.parity).unwrap_or_else(|e| exit_with(e));
    let stop_bits = parse_stop_bits(cli.stop_bits).unwrap_or_else(|e| exit_with(e));

    let baud = cli.baud.unwrap_or(match cli.command {
        Commands::File { .. } | Commands::Serve { .. } => FC1_BAUD,
        Commands::Command { .. } | Commands::Move { .. } | Commands::Receive { .. } => HOST_LINK_BAUD,
    });

    info!("Opening serial port: {}", cli.port);
    info!("Settings: {} baud, {:?}, {:?}, {:?}", baud, data_bits, parity, stop_bits);

    let serial_port = match RealSerialPort::open(&cli.port, baud, data_bits, parity, stop_bits) {
        Ok(port) => port,
        Err(e) => exit_with(format!("Failed to open serial port: {}", e)),
    };

    let link = LinkConfig {
        timeout: Duration::from_millis(cli.timeout),
        attempts: cli.attempts,
    };

    if let Err(e) = run(cli.command, serial_port, link) {
        exit_with(e);
    }
}

fn run(command: Commands, serial_port: RealSerialPort, link: LinkConfig) -> error::Result<()> {
    match command {
        Commands::Command { commands } => {
            let commands = commands
                .iter()
                .map(|text| text.parse::<Command>())
                .collect::<error::Result<Vec<_>>>()?;

            let mut controller = controller(serial_port, link);
            for command in &commands {
                println!("{}", controller.execute(command)?);
            }
            Ok(())
        }
        Commands::Move { speed, linear, servo_on, servo_off, poll, position } => {
            // rejected locally before the port is touched
            Command::Move { linear, speed, position: position.clone() }.validate()?;

            let mut controller = controller(serial_port, link);
            if servo_on {
                controller.servo_power(true)?;
            }
            controller.move_to(linear, speed, &position)?;
            let status = controller.wait_until_stopped(Duration::from_millis(poll), None)?;
            println!("{}", status);
            println!("{}", controller.read_position()?);
            if servo_off {
                controller.servo_power(false)?;
            }
            Ok(())
        }
        Commands::File { overwrite, action } => {
            let mut client = DiskClient::new(Box::new(serial_port), link);
            run_file(&mut client, action, overwrite)
        }
        Commands::Serve { dir, overwrite, fix_job_names, files } => {
            let catalog = if files.is_empty() {
                DiskCatalog::scan(&dir, overwrite)?
            } else {
                DiskCatalog::with_files(&dir, &files, overwrite)?
            };
            let config = EmulatorConfig { fix_job_names, ..Default::default() };
            let drive = Drive::new(catalog, config);
            DiskEmulator::new(Box::new(serial_port), link, drive).serve()
        }
        Commands::Receive { dir, overwrite, count } => {
            let mut catalog = DiskCatalog::with_files(&dir, &[], overwrite)?;
            let mut controller = controller(serial_port, link);
            info!("waiting for files, saving to {}", dir.display());

            let mut received = 0;
            while count.is_none_or(|count| received < count) {
                let file = controller.receive_file(&mut catalog, None)?;
                println!("{} ({} bytes)", file.name, file.data.len());
                received += 1;
            }
            Ok(())
        }
    }
}

fn controller(serial_port: RealSerialPort, link: LinkConfig) -> Controller {
    Controller::new(HostLink::new(Engine::new(Box::new(serial_port), HostLinkCodec, link)))
}

fn run_file(client: &mut DiskClient, action: FileAction, overwrite: bool) -> error::Result<()> {
    match action {
        FileAction::List { separator } => {
            let names = client.list()?;
            println!("{}", names.join(separator.as_str()));
        }
        FileAction::Get { name, output } => {
            let dest = output.unwrap_or_else(|| PathBuf::from(&name));
            let size = client.download(&name, &dest, overwrite)?;
            println!("{} -> {} ({} bytes)", name, dest.display(), size);
        }
        FileAction::Put { path, name } => {
            let name = match name {
                Some(name) => name,
                None => local_name(&path)?,
            };
            let data = fs::read(&path).map_err(|e| Error::local_file(&path, e))?;
            client.put(&name, &data, overwrite)?;
            println!("{} -> {} ({} bytes)", path.display(), name, data.len());
        }
        FileAction::Delete { name } => {
            client.delete(&name)?;
            println!("deleted {}", name);
        }
        FileAction::Size => {
            println!("{} bytes free", client.disk_size()?);
        }
    }
    Ok(())
}

fn local_name(path: &Path) -> error::Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::Parameter(format!("cannot derive a drive name from {}", path.display())))
}
