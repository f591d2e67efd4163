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

//! System control and status commands.
//!
//! Commands are checked locally before anything is written to the port, so
//! an out of range argument never costs a round trip. Each command's answer
//! is decoded against that command's grammar: a result code for control
//! commands, comma separated data for the `R...` status reads.

use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::{Duration, Instant};
use log::{debug, info};
use strum::{Display, EnumString, IntoStaticStr};
use crate::error::{Error, Result};
use crate::catalog::{valid_name, DiskCatalog};
use crate::hostlink::{HostLink, Message};
use crate::protocol::{file_extension, REPLY_WAIT, RESULT_OK, TX_COMMAND, TX_DATA, TX_RESULT};

/// Longest message MDSP can put on the pendant.
pub const MDSP_MAX_CHARS: usize = 28;

/// Longest job name the controller accepts.
pub const JOB_NAME_MAX_CHARS: usize = 8;

// ============================================================================
// Vocabulary
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, IntoStaticStr, Display)]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
pub enum Keyword {
    Cancel,
    Cycle,
    Delete,
    Hlock,
    Hold,
    Jseq,
    Jwait,
    Mdsp,
    Reset,
    Setmj,
    Start,
    Svon,
    Ralarm,
    Rjdir,
    Rjseq,
    Rpos,
    Rposj,
    Rstats,
    Movj,
    Movl,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Cancel,
    /// 1 = step, 2 = one cycle, 3 = continuous
    Cycle(u8),
    /// Job name, or `*` for every job
    Delete(String),
    Hlock(bool),
    Hold(bool),
    Jseq { job: String, line: u16 },
    /// Seconds to wait for the running job, -1 waits forever
    Jwait(i32),
    Mdsp(String),
    Reset,
    Setmj(String),
    Start(Option<String>),
    Svon(bool),
    Ralarm,
    Rjdir(String),
    Rjseq,
    Rpos,
    Rposj,
    Rstats,
    /// The position string is handed to the controller untouched.
    Move { linear: bool, speed: f64, position: String },
}

fn flag(on: bool) -> u8 {
    on as u8
}

impl fmt::Display for Command {
    /// The exact request text, without the trailing carriage return.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keyword = self.keyword();
        match self {
            Command::Cancel
            | Command::Reset
            | Command::Ralarm
            | Command::Rjseq
            | Command::Rpos
            | Command::Rposj
            | Command::Rstats
            | Command::Start(None) => write!(f, "{}", keyword),
            Command::Cycle(n) => write!(f, "{} {}", keyword, n),
            Command::Delete(job) | Command::Setmj(job) | Command::Rjdir(job) => {
                write!(f, "{} {}", keyword, job)
            }
            Command::Start(Some(job)) => write!(f, "{} {}", keyword, job),
            Command::Hlock(on) | Command::Hold(on) | Command::Svon(on) => {
                write!(f, "{} {}", keyword, flag(*on))
            }
            Command::Jseq { job, line } => write!(f, "{} {},{}", keyword, job, line),
            Command::Jwait(seconds) => write!(f, "{} {}", keyword, seconds),
            Command::Mdsp(message) => write!(f, "{} {}", keyword, message),
            Command::Move { speed, position, .. } => write!(f, "{} {:.2},{}", keyword, speed, position),
        }
    }
}

fn check_job(job: &str, allow_all: bool) -> Result<()> {
    if allow_all && job == "*" {
        return Ok(());
    }
    if job.is_empty() || job.chars().count() > JOB_NAME_MAX_CHARS {
        return Err(Error::Parameter(format!(
            "job name {:?} must be 1 to {} characters",
            job, JOB_NAME_MAX_CHARS
        )));
    }
    if !job.chars().all(|c| c.is_ascii_graphic() && c != ',' && c != '*') {
        return Err(Error::Parameter(format!("job name {:?} has unusable characters", job)));
    }
    Ok(())
}

impl Command {
    pub fn keyword(&self) -> Keyword {
        match self {
            Command::Cancel => Keyword::Cancel,
            Command::Cycle(_) => Keyword::Cycle,
            Command::Delete(_) => Keyword::Delete,
            Command::Hlock(_) => Keyword::Hlock,
            Command::Hold(_) => Keyword::Hold,
            Command::Jseq { .. } => Keyword::Jseq,
            Command::Jwait(_) => Keyword::Jwait,
            Command::Mdsp(_) => Keyword::Mdsp,
            Command::Reset => Keyword::Reset,
            Command::Setmj(_) => Keyword::Setmj,
            Command::Start(_) => Keyword::Start,
            Command::Svon(_) => Keyword::Svon,
            Command::Ralarm => Keyword::Ralarm,
            Command::Rjdir(_) => Keyword::Rjdir,
            Command::Rjseq => Keyword::Rjseq,
            Command::Rpos => Keyword::Rpos,
            Command::Rposj => Keyword::Rposj,
            Command::Rstats => Keyword::Rstats,
            Command::Move { linear: false, .. } => Keyword::Movj,
            Command::Move { linear: true, .. } => Keyword::Movl,
        }
    }

    /// Status reads answer with data; everything else with a result code.
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            Command::Ralarm | Command::Rjdir(_) | Command::Rjseq | Command::Rpos | Command::Rposj | Command::Rstats
        )
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Command::Cycle(n) if !(1..=3).contains(n) => {
                Err(Error::Parameter(format!("CYCLE takes 1, 2 or 3, not {}", n)))
            }
            Command::Jwait(n) if !(-1..=32767).contains(n) => {
                Err(Error::Parameter(format!("JWAIT takes -1 to 32767, not {}", n)))
            }
            Command::Jseq { line, .. } if *line > 9999 => {
                Err(Error::Parameter(format!("JSEQ line {} is beyond 9999", line)))
            }
            Command::Jseq { job, .. } | Command::Setmj(job) | Command::Start(Some(job)) => check_job(job, false),
            Command::Delete(job) | Command::Rjdir(job) => check_job(job, true),
            Command::Mdsp(message) => {
                if message.chars().count() > MDSP_MAX_CHARS {
                    Err(Error::Parameter(format!("MDSP message is longer than {} characters", MDSP_MAX_CHARS)))
                } else if !message.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
                    Err(Error::Parameter("MDSP message must be printable ASCII".into()))
                } else {
                    Ok(())
                }
            }
            Command::Move { linear, speed, position } => {
                let range = if *linear { 0.1..=1500.0 } else { 0.01..=100.0 };
                if !range.contains(speed) {
                    return Err(Error::Parameter(format!(
                        "{} speed {} outside {} to {}",
                        self.keyword(), speed, range.start(), range.end()
                    )));
                }
                if position.trim().is_empty() || !position.chars().all(|c| c == ' ' || c.is_ascii_graphic()) {
                    return Err(Error::Parameter(format!("unusable position {:?}", position)));
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Validated request text.
    pub fn encode(&self) -> Result<String> {
        self.validate()?;
        Ok(self.to_string())
    }

    /// How long to wait for the controller to call back with the answer.
    /// `JWAIT` holds the answer until the job finishes; `JWAIT -1` has no
    /// upper bound.
    pub fn reply_wait(&self, base: Duration) -> Option<Duration> {
        match self {
            Command::Jwait(-1) => None,
            Command::Jwait(seconds) => Some(base + Duration::from_secs(*seconds as u64)),
            _ => Some(base),
        }
    }
}

fn parse_flag(keyword: Keyword, arg: &str) -> Result<bool> {
    match arg {
        "0" => Ok(false),
        "1" => Ok(true),
        _ => Err(Error::Parameter(format!("{} takes 0 or 1, not {:?}", keyword, arg))),
    }
}

fn parse_number<T: FromStr>(keyword: Keyword, arg: &str) -> Result<T> {
    arg.trim()
        .parse()
        .map_err(|_| Error::Parameter(format!("{} expects a number, not {:?}", keyword, arg)))
}

impl FromStr for Command {
    type Err = Error;

    /// Parse request text such as `SVON 1` or `JSEQ TEST,12`.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim_end_matches(['\r', '\n']);
        let (word, args) = match s.trim_start().split_once(' ') {
            Some((word, args)) => (word, args.trim()),
            None => (s.trim(), ""),
        };
        let keyword: Keyword = word
            .parse()
            .map_err(|_| Error::Parameter(format!("unknown command {:?}", word)))?;

        let no_args = |command: Command| {
            if args.is_empty() {
                Ok(command)
            } else {
                Err(Error::Parameter(format!("{} takes no arguments", keyword)))
            }
        };
        let required = || {
            if args.is_empty() {
                Err(Error::Parameter(format!("{} needs an argument", keyword)))
            } else {
                Ok(args.to_string())
            }
        };

        let command = match keyword {
            Keyword::Cancel => no_args(Command::Cancel)?,
            Keyword::Reset => no_args(Command::Reset)?,
            Keyword::Ralarm => no_args(Command::Ralarm)?,
            Keyword::Rjseq => no_args(Command::Rjseq)?,
            Keyword::Rpos => no_args(Command::Rpos)?,
            Keyword::Rposj => no_args(Command::Rposj)?,
            Keyword::Rstats => no_args(Command::Rstats)?,
            Keyword::Cycle => Command::Cycle(parse_number(keyword, &required()?)?),
            Keyword::Delete => Command::Delete(required()?),
            Keyword::Setmj => Command::Setmj(required()?),
            Keyword::Rjdir => Command::Rjdir(required()?),
            Keyword::Hlock => Command::Hlock(parse_flag(keyword, &required()?)?),
            Keyword::Hold => Command::Hold(parse_flag(keyword, &required()?)?),
            Keyword::Svon => Command::Svon(parse_flag(keyword, &required()?)?),
            Keyword::Jwait => Command::Jwait(parse_number(keyword, &required()?)?),
            Keyword::Mdsp => Command::Mdsp(args.to_string()),
            Keyword::Start => Command::Start((!args.is_empty()).then(|| args.to_string())),
            Keyword::Jseq => {
                let args = required()?;
                let (job, line) = args
                    .split_once(',')
                    .ok_or_else(|| Error::Parameter("JSEQ takes job,line".into()))?;
                Command::Jseq { job: job.trim().to_string(), line: parse_number(keyword, line)? }
            }
            Keyword::Movj | Keyword::Movl => {
                let args = required()?;
                let (speed, position) = args
                    .split_once(',')
                    .ok_or_else(|| Error::Parameter(format!("{} takes speed,position", keyword)))?;
                Command::Move {
                    linear: keyword == Keyword::Movl,
                    speed: parse_number(keyword, speed)?,
                    position: position.trim().to_string(),
                }
            }
        };

        command.validate()?;
        Ok(command)
    }
}

// ============================================================================
// Replies
// ============================================================================

/// Robot position in the base frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub tx: f64,
    pub ty: f64,
    pub tz: f64,
    /// Form and tool data following the coordinates.
    pub form: Vec<i32>,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X={:.3} Y={:.3} Z={:.3} Tx={:.2} Ty={:.2} Tz={:.2}",
            self.x, self.y, self.z, self.tx, self.ty, self.tz
        )?;
        if !self.form.is_empty() {
            write!(f, " form={:?}", self.form)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSequence {
    pub job: String,
    pub line: u16,
    pub step: u16,
}

/// The two status bytes returned by RSTATS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub data1: u8,
    pub data2: u8,
}

impl Status {
    pub fn step(&self) -> bool { self.data1 & 0x01 != 0 }
    pub fn one_cycle(&self) -> bool { self.data1 & 0x02 != 0 }
    pub fn continuous(&self) -> bool { self.data1 & 0x04 != 0 }
    pub fn running(&self) -> bool { self.data1 & 0x08 != 0 }
    pub fn speed_limited(&self) -> bool { self.data1 & 0x10 != 0 }
    pub fn teach(&self) -> bool { self.data1 & 0x20 != 0 }
    pub fn play(&self) -> bool { self.data1 & 0x40 != 0 }
    pub fn remote(&self) -> bool { self.data1 & 0x80 != 0 }
    pub fn pendant_hold(&self) -> bool { self.data2 & 0x02 != 0 }
    pub fn external_hold(&self) -> bool { self.data2 & 0x04 != 0 }
    pub fn command_hold(&self) -> bool { self.data2 & 0x08 != 0 }
    pub fn alarm(&self) -> bool { self.data2 & 0x10 != 0 }
    pub fn error(&self) -> bool { self.data2 & 0x20 != 0 }
    pub fn servo_on(&self) -> bool { self.data2 & 0x40 != 0 }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.step(), "step"),
            (self.one_cycle(), "one-cycle"),
            (self.continuous(), "continuous"),
            (self.running(), "running"),
            (self.speed_limited(), "speed-limited"),
            (self.teach(), "teach"),
            (self.play(), "play"),
            (self.remote(), "remote"),
            (self.pendant_hold(), "pendant-hold"),
            (self.external_hold(), "external-hold"),
            (self.command_hold(), "command-hold"),
            (self.alarm(), "alarm"),
            (self.error(), "error"),
            (self.servo_on(), "servo-on"),
        ];
        let set: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, name)| *name).collect();
        write!(f, "{:02X} {:02X} [{}]", self.data1, self.data2, set.join(" "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Done,
    Alarms(Vec<u16>),
    Jobs(Vec<String>),
    JobSequence(JobSequence),
    Position(Position),
    Pulses(Vec<i32>),
    Status(Status),
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Done => write!(f, "OK"),
            Reply::Alarms(codes) if codes.is_empty() => write!(f, "no alarms"),
            Reply::Alarms(codes) => {
                let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
                write!(f, "alarms {}", codes.join(" "))
            }
            Reply::Jobs(jobs) => write!(f, "{}", jobs.join(" ")),
            Reply::JobSequence(seq) => write!(f, "job {} line {} step {}", seq.job, seq.line, seq.step),
            Reply::Position(position) => write!(f, "{}", position),
            Reply::Pulses(pulses) => write!(f, "{:?}", pulses),
            Reply::Status(status) => write!(f, "{}", status),
        }
    }
}

/// Meaning of a controller result code.
pub fn describe_error(code: u16) -> &'static str {
    match code {
        1010 => "command failure",
        1011 => "command operand number failure",
        1012 => "command operand value excessive",
        1013 => "command operand length failure",
        2010 => "during robot operation",
        2020 => "during T-PENDANT",
        2030 => "during panel HOLD",
        2040 => "during external HOLD",
        2050 => "during command HOLD",
        2060 => "during error alarm",
        2070 => "in servo OFF or stopping by a panel HOLD",
        3010 => "servo power on",
        3040 => "set home position",
        3070 => "current position is not input",
        3080 => "END command of job (except master job)",
        4010 => "shortage of memory capacity (job registration)",
        4012 => "shortage of memory capacity (position data registration)",
        4020 => "job edit prohibit",
        4030 => "job of same name exists",
        4040 => "no desired job",
        4060 => "set execution",
        4120 => "position data broken",
        4130 => "no position data",
        4150 => "END command of job (except master job)",
        4170 => "instruction data broken",
        4190 | 4200 => "unsuitable characters in job name exist",
        4230 => "instructions which cannot be used by this system exist",
        5110 => "instruction syntax error",
        5120 => "position data fault",
        5130 => "neither NOP or END exists",
        5170 => "format error",
        5180 => "data number is inadequate",
        5200 => "data range exceeded",
        _ => "undocumented error",
    }
}

fn fields(body: &[u8]) -> Vec<String> {
    String::from_utf8_lossy(body)
        .split([',', '\r', '\n'])
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_field<T: FromStr>(field: &str, what: &str) -> Result<T> {
    field
        .parse()
        .map_err(|_| Error::Protocol(format!("{} field {:?} is not a number", what, field)))
}

/// Decode the controller's answer to `command`.
pub fn decode_reply(command: &Command, message: &Message) -> Result<Reply> {
    let keyword = command.keyword();

    if message.code == TX_RESULT {
        let text = String::from_utf8_lossy(&message.body);
        let text = text.trim_end_matches(['\r', '\n']);
        if text.len() != 4 || !text.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Protocol(format!("malformed result code {:?}", text)));
        }
        let code: u16 = parse_field(text, "result")?;
        if code != 0 {
            return Err(Error::Controller { code, meaning: describe_error(code) });
        }
        if command.is_query() {
            return Err(Error::Protocol(format!("{} answered without data", keyword)));
        }
        return Ok(Reply::Done);
    }

    if message.code != TX_DATA {
        return Err(Error::Protocol(format!("unexpected transaction {}", message.code)));
    }
    if !command.is_query() {
        return Err(Error::Protocol(format!("{} answered with data", keyword)));
    }

    let fields = fields(&message.body);
    let what: &'static str = keyword.into();
    match command {
        Command::Ralarm => {
            let codes = fields
                .iter()
                .map(|f| parse_field::<u16>(f, what))
                .collect::<Result<Vec<_>>>()?;
            Ok(Reply::Alarms(codes.into_iter().filter(|&c| c != 0).collect()))
        }
        Command::Rjdir(_) => Ok(Reply::Jobs(fields)),
        Command::Rjseq => match fields.as_slice() {
            [job, line, step] => Ok(Reply::JobSequence(JobSequence {
                job: job.clone(),
                line: parse_field(line, what)?,
                step: parse_field(step, what)?,
            })),
            _ => Err(Error::Protocol(format!("RJSEQ expects 3 fields, got {}", fields.len()))),
        },
        Command::Rpos => {
            if fields.len() < 6 {
                return Err(Error::Protocol(format!("RPOS expects at least 6 fields, got {}", fields.len())));
            }
            let c = fields[..6]
                .iter()
                .map(|f| parse_field::<f64>(f, what))
                .collect::<Result<Vec<_>>>()?;
            let form = fields[6..]
                .iter()
                .map(|f| parse_field::<i32>(f, what))
                .collect::<Result<Vec<_>>>()?;
            Ok(Reply::Position(Position { x: c[0], y: c[1], z: c[2], tx: c[3], ty: c[4], tz: c[5], form }))
        }
        Command::Rposj => {
            if fields.is_empty() {
                return Err(Error::Protocol("RPOSJ answered with no axes".into()));
            }
            let pulses = fields
                .iter()
                .map(|f| parse_field::<i32>(f, what))
                .collect::<Result<Vec<_>>>()?;
            Ok(Reply::Pulses(pulses))
        }
        Command::Rstats => match fields.as_slice() {
            [d1, d2] => Ok(Reply::Status(Status {
                data1: parse_field(d1, what)?,
                data2: parse_field(d2, what)?,
            })),
            _ => Err(Error::Protocol(format!("RSTATS expects 2 fields, got {}", fields.len()))),
        },
        _ => Err(Error::Protocol(format!("{} does not read data", keyword))),
    }
}

// ============================================================================
// Files sent by the controller
// ============================================================================

/// A file the controller sent on its own initiative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingFile {
    pub name: String,
    pub data: Vec<u8>,
}

/// Lines ended by CR, LF or CR LF. A final unterminated line counts.
fn lines(body: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut i = 0;
    while i < body.len() {
        if body[i] == b'\r' || body[i] == b'\n' {
            out.push(&body[start..i]);
            if body[i] == b'\r' && body.get(i + 1) == Some(&b'\n') {
                i += 1;
            }
            start = i + 1;
        }
        i += 1;
    }
    if start < body.len() {
        out.push(&body[start..]);
    }
    out
}

/// Unpack a file transfer message. The first line names the file, the
/// transaction code gives its extension, and the remaining lines are the
/// contents, stored CR terminated.
pub fn decode_file(message: &Message) -> Result<IncomingFile> {
    let extension = file_extension(&message.code).ok_or_else(|| {
        Error::Protocol(format!("transaction {} does not carry a file", message.code))
    })?;

    let lines = lines(&message.body);
    let stem = lines
        .first()
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .filter(|stem| !stem.is_empty())
        .ok_or_else(|| Error::Protocol(format!("{} file arrived without a name", extension)))?;

    let name = format!("{}.{}", stem, extension);
    if !valid_name(&name) {
        return Err(Error::Parameter(format!("{:?} is not a usable file name", name)));
    }

    let mut data = lines[1..].join(&b'\r');
    data.push(b'\r');
    Ok(IncomingFile { name, data })
}

// ============================================================================
// Controller
// ============================================================================

/// Client for a live controller's host-link port.
pub struct Controller {
    link: HostLink,
    reply_wait: Duration,
}

impl Controller {
    pub fn new(link: HostLink) -> Self {
        Controller { link, reply_wait: REPLY_WAIT }
    }

    /// Validate, send, and decode one command.
    pub fn execute(&mut self, command: &Command) -> Result<Reply> {
        let request = command.encode()?;
        info!("> {}", request);

        let body = format!("{}\r", request);
        let wait = command.reply_wait(self.reply_wait);
        let message = self
            .link
            .exchange(TX_COMMAND, body.as_bytes(), wait)
            .map_err(|e| e.context(&request))?;

        let reply = decode_reply(command, &message).map_err(|e| e.context(&request))?;
        info!("< {}", reply);
        Ok(reply)
    }

    fn expect_done(&mut self, command: Command) -> Result<()> {
        match self.execute(&command)? {
            Reply::Done => Ok(()),
            other => Err(Error::Protocol(format!("{} answered {:?}", command, other))),
        }
    }

    pub fn servo_power(&mut self, on: bool) -> Result<()> {
        self.expect_done(Command::Svon(on))
    }

    pub fn move_to(&mut self, linear: bool, speed: f64, position: &str) -> Result<()> {
        self.expect_done(Command::Move { linear, speed, position: position.to_string() })
    }

    pub fn read_status(&mut self) -> Result<Status> {
        match self.execute(&Command::Rstats)? {
            Reply::Status(status) => Ok(status),
            other => Err(Error::Protocol(format!("RSTATS answered {:?}", other))),
        }
    }

    pub fn read_position(&mut self) -> Result<Position> {
        match self.execute(&Command::Rpos)? {
            Reply::Position(position) => Ok(position),
            other => Err(Error::Protocol(format!("RPOS answered {:?}", other))),
        }
    }

    /// Wait for the controller to send a file, store it in `catalog` and
    /// confirm it. A file that cannot be stored is never confirmed, so the
    /// controller reports the transfer as failed.
    pub fn receive_file(&mut self, catalog: &mut DiskCatalog, wait: Option<Duration>) -> Result<IncomingFile> {
        let message = self.link.receive_message(wait)?;
        let file = decode_file(&message)?;
        info!("< {} ({} bytes)", file.name, file.data.len());

        catalog.commit(&file.name, &file.data)?;
        self.link
            .send_message(TX_RESULT, RESULT_OK)
            .map_err(|e| e.context(&file.name))?;
        Ok(file)
    }

    /// Poll RSTATS until the robot is no longer running. An alarm or error
    /// while waiting is reported as a failure.
    pub fn wait_until_stopped(&mut self, poll: Duration, limit: Option<Duration>) -> Result<Status> {
        let started = Instant::now();
        loop {
            let status = self.read_status()?;
            debug!("status {}", status);
            if status.alarm() || status.error() {
                return Err(Error::Protocol(format!("robot stopped with status {}", status)));
            }
            if !status.running() {
                return Ok(status);
            }
            if let Some(limit) = limit {
                if started.elapsed() >= limit {
                    return Err(Error::Timeout(limit));
                }
            }
            thread::sleep(poll);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
