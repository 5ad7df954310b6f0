//! Cross validation against an out of process reference loop.
//!
//! Host and reference exchange postcard frames, COBS encoded and zero
//! terminated: one `Configure` answered by `Configured`, then one `Tick`
//! per control call answered by a `Report`.

use std::{ffi::OsStr, process::Stdio};

use common::{HostMessage, LockStatus, ReferenceMessage, ReferenceSetup, Stimulus, TickReport};
use log::{debug, info, warn};
use sw_pll::{
    AppPll, ConfigError, FrequencyMapper, Gains, LoopConfig, Lut, PeriodFraction, RegisterFormat,
    SwPll,
};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

use crate::driver::{Driver, Scenario};
use crate::profile::{Profile, ProfileError};

#[derive(Debug, Error)]
pub enum ReferenceError {
    #[error("IO error")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error")]
    SerializationFailed(#[from] common::Error),
    #[error("Invalid loop configuration: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Profile error")]
    ProfileError(#[from] ProfileError),
    #[error("Reference closed the connection")]
    Closed,
    #[error("Reference rejected the request: {0}")]
    Rejected(String),
    #[error("Unexpected reply from reference")]
    UnexpectedReply,
    #[error("Reference process has no {0}")]
    MissingPipe(&'static str),
    #[error("Reference built {reference} LUT entries, {local} expected")]
    LutSizeMismatch { reference: u16, local: usize },
}

enum Incoming<M> {
    Message(M),
    Malformed,
    Closed,
}

/// Reads one zero terminated frame. A trailing partial frame counts as a
/// closed connection.
async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    frame: &mut Vec<u8>,
) -> Result<bool, std::io::Error> {
    frame.clear();
    reader.read_until(0, frame).await?;
    Ok(frame.last() == Some(&0))
}

/// Loop pieces rebuilt from a [`ReferenceSetup`].
pub struct LoopParts {
    pub pll: AppPll,
    pub lut: Lut,
    pub config: LoopConfig,
}

impl LoopParts {
    pub fn from_setup(setup: &ReferenceSetup) -> Result<Self, ConfigError> {
        let pll = AppPll::new(
            setup.input_frequency,
            setup.feedback_multiplier,
            setup.ref_divider,
            setup.output_divider,
            setup.app_clock_divider,
        )?;
        let lut = Lut::from_registers(&pll, RegisterFormat::default(), &setup.lut)?;
        let config = LoopConfig {
            ratio: setup.ratio,
            ticks_per_call: setup.ticks_per_call,
            gains: Gains::from_q16(setup.kp, setup.ki, setup.kii),
            initial_count: setup.initial_count,
            initial_ref_count: 0,
            counter_bits: setup.counter_bits,
        };

        let parts = Self { pll, lut, config };
        parts.sw_pll()?;
        Ok(parts)
    }

    pub fn sw_pll(&self) -> Result<SwPll<'_>, ConfigError> {
        SwPll::new(self.config, FrequencyMapper::new(self.pll, &self.lut))
    }
}

/// Host side of the protocol over any byte stream.
pub struct ReferenceClient<R, W> {
    reader: BufReader<R>,
    writer: W,
    rx_data: Vec<u8>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> ReferenceClient<R, W> {
    pub fn new(reader: R, writer: W) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            rx_data: Vec::with_capacity(64),
        }
    }

    async fn send_message(&mut self, msg: &HostMessage) -> Result<(), ReferenceError> {
        let data = common::encode_host_message(msg)?;
        self.writer.write_all(&data).await?;
        self.writer.flush().await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<ReferenceMessage, ReferenceError> {
        if !read_frame(&mut self.reader, &mut self.rx_data).await? {
            return Err(ReferenceError::Closed);
        }
        Ok(common::decode_reference_message(&mut self.rx_data)?)
    }

    /// Returns the table size the reference built.
    pub async fn configure(&mut self, setup: &ReferenceSetup) -> Result<u16, ReferenceError> {
        self.send_message(&HostMessage::Configure(setup.clone())).await?;
        match self.receive().await? {
            ReferenceMessage::Configured { lut_size } => Ok(lut_size),
            ReferenceMessage::Rejected(reason) => Err(ReferenceError::Rejected(reason)),
            ReferenceMessage::Report(_) => Err(ReferenceError::UnexpectedReply),
        }
    }

    pub async fn tick(&mut self, stimulus: Stimulus) -> Result<TickReport, ReferenceError> {
        self.send_message(&HostMessage::Tick(stimulus)).await?;
        match self.receive().await? {
            ReferenceMessage::Report(report) => Ok(report),
            ReferenceMessage::Rejected(reason) => Err(ReferenceError::Rejected(reason)),
            ReferenceMessage::Configured { .. } => Err(ReferenceError::UnexpectedReply),
        }
    }
}

/// A reference implementation running as a child process, spoken to over
/// its stdin and stdout.
pub struct ReferenceProcess {
    child: Child,
    client: ReferenceClient<ChildStdout, ChildStdin>,
}

impl ReferenceProcess {
    pub fn spawn<I, S>(program: impl AsRef<OsStr>, args: I) -> Result<Self, ReferenceError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child.stdin.take().ok_or(ReferenceError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(ReferenceError::MissingPipe("stdout"))?;

        Ok(Self {
            child,
            client: ReferenceClient::new(stdout, stdin),
        })
    }

    pub fn client(&mut self) -> &mut ReferenceClient<ChildStdout, ChildStdin> {
        &mut self.client
    }

    /// Closes stdin and waits for the process to exit.
    pub async fn shutdown(self) -> Result<std::process::ExitStatus, ReferenceError> {
        let Self { mut child, client } = self;
        drop(client);
        Ok(child.wait().await?)
    }
}

async fn send_reply<W: AsyncWrite + Unpin>(
    writer: &mut W,
    msg: &ReferenceMessage,
) -> Result<(), ReferenceError> {
    let data = common::encode_reference_message(msg)?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

async fn next_host_message<R: AsyncRead + Unpin>(
    reader: &mut BufReader<R>,
    frame: &mut Vec<u8>,
) -> Result<Incoming<HostMessage>, ReferenceError> {
    if !read_frame(reader, frame).await? {
        return Ok(Incoming::Closed);
    }
    Ok(match common::decode_host_message(frame) {
        Ok(msg) => Incoming::Message(msg),
        Err(_) => Incoming::Malformed,
    })
}

/// Reference loop server. Runs until the host closes the stream.
pub async fn serve<R, W>(reader: R, mut writer: W) -> Result<(), ReferenceError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut frame = Vec::with_capacity(64);
    let mut pending = None;

    loop {
        let msg = match pending.take() {
            Some(msg) => msg,
            None => match next_host_message(&mut reader, &mut frame).await? {
                Incoming::Message(msg) => msg,
                Incoming::Malformed => {
                    send_reply(&mut writer, &ReferenceMessage::Rejected("malformed frame".into()))
                        .await?;
                    continue;
                }
                Incoming::Closed => return Ok(()),
            },
        };

        match msg {
            HostMessage::Configure(setup) => match LoopParts::from_setup(&setup) {
                Ok(parts) => {
                    info!("Reference configured with {} LUT entries", parts.lut.size());
                    let lut_size = parts.lut.size() as u16;
                    send_reply(&mut writer, &ReferenceMessage::Configured { lut_size }).await?;

                    match run_loop(&parts, &mut reader, &mut writer, &mut frame).await? {
                        Some(next) => pending = Some(next),
                        None => return Ok(()),
                    }
                }
                Err(err) => {
                    warn!("Rejecting configuration: {}", err);
                    send_reply(&mut writer, &ReferenceMessage::Rejected(err.to_string())).await?;
                }
            },
            HostMessage::Tick(_) => {
                send_reply(&mut writer, &ReferenceMessage::Rejected("not configured".into()))
                    .await?;
            }
        }
    }
}

/// Serves ticks until the stream closes or a new configuration arrives,
/// which is handed back.
async fn run_loop<R, W>(
    parts: &LoopParts,
    reader: &mut BufReader<R>,
    writer: &mut W,
    frame: &mut Vec<u8>,
) -> Result<Option<HostMessage>, ReferenceError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut sw_pll = parts.sw_pll()?;

    loop {
        let reply = match next_host_message(reader, frame).await? {
            Incoming::Closed => return Ok(None),
            Incoming::Malformed => ReferenceMessage::Rejected("malformed frame".into()),
            Incoming::Message(msg @ HostMessage::Configure(_)) => return Ok(Some(msg)),
            Incoming::Message(HostMessage::Tick(stimulus)) => {
                match PeriodFraction::from_fixed(stimulus.period_fraction) {
                    Some(fraction) => {
                        let res = sw_pll.tick_with_fraction(stimulus.mclk_count, fraction);
                        ReferenceMessage::Report(TickReport {
                            lock_status: res.lock_status,
                            register: res.register,
                            index: res.index as u16,
                        })
                    }
                    None => ReferenceMessage::Rejected("zero period fraction".into()),
                }
            }
        };
        send_reply(writer, &reply).await?;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mismatch {
    pub tick: usize,
    pub local: (LockStatus, u16),
    pub reference: (LockStatus, u16),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation {
    pub ticks: usize,
    pub mismatches: Vec<Mismatch>,
}

impl CrossValidation {
    pub fn is_equivalent(&self) -> bool {
        self.mismatches.is_empty()
    }
}

/// Drives the local loop and the reference with identical stimulus and
/// compares lock status and register every tick.
///
/// Both sides run on the Q16.16 gains sent to the reference.
pub async fn cross_validate<R, W>(
    profile: &Profile,
    scenario: Scenario,
    client: &mut ReferenceClient<R, W>,
) -> Result<CrossValidation, ReferenceError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let pll = profile.app_pll()?;
    let lut = profile.build_lut(&pll)?;
    let setup = profile.reference_setup(&pll, &lut)?;
    let parts = LoopParts::from_setup(&setup)?;

    let lut_size = client.configure(&setup).await?;
    if lut_size as usize != parts.lut.size() {
        return Err(ReferenceError::LutSizeMismatch {
            reference: lut_size,
            local: parts.lut.size(),
        });
    }

    let mut driver = Driver::new(parts.sw_pll()?, profile, scenario);
    let mut mismatches = Vec::new();
    let mut ticks = 0;

    while !driver.is_done() {
        let stimulus = driver.next_stimulus();
        let local = driver.apply(stimulus);
        let reference = client.tick(stimulus).await?;

        let local_state = (local.lock_status, local.register);
        let reference_state = (reference.lock_status, reference.register);
        if local_state != reference_state {
            warn!(
                "Tick {}: local {} {:#06x}, reference {} {:#06x}",
                local.tick, local_state.0, local_state.1, reference_state.0, reference_state.1
            );
            mismatches.push(Mismatch {
                tick: local.tick,
                local: local_state,
                reference: reference_state,
            });
        } else {
            debug!("Tick {}: {} {:#06x}", local.tick, local_state.0, local_state.1);
        }
        ticks += 1;
    }

    info!(
        "Cross validation finished: {} ticks, {} mismatches",
        ticks,
        mismatches.len()
    );
    Ok(CrossValidation { ticks, mismatches })
}
