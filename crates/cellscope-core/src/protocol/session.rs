//! Transaction session
//!
//! Turns one unreliable byte transport into a reliable request/response
//! channel: a FIFO single-flight lock serializes callers onto the wire,
//! each command retries with per-attempt timeouts, and configuration
//! access is bracketed by the device's EEPROM open/close gate.

use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex, MutexGuard};
use tokio::time::{sleep, timeout_at, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::error::{FramingError, ProtocolError};
use super::frame::{self, Frame, Opcode};
use super::registers::{
    decode_temperature, decode_text, encode_temperature, PackedDate, EEPROM_CLOSE_PAYLOAD,
    EEPROM_OPEN_PAYLOAD, REG_CELL_VOLTAGES, REG_EEPROM_CLOSE, REG_EEPROM_OPEN, REG_HARDWARE_INFO,
    REG_HARDWARE_VERSION, REG_MOSFET_CONTROL,
};
use super::serial::SerialTransport;
use super::stream::FrameAssembler;
use super::transport::Transport;
use super::{
    COMMAND_ATTEMPTS, DEFAULT_BAUD_RATE, DEFAULT_TIMEOUT_MS, INTER_READ_DELAY_MS, RETRY_BACKOFF_MS,
};
use crate::config::ConfigSnapshot;
use crate::telemetry::{CellVoltages, TelemetrySnapshot};
use crate::traffic::{Direction, TrafficEvent, TrafficRecorder};

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// No transport attached
    Disconnected,
    /// Transport being opened/attached
    Connecting,
    /// Ready for commands
    Connected,
    /// An unrecoverable transport failure occurred; requires an explicit
    /// disconnect before reconnecting
    Faulted,
}

/// Session configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Baud rate used when the session opens its own serial port
    pub baud_rate: u32,
    /// Per-attempt response window
    pub attempt_timeout: Duration,
    /// Attempts per command before the first-seen error surfaces
    pub attempts: u32,
    /// Linear backoff step between attempts (attempt index × step)
    pub backoff_step: Duration,
    /// Device turnaround delay between the reads of a full-config read
    pub inter_read_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            attempt_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            attempts: COMMAND_ATTEMPTS,
            backoff_step: Duration::from_millis(RETRY_BACKOFF_MS),
            inter_read_delay: Duration::from_millis(INTER_READ_DELAY_MS),
        }
    }
}

/// State guarded by the single-flight lock
struct Io<T> {
    transport: Option<T>,
    assembler: FrameAssembler,
    eeprom_open: bool,
}

/// A transaction session over one exclusively-owned transport.
///
/// One session per physical link; independent sessions over distinct
/// transports are fine (and how the tests run). Callers share the session
/// behind an `Arc`: all commands take `&self` and serialize internally in
/// strict FIFO order.
pub struct Session<T: Transport> {
    io: Mutex<Io<T>>,
    state: StdMutex<SessionState>,
    cancel: StdMutex<CancellationToken>,
    recorder: Arc<TrafficRecorder>,
    config: SessionConfig,
    tx_bytes: AtomicU64,
    rx_bytes: AtomicU64,
    tx_frames: AtomicU64,
    rx_frames: AtomicU64,
}

impl<T: Transport> Session<T> {
    /// Create a new session (not yet connected)
    pub fn new(config: SessionConfig) -> Self {
        Self {
            io: Mutex::new(Io {
                transport: None,
                assembler: FrameAssembler::new(),
                eeprom_open: false,
            }),
            state: StdMutex::new(SessionState::Disconnected),
            cancel: StdMutex::new(CancellationToken::new()),
            recorder: Arc::new(TrafficRecorder::default()),
            config,
            tx_bytes: AtomicU64::new(0),
            rx_bytes: AtomicU64::new(0),
            tx_frames: AtomicU64::new(0),
            rx_frames: AtomicU64::new(0),
        }
    }

    /// Current session state
    pub fn state(&self) -> SessionState {
        *self.state.lock().expect("state lock")
    }

    fn set_state(&self, state: SessionState) {
        *self.state.lock().expect("state lock") = state;
    }

    /// Session configuration
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The traffic recorder observing this session's wire
    pub fn traffic(&self) -> &TrafficRecorder {
        &self.recorder
    }

    /// Subscribe to live (direction, timestamp, bytes) traffic events
    pub fn subscribe_traffic(&self) -> broadcast::Receiver<TrafficEvent> {
        self.recorder.subscribe()
    }

    /// Cumulative (tx_bytes, rx_bytes, tx_frames, rx_frames) counters
    pub fn counters(&self) -> (u64, u64, u64, u64) {
        (
            self.tx_bytes.load(Ordering::Relaxed),
            self.rx_bytes.load(Ordering::Relaxed),
            self.tx_frames.load(Ordering::Relaxed),
            self.rx_frames.load(Ordering::Relaxed),
        )
    }

    fn begin_connect(&self) -> Result<(), ProtocolError> {
        let mut state = self.state.lock().expect("state lock");
        match *state {
            SessionState::Disconnected => {
                *state = SessionState::Connecting;
                Ok(())
            }
            // A faulted session must be explicitly disconnected first
            _ => Err(ProtocolError::AlreadyConnected),
        }
    }

    async fn attach(&self, transport: T) {
        let mut io = self.io.lock().await;
        io.transport = Some(transport);
        io.assembler.clear();
        io.eeprom_open = false;
        drop(io);

        *self.cancel.lock().expect("cancel lock") = CancellationToken::new();
        self.set_state(SessionState::Connected);
    }

    /// Attach an already-opened transport and enter `Connected`.
    ///
    /// Fails with [`ProtocolError::AlreadyConnected`] unless the session is
    /// `Disconnected`.
    pub async fn connect(&self, transport: T) -> Result<(), ProtocolError> {
        self.begin_connect()?;
        self.attach(transport).await;
        debug!("session connected");
        Ok(())
    }

    /// Disconnect: abort any in-flight command, release the transport, and
    /// enter `Disconnected`. Safe to call from any state; also the explicit
    /// recovery path out of `Faulted`.
    pub async fn disconnect(&self) {
        // Flip state first so nothing new enqueues behind us, then abort
        // whatever is currently suspended on the wire
        self.set_state(SessionState::Disconnected);
        self.cancel.lock().expect("cancel lock").cancel();

        let mut io = self.io.lock().await;
        if let Some(mut transport) = io.transport.take() {
            if let Err(e) = transport.close().await {
                debug!(error = %e, "transport close failed during disconnect");
            }
        }
        io.assembler.clear();
        io.eeprom_open = false;
        debug!("session disconnected");
    }

    async fn lock_connected(&self) -> Result<MutexGuard<'_, Io<T>>, ProtocolError> {
        // Checked before enqueueing: once disconnect begins no further
        // commands may join the queue
        if self.state() != SessionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        let io = self.io.lock().await;
        if self.state() != SessionState::Connected {
            return Err(ProtocolError::NotConnected);
        }
        Ok(io)
    }

    /// Record an unrecoverable transport failure and fault the session
    fn fault(&self, error: io::Error) -> ProtocolError {
        let mut state = self.state.lock().expect("state lock");
        if *state == SessionState::Connected {
            *state = SessionState::Faulted;
        }
        warn!(error = %error, "transport failure, session faulted");
        ProtocolError::Transport(error.to_string())
    }

    /// One write-then-read-until-frame attempt
    async fn attempt(
        &self,
        io: &mut Io<T>,
        request: &[u8],
        register: u8,
        cancel: &CancellationToken,
    ) -> Result<Vec<u8>, ProtocolError> {
        if cancel.is_cancelled() {
            return Err(ProtocolError::Disconnected);
        }

        let Io {
            transport,
            assembler,
            ..
        } = io;
        let transport = transport.as_mut().ok_or(ProtocolError::NotConnected)?;

        // Stale bytes from a previous command must not satisfy this one
        assembler.clear();

        if let Err(e) = transport.write_bytes(request).await {
            return Err(self.fault(e));
        }
        self.recorder.record(Direction::Tx, request);
        self.tx_bytes
            .fetch_add(request.len() as u64, Ordering::Relaxed);
        self.tx_frames.fetch_add(1, Ordering::Relaxed);

        let deadline = Instant::now() + self.config.attempt_timeout;
        let mut buf = [0u8; 512];

        loop {
            let read = tokio::select! {
                _ = cancel.cancelled() => return Err(ProtocolError::Disconnected),
                r = timeout_at(deadline, transport.read_chunk(&mut buf)) => r,
            };

            let n = match read {
                Err(_elapsed) => return Err(ProtocolError::Timeout),
                Ok(Err(e)) => return Err(self.fault(e)),
                Ok(Ok(0)) => {
                    return Err(self.fault(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "transport closed by peer",
                    )))
                }
                Ok(Ok(n)) => n,
            };

            self.recorder.record(Direction::Rx, &buf[..n]);
            self.rx_bytes.fetch_add(n as u64, Ordering::Relaxed);

            assembler.push(&buf[..n]);
            while let Some(raw) = assembler.next_frame() {
                match Frame::decode(&raw) {
                    Ok(Frame::Response {
                        register: answered,
                        status,
                        payload,
                    }) if answered == register => {
                        self.rx_frames.fetch_add(1, Ordering::Relaxed);
                        if status != 0 {
                            return Err(ProtocolError::Device(status));
                        }
                        return Ok(payload);
                    }
                    Ok(other) => {
                        // A frame for some other register (or an echoed
                        // request) is not an answer to this command
                        debug!(?other, "ignoring frame not addressed to command");
                        self.rx_frames.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    /// Run one command: up to `attempts` tries with linear backoff,
    /// surfacing the first-seen error once exhausted so callers can tell
    /// "device rejected" from "nothing answered".
    async fn execute(
        &self,
        io: &mut Io<T>,
        opcode: Opcode,
        register: u8,
        payload: &[u8],
    ) -> Result<Vec<u8>, ProtocolError> {
        let request = frame::encode(register, opcode, payload)?;
        let cancel = self.cancel.lock().expect("cancel lock").clone();

        let mut first_error: Option<ProtocolError> = None;
        for attempt in 0..self.config.attempts {
            if attempt > 0 {
                sleep(self.config.backoff_step * attempt).await;
            }

            match self.attempt(io, &request, register, &cancel).await {
                Ok(data) => return Ok(data),
                Err(e) if e.is_retryable() => {
                    debug!(register, attempt, error = %e, "command attempt failed");
                    first_error.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(first_error.unwrap_or(ProtocolError::Timeout))
    }

    /// Open the EEPROM gate. Must not already be open.
    async fn open_gate(&self, io: &mut Io<T>) -> Result<(), ProtocolError> {
        if io.eeprom_open {
            return Err(ProtocolError::SequenceError("EEPROM gate already open"));
        }
        self.execute(io, Opcode::Write, REG_EEPROM_OPEN, &EEPROM_OPEN_PAYLOAD)
            .await?;
        io.eeprom_open = true;
        Ok(())
    }

    /// Close the EEPROM gate. Failures are logged and swallowed: the close
    /// must never mask the bracketed operation's outcome, and one close is
    /// issued per successful open no matter how the inner operation ended.
    async fn close_gate(&self, io: &mut Io<T>) {
        if !io.eeprom_open {
            warn!("EEPROM close requested without a matching open");
            return;
        }
        io.eeprom_open = false;
        if let Err(e) = self
            .execute(io, Opcode::Write, REG_EEPROM_CLOSE, &EEPROM_CLOSE_PAYLOAD)
            .await
        {
            warn!(error = %e, "EEPROM close failed, device gate state unknown");
        }
    }

    async fn gated_write(
        &self,
        io: &mut Io<T>,
        register: u8,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        self.open_gate(io).await?;
        let result = self.execute(io, Opcode::Write, register, data).await;
        self.close_gate(io).await;
        result.map(|_| ())
    }

    /// Read the hardware-info block and decode a fresh telemetry snapshot
    pub async fn read_telemetry(&self) -> Result<TelemetrySnapshot, ProtocolError> {
        let mut io = self.lock_connected().await?;
        let payload = self
            .execute(&mut io, Opcode::Read, REG_HARDWARE_INFO, &[])
            .await?;
        TelemetrySnapshot::from_payload(&payload)
    }

    /// Read the per-cell voltage block
    pub async fn read_cell_voltages(&self) -> Result<CellVoltages, ProtocolError> {
        let mut io = self.lock_connected().await?;
        let payload = self
            .execute(&mut io, Opcode::Read, REG_CELL_VOLTAGES, &[])
            .await?;
        CellVoltages::from_payload(&payload)
    }

    /// Read the hardware version string
    pub async fn read_hardware_version(&self) -> Result<String, ProtocolError> {
        let mut io = self.lock_connected().await?;
        let payload = self
            .execute(&mut io, Opcode::Read, REG_HARDWARE_VERSION, &[])
            .await?;
        Ok(decode_text(&payload))
    }

    /// Write a 16-bit register inside an EEPROM bracket
    pub async fn write_register(&self, register: u8, value: u16) -> Result<(), ProtocolError> {
        let mut io = self.lock_connected().await?;
        self.gated_write(&mut io, register, &value.to_be_bytes())
            .await
    }

    /// Write a register with an arbitrary payload (text registers and other
    /// multi-byte parameters) inside an EEPROM bracket
    pub async fn write_register_bytes(
        &self,
        register: u8,
        data: &[u8],
    ) -> Result<(), ProtocolError> {
        let mut io = self.lock_connected().await?;
        self.gated_write(&mut io, register, data).await
    }

    /// Write a temperature-kind register from a value in °C, rounding to
    /// the device's 0.1-degree resolution
    pub async fn write_temperature_register(
        &self,
        register: u8,
        celsius: f64,
    ) -> Result<(), ProtocolError> {
        self.write_register(register, encode_temperature(celsius))
            .await
    }

    /// Switch the charge/discharge FETs. `true` enables the corresponding
    /// path; the wire encodes the *disabled* bits.
    pub async fn set_mosfet(
        &self,
        charge_enabled: bool,
        discharge_enabled: bool,
    ) -> Result<(), ProtocolError> {
        let mut bits = 0u8;
        if !charge_enabled {
            bits |= 0x01;
        }
        if !discharge_enabled {
            bits |= 0x02;
        }
        let mut io = self.lock_connected().await?;
        self.gated_write(&mut io, REG_MOSFET_CONTROL, &[0x00, bits])
            .await
    }

    async fn read_word(&self, io: &mut Io<T>, register: u8) -> Result<u16, ProtocolError> {
        let payload = self.execute(io, Opcode::Read, register, &[]).await?;
        if payload.len() < 2 {
            return Err(FramingError::LengthMismatch {
                declared: 2,
                available: payload.len(),
            }
            .into());
        }
        // Device turnaround pause between the reads of a config sweep
        sleep(self.config.inter_read_delay).await;
        Ok(u16::from_be_bytes([payload[0], payload[1]]))
    }

    async fn read_string(&self, io: &mut Io<T>, register: u8) -> Result<String, ProtocolError> {
        let payload = self.execute(io, Opcode::Read, register, &[]).await?;
        sleep(self.config.inter_read_delay).await;
        Ok(decode_text(&payload))
    }

    async fn read_temp(&self, io: &mut Io<T>, register: u8) -> Result<f64, ProtocolError> {
        Ok(decode_temperature(self.read_word(io, register).await?))
    }

    async fn read_volts(&self, io: &mut Io<T>, register: u8) -> Result<f64, ProtocolError> {
        Ok(self.read_word(io, register).await? as f64 / 100.0)
    }

    async fn read_cell_volts(&self, io: &mut Io<T>, register: u8) -> Result<f64, ProtocolError> {
        Ok(self.read_word(io, register).await? as f64 / 1000.0)
    }

    async fn read_amps(&self, io: &mut Io<T>, register: u8) -> Result<f64, ProtocolError> {
        Ok(self.read_word(io, register).await? as i16 as f64 / 100.0)
    }

    async fn read_amp_hours(&self, io: &mut Io<T>, register: u8) -> Result<f64, ProtocolError> {
        Ok(self.read_word(io, register).await? as f64 / 100.0)
    }

    async fn read_config_inner(&self, io: &mut Io<T>) -> Result<ConfigSnapshot, ProtocolError> {
        Ok(ConfigSnapshot {
            design_capacity: self.read_amp_hours(io, 0x10).await?,
            cycle_capacity: self.read_amp_hours(io, 0x11).await?,
            cell_100_voltage: self.read_cell_volts(io, 0x12).await?,
            manufacture_date: PackedDate::from_raw(self.read_word(io, 0x15).await?),
            serial_number: self.read_word(io, 0x16).await?,
            cycle_count: self.read_word(io, 0x17).await?,
            charge_over_temp: self.read_temp(io, 0x18).await?,
            charge_over_temp_release: self.read_temp(io, 0x19).await?,
            charge_under_temp: self.read_temp(io, 0x1A).await?,
            charge_under_temp_release: self.read_temp(io, 0x1B).await?,
            discharge_over_temp: self.read_temp(io, 0x1C).await?,
            discharge_over_temp_release: self.read_temp(io, 0x1D).await?,
            discharge_under_temp: self.read_temp(io, 0x1E).await?,
            discharge_under_temp_release: self.read_temp(io, 0x1F).await?,
            pack_over_voltage: self.read_volts(io, 0x20).await?,
            pack_over_voltage_release: self.read_volts(io, 0x21).await?,
            pack_under_voltage: self.read_volts(io, 0x22).await?,
            pack_under_voltage_release: self.read_volts(io, 0x23).await?,
            cell_over_voltage: self.read_cell_volts(io, 0x24).await?,
            cell_over_voltage_release: self.read_cell_volts(io, 0x25).await?,
            cell_under_voltage: self.read_cell_volts(io, 0x26).await?,
            cell_under_voltage_release: self.read_cell_volts(io, 0x27).await?,
            charge_overcurrent: self.read_amps(io, 0x28).await?,
            discharge_overcurrent: self.read_amps(io, 0x29).await?,
            balance_start_voltage: self.read_cell_volts(io, 0x2A).await?,
            balance_window: self.read_cell_volts(io, 0x2B).await?,
            sense_resistance: self.read_word(io, 0x2C).await?,
            function_config: self.read_word(io, 0x2D).await?,
            ntc_config: self.read_word(io, 0x2E).await?,
            cell_count: self.read_word(io, 0x2F).await?,
            fet_control: self.read_word(io, 0x30).await?,
            led_timer: self.read_word(io, 0x31).await?,
            cell_80_voltage: self.read_cell_volts(io, 0x32).await?,
            cell_60_voltage: self.read_cell_volts(io, 0x33).await?,
            cell_40_voltage: self.read_cell_volts(io, 0x34).await?,
            cell_20_voltage: self.read_cell_volts(io, 0x35).await?,
            manufacturer_name: self.read_string(io, 0xA0).await?,
            device_name: self.read_string(io, 0xA1).await?,
            barcode: self.read_string(io, 0xA2).await?,
        })
    }

    /// Read the full configuration inside one EEPROM bracket.
    ///
    /// A mid-sequence failure still closes the gate and surfaces the first
    /// failure; no partial snapshot is ever returned.
    pub async fn read_config(&self) -> Result<ConfigSnapshot, ProtocolError> {
        let mut io = self.lock_connected().await?;
        self.open_gate(&mut io).await?;
        let result = self.read_config_inner(&mut io).await;
        self.close_gate(&mut io).await;
        result
    }
}

impl Session<SerialTransport> {
    /// Open a serial port at the configured baud rate and connect.
    ///
    /// Open failures surface immediately (the device is unreachable) and
    /// leave the session `Disconnected`; they are never retried.
    pub async fn connect_port(&self, port_name: &str) -> Result<(), ProtocolError> {
        self.begin_connect()?;
        match SerialTransport::open(port_name, Some(self.config.baud_rate)) {
            Ok(transport) => {
                self.attach(transport).await;
                debug!(port = port_name, "session connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(SessionState::Disconnected);
                Err(e)
            }
        }
    }
}

impl<T: Transport> Drop for Session<T> {
    fn drop(&mut self) {
        // Best effort: stop new work and abort anything suspended on the
        // wire; the transport handle is released when the inner state drops
        if let Ok(mut state) = self.state.lock() {
            *state = SessionState::Disconnected;
        }
        if let Ok(cancel) = self.cancel.lock() {
            cancel.cancel();
        }
    }
}
