// Cooperative control loop
// One task owns the controller. Each wake-up drains every input (override
// signal, command bytes, distance messages) and then runs whichever of the
// sensor and control cadences are due. A late cycle runs late; it is never
// skipped or run twice to catch up.

use std::io::{Read, Write};
use std::time::{Duration, Instant};

use clap::Parser;
use serialport::SerialPort;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender, error::TryRecvError};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::{
    CONTROL_HZ, CONTROL_INTERVAL, DEFAULT_BAUDRATE, POLL_INTERVAL, SENSOR_HZ, SENSOR_INTERVAL,
    SENSOR_STALE_AFTER, SERIAL_READ_TIMEOUT, TOPIC_BUS_OVERRIDE, TOPIC_BUS_STATE, TOPIC_CMD_ACK,
    TOPIC_CMD_RAW, TOPIC_RT_WHEELS, TOPIC_SENSORS,
};
use crate::control::Controller;
use crate::messages::{CommandAck, DistanceReadings, OverrideSignal, WheelActuation};
use crate::motor::WheelOutputs;
use crate::protocol::{FrameParser, Response};

/// Command-line options
#[derive(Debug, Clone, Parser)]
#[command(name = "patrol-motion", about = "Motion control runtime for the omni patrol base")]
pub struct Args {
    /// Serial port for the operator command link; commands are still
    /// accepted on the bus without it
    #[arg(short, long)]
    pub port: Option<String>,

    /// Serial baud rate
    #[arg(short, long, default_value_t = DEFAULT_BAUDRATE)]
    pub baud: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Serial error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed-interval cycle checked against a monotonic clock
#[derive(Debug, Clone)]
pub struct Cadence {
    interval: Duration,
    last: Option<Instant>,
}

impl Cadence {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// True at most once per call; the next period starts from `now`
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.saturating_duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Where a command came from, so its response goes back the same way
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Serial,
    Bus,
}

pub struct Runtime {
    controller: Controller,
    serial_parser: FrameParser,
    bus_parser: FrameParser,
    readings: DistanceReadings,
    readings_at: Option<Instant>,
    sensors_stale: bool,
    sensor_cadence: Cadence,
    control_cadence: Cadence,
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl Runtime {
    pub fn new() -> Self {
        Self {
            controller: Controller::new(),
            serial_parser: FrameParser::new(),
            bus_parser: FrameParser::new(),
            readings: DistanceReadings::default(),
            readings_at: None,
            sensors_stale: false,
            sensor_cadence: Cadence::new(SENSOR_INTERVAL),
            control_cadence: Cadence::new(CONTROL_INTERVAL),
        }
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    /// Feed raw command bytes and collect one response per completed command
    pub fn on_bytes(&mut self, source: Source, bytes: &[u8], now: Instant) -> Vec<Response> {
        let parser = match source {
            Source::Serial => &mut self.serial_parser,
            Source::Bus => &mut self.bus_parser,
        };
        let mut responses = Vec::new();
        for result in parser.feed_all(bytes, now) {
            let response = match result {
                Ok(line) => Some(self.controller.handle_line(&line, now)),
                Err(e) => self.controller.frame_error(&e),
            };
            responses.extend(response);
        }
        responses
    }

    /// Discard partial commands that stopped arriving
    pub fn expire_partial(&mut self, source: Source, now: Instant) -> Option<Response> {
        let parser = match source {
            Source::Serial => &mut self.serial_parser,
            Source::Bus => &mut self.bus_parser,
        };
        let error = parser.check_stale(now)?;
        self.controller.frame_error(&error)
    }

    pub fn on_override(&mut self, signal: OverrideSignal) {
        self.controller.set_master_override(signal.active);
    }

    pub fn on_readings(&mut self, readings: DistanceReadings, now: Instant) {
        if self.sensors_stale {
            info!("Distance readings resumed");
            self.sensors_stale = false;
        }
        self.readings = readings;
        self.readings_at = Some(now);
    }

    /// Run the sensor and control cycles that are due. Returns the wheel
    /// outputs when a control cycle ran.
    pub fn poll(&mut self, now: Instant) -> Option<WheelOutputs> {
        if self.sensor_cadence.due(now) {
            let fresh = self
                .readings_at
                .is_some_and(|t| now.saturating_duration_since(t) <= SENSOR_STALE_AFTER);
            if fresh {
                self.controller.sample_sensors(&mut self.readings);
            } else {
                if !self.sensors_stale && self.readings_at.is_some() {
                    warn!("Distance readings stale, treating every sensor as far");
                }
                self.sensors_stale = self.readings_at.is_some();
                self.controller.sample_sensors(&mut DistanceReadings::default());
            }
        }

        self.control_cadence
            .due(now)
            .then(|| self.controller.tick(now))
    }
}

/// Serial command link; a background thread turns blocking reads into a queue
struct SerialLink {
    writer: Box<dyn SerialPort>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl SerialLink {
    fn open(path: &str, baudrate: u32) -> Result<Self, RuntimeError> {
        let port = serialport::new(path, baudrate)
            .timeout(SERIAL_READ_TIMEOUT)
            .open()?;
        let reader = port.try_clone()?;
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::spawn(move || pump_reads(reader, tx));
        Ok(Self { writer: port, rx })
    }

    fn send(&mut self, response: &Response) -> Result<(), RuntimeError> {
        writeln!(self.writer, "{}", response)?;
        self.writer.flush()?;
        Ok(())
    }
}

/// Forward everything read from `reader` until EOF, a read error, or the
/// receiving side going away
fn pump_reads<R: Read>(mut reader: R, tx: UnboundedSender<Vec<u8>>) {
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                warn!("Serial link closed");
                break;
            }
            Ok(n) => {
                if tx.send(buf[..n].to_vec()).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                warn!("Serial read failed: {}", e);
                break;
            }
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let sub_override = session.declare_subscriber(TOPIC_BUS_OVERRIDE).await?;
    let sub_cmd = session.declare_subscriber(TOPIC_CMD_RAW).await?;
    let sub_sensors = session.declare_subscriber(TOPIC_SENSORS).await?;
    let pub_wheels = session.declare_publisher(TOPIC_RT_WHEELS).await?;
    let pub_state = session.declare_publisher(TOPIC_BUS_STATE).await?;
    let pub_ack = session.declare_publisher(TOPIC_CMD_ACK).await?;

    let mut link = match &args.port {
        Some(path) => {
            info!("Opening command link on {} at {} baud", path, args.baud);
            Some(SerialLink::open(path, args.baud)?)
        }
        None => None,
    };

    let mut runtime = Runtime::new();
    let mut tick = interval(POLL_INTERVAL);

    info!(
        "Runtime started: control {}Hz, sensors {}Hz",
        CONTROL_HZ, SENSOR_HZ
    );
    info!(
        "Subscribed to: {}, {}, {}",
        TOPIC_BUS_OVERRIDE, TOPIC_CMD_RAW, TOPIC_SENSORS
    );
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_RT_WHEELS, TOPIC_BUS_STATE, TOPIC_CMD_ACK
    );

    loop {
        tick.tick().await;
        let now = Instant::now();

        // 1. Override first so a stop lands before any queued motion command
        while let Ok(Some(sample)) = sub_override.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<OverrideSignal>(&payload) {
                Ok(signal) => runtime.on_override(signal),
                Err(e) => warn!("Failed to parse override signal: {}", e),
            }
        }

        // 2. Drain command bytes from both links
        let mut replies: Vec<(Source, Response)> = Vec::new();
        let mut link_closed = false;
        if let Some(link) = link.as_mut() {
            loop {
                match link.rx.try_recv() {
                    Ok(bytes) => replies.extend(
                        runtime
                            .on_bytes(Source::Serial, &bytes, now)
                            .into_iter()
                            .map(|r| (Source::Serial, r)),
                    ),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        link_closed = true;
                        break;
                    }
                }
            }
            replies.extend(
                runtime
                    .expire_partial(Source::Serial, now)
                    .map(|r| (Source::Serial, r)),
            );
        }
        if link_closed {
            warn!("Serial command link closed, accepting bus commands only");
            link = None;
        }

        while let Ok(Some(sample)) = sub_cmd.try_recv() {
            let payload = sample.payload().to_bytes();
            replies.extend(
                runtime
                    .on_bytes(Source::Bus, &payload, now)
                    .into_iter()
                    .map(|r| (Source::Bus, r)),
            );
        }
        replies.extend(runtime.expire_partial(Source::Bus, now).map(|r| (Source::Bus, r)));

        for (source, response) in &replies {
            debug!("Response: {}", response);
            if *source == Source::Serial {
                if let Some(l) = link.as_mut() {
                    if let Err(e) = l.send(response) {
                        warn!("Failed to write response: {}", e);
                    }
                }
            }
            let ack = CommandAck {
                line: response.to_string(),
            };
            pub_ack.put(serde_json::to_string(&ack)?).await?;
        }

        // 3. Latest distance message wins
        while let Ok(Some(sample)) = sub_sensors.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<DistanceReadings>(&payload) {
                Ok(readings) => runtime.on_readings(readings, now),
                Err(e) => warn!("Failed to parse distance readings: {}", e),
            }
        }

        // 4. Sensor and control cycles, then publish
        if let Some(outputs) = runtime.poll(now) {
            let actuation = WheelActuation::from(&outputs);
            pub_wheels.put(serde_json::to_string(&actuation)?).await?;

            let state = runtime.controller().bus_state();
            pub_state.put(serde_json::to_string(&state)?).await?;
        }
    }
}
