// Keyboard teleop: legacy motion keys, +/- speed, space stop, Esc quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::{info, warn};

use patrol_motion::config::{DEFAULT_MIN_SPEED, TOPIC_CMD_ACK, TOPIC_CMD_RAW};
use patrol_motion::messages::CommandAck;
use patrol_motion::protocol::command::key_to_direction;
use patrol_motion::protocol::escape_payload;

const SPEEDS: [u8; 3] = [100, 180, 255]; // max duty
// Stop after this long without a movement key; covers the key-repeat delay
const INPUT_TIMEOUT_MS: u64 = 600;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD_RAW).await?;
    let acks = session.declare_subscriber(TOPIC_CMD_ACK).await?;

    info!("Controls: W/S fwd/back, Q/E arcs, A/D rotate, 4/6 slide, 7/9/1/3 diagonals");
    info!("          5 or space stop, +/- speed, Esc quit");

    // Print whatever the runtime answers
    tokio::spawn(async move {
        while let Ok(sample) = acks.recv_async().await {
            let payload = sample.payload().to_bytes();
            if let Ok(ack) = serde_json::from_slice::<CommandAck>(&payload) {
                info!("{}", ack.line);
            }
        }
    });

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    command: &str,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(format!("<{}>", escape_payload(command))).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = SPEEDS.len() - 1;
    let mut moving = false;
    let mut last_movement_input = Instant::now();

    send(publisher, &speed_command(speed_idx)).await?;

    loop {
        // Poll for key with 20ms timeout
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                match code {
                    KeyCode::Esc if pressed => break,

                    KeyCode::Char(' ') if pressed => {
                        send(publisher, "STOP").await?;
                        moving = false;
                    }

                    // Speed control
                    KeyCode::Char('+') | KeyCode::Char('=') if pressed => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        send(publisher, &speed_command(speed_idx)).await?;
                    }
                    KeyCode::Char('-') if pressed => {
                        speed_idx = speed_idx.saturating_sub(1);
                        send(publisher, &speed_command(speed_idx)).await?;
                    }

                    // Legacy motion keys go out as-is
                    KeyCode::Char(c) if pressed => match key_to_direction(c) {
                        Some(direction) => {
                            send(publisher, &c.to_ascii_uppercase().to_string()).await?;
                            moving = direction.is_some();
                            last_movement_input = Instant::now();
                        }
                        None => warn!("Unmapped key {:?}", c),
                    },

                    _ => {}
                }
            }
        }

        // Stop once if the key was released
        if moving && last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            send(publisher, "STOP").await?;
            moving = false;
        }
    }

    send(publisher, "STOP").await?;
    Ok(())
}

fn speed_command(idx: usize) -> String {
    info!("Max speed: {}", SPEEDS[idx]);
    format!("SPEED:{},{}", SPEEDS[idx], DEFAULT_MIN_SPEED)
}
