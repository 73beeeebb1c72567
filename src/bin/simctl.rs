//! Route simulator control CLI
//!
//! Drives a running route-simulator over MQTT for local development.
//!
//! Usage:
//!   cargo run --bin route-simctl -- create --id r1 --distance 100 --point 1,2 --point 3,4
//!   cargo run --bin route-simctl -- start --route-id r1
//!   cargo run --bin route-simctl -- watch

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use route_simulator::domain::events::{DELIVERY_STARTED, ROUTE_CREATED};
use route_simulator::domain::route::Position;
use rumqttc::{AsyncClient, Event as MqttEvent, MqttOptions, Packet, QoS};
use serde_json::json;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "route-simctl")]
#[command(about = "Publish route events and watch simulator output")]
struct Args {
    /// MQTT broker host
    #[arg(long, default_value = "localhost", global = true)]
    mqtt_host: String,

    /// MQTT broker port
    #[arg(long, default_value_t = 1883, global = true)]
    mqtt_port: u16,

    /// Inbound route topic of the simulator
    #[arg(long, default_value = "route", global = true)]
    route_topic: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Publish a RouteCreated event
    Create {
        #[arg(long)]
        id: String,
        #[arg(long)]
        distance: i64,
        /// Waypoint as `lat,lng`, repeatable
        #[arg(long = "point", value_parser = parse_position)]
        points: Vec<Position>,
    },
    /// Publish a DeliveryStarted event
    Start {
        #[arg(long)]
        route_id: String,
    },
    /// Print FreightCalculated and DriverMoved events as they arrive
    Watch {
        #[arg(long, default_value = "freight")]
        freight_topic: String,
        #[arg(long, default_value = "simulator")]
        simulation_topic: String,
    },
}

fn parse_position(s: &str) -> Result<Position, String> {
    let (lat, lng) = s.split_once(',').ok_or_else(|| format!("expected lat,lng, got {s:?}"))?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("bad latitude {lat:?}: {e}"))?;
    let lng: f64 = lng.trim().parse().map_err(|e| format!("bad longitude {lng:?}: {e}"))?;
    Ok(Position::new(lat, lng))
}

fn connect(args: &Args, role: &str) -> (AsyncClient, rumqttc::EventLoop) {
    let client_id = format!("route-simctl-{}-{}", role, std::process::id());
    let mut mqtt_options = MqttOptions::new(client_id, &args.mqtt_host, args.mqtt_port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    AsyncClient::new(mqtt_options, 100)
}

/// Publish one payload and wait for the broker's acknowledgement
async fn publish_once(args: &Args, payload: serde_json::Value) -> anyhow::Result<()> {
    let (client, mut eventloop) = connect(args, "pub");
    let body = serde_json::to_vec(&payload)?;
    client.publish(args.route_topic.as_str(), QoS::AtLeastOnce, false, body).await?;

    let acked = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match eventloop.poll().await {
                Ok(MqttEvent::Incoming(Packet::PubAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(e),
            }
        }
    })
    .await
    .context("timed out waiting for broker acknowledgement")?;
    acked.with_context(|| format!("publish to {}:{} failed", args.mqtt_host, args.mqtt_port))?;

    let _ = client.try_disconnect();
    println!("published to {}: {}", args.route_topic, payload);
    Ok(())
}

async fn watch(args: &Args, freight_topic: &str, simulation_topic: &str) -> anyhow::Result<()> {
    let (client, mut eventloop) = connect(args, "watch");
    let filters = [format!("{freight_topic}/#"), format!("{simulation_topic}/#")];

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = client.try_disconnect();
                return Ok(());
            }
            result = eventloop.poll() => match result {
                Ok(MqttEvent::Incoming(Packet::ConnAck(_))) => {
                    for filter in &filters {
                        client.try_subscribe(filter.as_str(), QoS::AtLeastOnce)?;
                    }
                    eprintln!("watching {freight_topic} and {simulation_topic}");
                }
                Ok(MqttEvent::Incoming(Packet::Publish(publish))) => {
                    println!("{} {}", publish.topic, String::from_utf8_lossy(&publish.payload));
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("mqtt error: {e}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match &args.command {
        Command::Create { id, distance, points } => {
            if let Some(bad) = points.iter().find(|p| !p.is_valid()) {
                bail!("waypoint {bad} is outside WGS84 range");
            }
            let payload = json!({
                "event": ROUTE_CREATED,
                "id": id,
                "distance": distance,
                "directions": points,
            });
            publish_once(&args, payload).await
        }
        Command::Start { route_id } => {
            let payload = json!({ "event": DELIVERY_STARTED, "route_id": route_id });
            publish_once(&args, payload).await
        }
        Command::Watch { freight_topic, simulation_topic } => {
            watch(&args, freight_topic, simulation_topic).await
        }
    }
}
