//! End-to-end transport tests against an in-process SPJS stand-in:
//! discovery, auto-open, command correlation, resets, and driver routing.

mod support;

use async_trait::async_trait;
use cncpilot_communication::firmware::grbl::GrblDriver;
use cncpilot_communication::firmware::pendant::PendantDriver;
use cncpilot_communication::{vid_pid_matcher, Client, Controller, Driver};
use cncpilot_core::{Error, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use support::{port_list, MockSpjs};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

const GRBL_PORT: &str = "/dev/ttyUSB0";
const PENDANT_PORT: &str = "/dev/ttyUSB1";

fn grbl_rig(server: &MockSpjs) -> (Client, Arc<Controller>) {
    let client = Client::new(server.url());
    let grbl = Arc::new(GrblDriver::new());
    let binding = client.register_driver(vid_pid_matcher("2a03", "0043"), grbl);
    let controller = Arc::new(Controller::new(binding));
    (client, controller)
}

/// Block until the client has digested a port list that opens the port.
async fn wait_connected(controller: &Controller) {
    timeout(support::RECV_TIMEOUT, async {
        while !controller.connected() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("controller never connected");
}

#[tokio::test]
async fn jog_command_emits_sendjson_and_resolves_on_write_then_complete() {
    let server = MockSpjs::bind().await;
    let (client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;

    // an immediate `list` follows every dial
    assert_eq!(conn.recv().await, "list");

    // discovery: an unopened matching port is opened with the driver's
    // parameters
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", false)]))
        .await;
    assert_eq!(
        conn.recv_command().await,
        format!("open {GRBL_PORT} 115200 grbl")
    );
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let jogger = controller.clone();
    let jog = tokio::spawn(async move {
        jogger
            .command_jog('X', 1.5, true, CancellationToken::new())
            .await
    });

    let frame = conn.recv_sendjson().await;
    assert_eq!(frame["P"], GRBL_PORT);
    let data = frame["Data"].as_array().unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data[0]["D"], "$J=G21G91F10000X1.5\n");
    let id = data[0]["Id"].as_str().unwrap().to_string();
    assert!(id.starts_with(client.base_id()));
    assert!(id.ends_with("-1"));

    conn.send_json(json!({"Cmd": "Write", "Id": id, "P": GRBL_PORT}))
        .await;
    conn.send_json(json!({"Cmd": "Complete", "Id": id, "P": GRBL_PORT}))
        .await;
    jog.await.unwrap().unwrap();
}

#[tokio::test]
async fn device_error_surfaces_its_code() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let homer = controller.clone();
    let home = tokio::spawn(async move {
        homer.command_home(true, CancellationToken::new()).await
    });

    let frame = conn.recv_sendjson().await;
    assert_eq!(frame["Data"][0]["D"], "$H\n");
    let id = frame["Data"][0]["Id"].as_str().unwrap().to_string();

    conn.send_json(json!({"Cmd": "Error", "Id": id, "P": GRBL_PORT, "ErrorCode": "2"}))
        .await;
    assert_eq!(home.await.unwrap(), Err(Error::Device("2".into())));
}

#[tokio::test]
async fn wiped_queue_resolves_commands_scoped_to_the_port() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let jogger = controller.clone();
    let jog = tokio::spawn(async move {
        jogger
            .command_jog('Y', 10.0, true, CancellationToken::new())
            .await
    });
    let _ = conn.recv_sendjson().await;

    conn.send_json(json!({"Cmd": "WipedQueue", "Port": GRBL_PORT}))
        .await;
    assert_eq!(jog.await.unwrap(), Err(Error::PortReset));
}

#[tokio::test]
async fn foreign_ids_are_ignored() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let jogger = controller.clone();
    let mut jog = tokio::spawn(async move {
        jogger
            .command_jog('X', 1.0, true, CancellationToken::new())
            .await
    });

    let frame = conn.recv_sendjson().await;
    let id = frame["Data"][0]["Id"].as_str().unwrap().to_string();

    // same sequence number, some other process's base ID
    conn.send_json(json!({"Cmd": "Complete", "Id": "AAAAAAAAAAA=-1", "P": GRBL_PORT}))
        .await;
    assert!(
        timeout(Duration::from_millis(200), &mut jog).await.is_err(),
        "foreign ID must not resolve the command"
    );

    conn.send_json(json!({"Cmd": "Complete", "Id": id, "P": GRBL_PORT}))
        .await;
    jog.await.unwrap().unwrap();
}

#[tokio::test]
async fn dropped_socket_resolves_in_flight_commands_and_redials() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let homer = controller.clone();
    let home = tokio::spawn(async move {
        homer.command_home(true, CancellationToken::new()).await
    });
    let jogger = controller.clone();
    let jog = tokio::spawn(async move {
        jogger
            .command_jog('X', 1.0, true, CancellationToken::new())
            .await
    });
    let _ = conn.recv_sendjson().await;
    let _ = conn.recv_sendjson().await;

    // kill the socket under the client
    drop(conn);
    assert_eq!(home.await.unwrap(), Err(Error::NetworkReset));
    assert_eq!(jog.await.unwrap(), Err(Error::NetworkReset));

    // the health check re-dials within a second and lists immediately
    let mut conn = server.accept().await;
    assert_eq!(conn.recv().await, "list");

    // the old snapshot is gone until the new list answer arrives
    assert!(!controller.connected());
}

#[tokio::test]
async fn open_ack_refreshes_the_port_list() {
    let server = MockSpjs::bind().await;
    let (_client, _controller) = grbl_rig(&server);
    let mut conn = server.accept().await;

    assert_eq!(conn.recv().await, "list");
    // let the startup refreshes settle so the next `list` is ours
    conn.drain(Duration::from_millis(400)).await;

    conn.send_json(json!({"Cmd": "Open", "P": GRBL_PORT, "Id": ""}))
        .await;
    assert_eq!(conn.recv().await, "list");
}

#[tokio::test]
async fn pendant_frames_drive_the_grbl_port() {
    let server = MockSpjs::bind().await;
    let (client, controller) = grbl_rig(&server);
    let pendant = Arc::new(PendantDriver::new(controller.clone()));
    client.register_driver(vid_pid_matcher("1a86", "7523"), pendant);

    let mut conn = server.accept().await;
    conn.send_json(port_list(&[
        (GRBL_PORT, "2a03", "0043", true),
        (PENDANT_PORT, "1a86", "7523", true),
    ]))
    .await;

    // raw data for a port nobody matches is dropped on the floor
    conn.send_json(json!({"P": "/dev/ttyACM9", "D": "STOP\n"}))
        .await;

    // STOP relays as an e-stop on the GRBL port
    conn.send_json(json!({"P": PENDANT_PORT, "D": "STOP\n"}))
        .await;
    let frame = conn.recv_sendjson().await;
    assert_eq!(frame["P"], GRBL_PORT);
    assert_eq!(frame["Data"][0]["D"], "\u{18}");

    // STEP:3,10,2 jogs Z by -0.2 mm (inverted Z, step*mult/100)
    conn.send_json(json!({"P": PENDANT_PORT, "D": "STEP:3,10,2\n"}))
        .await;
    let frame = conn.recv_sendjson().await;
    assert_eq!(frame["P"], GRBL_PORT);
    assert_eq!(frame["Data"][0]["D"], "$J=G21G91F10000Z-0.2\n");
}

#[tokio::test]
async fn commands_without_a_matched_port_fail_fast() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);

    // no port list yet, so the matcher has nothing to claim
    let result = controller
        .command_jog('X', 1.0, false, CancellationToken::new())
        .await;
    assert_eq!(result, Err(Error::PortNotAvailable));
}

#[tokio::test]
async fn cancellation_resolves_the_caller_early() {
    let server = MockSpjs::bind().await;
    let (_client, controller) = grbl_rig(&server);
    let mut conn = server.accept().await;
    conn.send_json(port_list(&[(GRBL_PORT, "2a03", "0043", true)]))
        .await;
    wait_connected(&controller).await;

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let jogger = controller.clone();
    let jog = tokio::spawn(async move {
        jogger.command_jog('X', 1.0, true, token).await
    });
    let _ = conn.recv_sendjson().await;

    cancel.cancel();
    // the caller returns without the device ever acknowledging
    jog.await.unwrap().unwrap();
}

struct NullDriver;

#[async_trait]
impl Driver for NullDriver {
    fn name(&self) -> &str {
        "null"
    }

    fn buffer_algorithm(&self) -> &str {
        "default"
    }

    fn baud_rate(&self) -> u32 {
        9600
    }

    async fn handle_data(&self, _data: &str) -> Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn missing_capabilities_report_unsupported() {
    let server = MockSpjs::bind().await;
    let client = Client::new(server.url());
    let binding = client.register_driver(vid_pid_matcher("dead", "beef"), Arc::new(NullDriver));
    let controller = Controller::new(binding);

    let result = controller
        .command_jog('X', 1.0, false, CancellationToken::new())
        .await;
    assert_eq!(result, Err(Error::UnsupportedByDriver));

    let result = controller.set_job("job.nc", &b"G0 X0\n"[..]).await;
    assert_eq!(result, Err(Error::UnsupportedByDriver));

    assert!(controller.status().is_none());
    assert!(controller.last_status().is_none());
}
