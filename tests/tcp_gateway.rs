//! End-to-end tests against an in-process Modbus TCP gateway.
//!
//! The gateway mimics a bridge that only implements FC03/FC06: FC04 is
//! answered with "illegal function" and input registers are served through
//! FC03 at the same addresses.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use systemair_modbus::{
    DeviceModel, GatewayProfile, InputAccess, RegisterClass, RegisterClient, RegisterDefinition,
    Value, VentilationUnit,
};

type Registers = Arc<Mutex<HashMap<u16, u16>>>;

async fn serve_connection(mut socket: TcpStream, registers: Registers) {
    loop {
        let mut header = [0u8; 7];
        if socket.read_exact(&mut header).await.is_err() {
            return;
        }
        let length = usize::from(u16::from_be_bytes([header[4], header[5]]));
        let mut pdu = vec![0u8; length - 1];
        if socket.read_exact(&mut pdu).await.is_err() {
            return;
        }

        let function = pdu[0];
        let address = u16::from_be_bytes([pdu[1], pdu[2]]);
        let operand = u16::from_be_bytes([pdu[3], pdu[4]]);

        let reply = match function {
            0x03 => {
                let regs = registers.lock().unwrap();
                let mut body = vec![0x03, (operand * 2) as u8];
                for offset in 0..operand {
                    let word = regs.get(&(address + offset)).copied().unwrap_or(0);
                    body.extend_from_slice(&word.to_be_bytes());
                }
                body
            }
            0x06 => {
                registers.lock().unwrap().insert(address, operand);
                pdu.clone()
            }
            other => vec![other | 0x80, 0x01],
        };

        let mut frame = Vec::with_capacity(7 + reply.len());
        frame.extend_from_slice(&header[..4]);
        frame.extend_from_slice(&((reply.len() + 1) as u16).to_be_bytes());
        frame.push(header[6]);
        frame.extend_from_slice(&reply);
        if socket.write_all(&frame).await.is_err() {
            return;
        }
    }
}

async fn start_gateway(initial: &[(u16, u16)]) -> (u16, Registers) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let registers: Registers = Arc::new(Mutex::new(initial.iter().copied().collect()));

    let shared = Arc::clone(&registers);
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_connection(socket, Arc::clone(&shared)));
        }
    });

    (port, registers)
}

#[tokio::test]
async fn test_input_fallback_over_tcp() {
    let (port, _) = start_gateway(&[(12101, 0xFFCE), (12102, 215), (12543, 210)]).await;
    let client = RegisterClient::tcp("127.0.0.1", port, 1, GatewayProfile::generic());

    let defs = [
        RegisterDefinition::input("outdoor_temperature", 12101).temperature(),
        RegisterDefinition::input("supply_temperature", 12102).temperature(),
        RegisterDefinition::input("extract_temperature", 12543).temperature(),
    ];

    let values = client.read_register_map(&defs).await.unwrap();
    assert_eq!(values["outdoor_temperature"], Value::Float(-5.0));
    assert_eq!(values["supply_temperature"], Value::Float(21.5));
    assert_eq!(values["extract_temperature"], Value::Float(21.0));
    assert_eq!(client.input_access().await, InputAccess::HoldingAlias);

    let stats = client.stats().await;
    assert_eq!(stats.connects, 1);
    // One refused FC04, then FC03 for both spans
    assert_eq!(stats.responses_received, 3);

    client.close().await;
    assert_eq!(client.input_access().await, InputAccess::Native);
}

#[tokio::test]
async fn test_write_round_trip_over_tcp() {
    let (port, registers) = start_gateway(&[]).await;
    let client = RegisterClient::tcp("127.0.0.1", port, 1, GatewayProfile::generic());

    client.write_temperature(2000, 21.5).await.unwrap();
    assert_eq!(registers.lock().unwrap().get(&2000), Some(&215));

    let words = client
        .read_registers(RegisterClass::Holding, 2000, 1)
        .await
        .unwrap();
    assert_eq!(words, vec![215]);
    client.close().await;
}

#[tokio::test]
async fn test_legacy_unit_poll_over_tcp() {
    let (port, _) = start_gateway(&[(100, 3), (600, 1), (601, 20)]).await;
    let unit = VentilationUnit::connect_tcp(
        "127.0.0.1",
        port,
        1,
        GatewayProfile::generic(),
        DeviceModel::LegacyCd4,
        None,
    );

    unit.probe().await.unwrap();
    let values = unit.poll().await.unwrap();
    assert_eq!(values["fan_speed_level"], Value::Int(3));
    assert_eq!(values["mode_status_text"], Value::from("manual_high"));
    assert_eq!(values["next_filter_change"], Value::from("10 days"));
    unit.close().await;
}

#[tokio::test]
async fn test_probe_fails_without_gateway() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let unit = VentilationUnit::connect_tcp(
        "127.0.0.1",
        port,
        1,
        GatewayProfile::generic(),
        DeviceModel::Save,
        None,
    );
    let err = unit.probe().await.unwrap_err();
    assert!(err.to_string().contains("cannot connect"));
}
