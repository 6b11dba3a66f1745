mod common;

use ble_gatt_binding::domain::locator::parse_uuid;
use ble_gatt_binding::infrastructure::bluetooth::radio::{ManufacturerData, WriteMode};
use ble_gatt_binding::{BindingError, BluetoothService, ResourceCatalog, Value};
use common::{address, config, init_tracing, StubRadio};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use uuid::Uuid;

const LAMP: &str = "BE:58:30:00:CC:11";
const TAG: &str = "FC:12:25:CC:CB:9A";

fn uuid(id: &str) -> Uuid {
    parse_uuid(id).unwrap()
}

fn lamp_description() -> serde_json::Value {
    json!({
        "title": "Lamp",
        "properties": {
            "level": {
                "type": "integer",
                "bdo:bytelength": 2,
                "forms": [{"href": "gatt://BE-58-30-00-CC-11/fff0/fff1"}]
            },
            "color": {
                "type": "object",
                "writeOnly": true,
                "bdo:pattern": "7e000503{R}{G}{B}00ef",
                "bdo:variables": {
                    "R": {"type": "integer", "bdo:bytelength": 1},
                    "G": {"type": "integer", "bdo:bytelength": 1},
                    "B": {"type": "integer", "bdo:bytelength": 1}
                },
                "forms": [{
                    "href": "gatt://BE-58-30-00-CC-11/fff0/fff3",
                    "op": "writeproperty",
                    "sbo:methodName": "sbo:write"
                }]
            },
            "vendor": {
                "type": "string",
                "readOnly": true,
                "forms": [{"href": "gatt://BE-58-30-00-CC-11/abcd/2a29"}]
            },
            "model": {
                "type": "string",
                "readOnly": true,
                "forms": [{"href": "gatt://BE-58-30-00-CC-11/fff0/ffff"}]
            },
            "temperature": {
                "type": "number",
                "readOnly": true,
                "bdo:bytelength": 2,
                "bdo:byteOrder": "big",
                "bdo:signed": true,
                "bdo:scale": 0.005,
                "forms": [{"href": "gap://FC-12-25-CC-CB-9A/manufacturerData/0x0499"}]
            },
            "advertisement": {
                "readOnly": true,
                "forms": [{
                    "href": "gap://FC-12-25-CC-CB-9A/manufacturerData",
                    "contentType": "application/json"
                }]
            },
            "missingVendor": {
                "type": "integer",
                "readOnly": true,
                "forms": [{"href": "gap://FC-12-25-CC-CB-9A/manufacturerData/89"}]
            }
        },
        "actions": {
            "reset": {
                "forms": [{"href": "gatt://BE-58-30-00-CC-11/fff0/fff4"}]
            },
            "setLevel": {
                "input": {"type": "integer", "bdo:bytelength": 1},
                "forms": [{
                    "href": "gatt://BE-58-30-00-CC-11/fff0/fff4",
                    "sbo:methodName": "sbo:write"
                }]
            }
        },
        "events": {
            "levelChanged": {
                "data": {"type": "integer", "bdo:bytelength": 2},
                "forms": [{"href": "gatt://BE-58-30-00-CC-11/fff0/fff1"}]
            },
            "polled": {
                "data": {"type": "integer", "bdo:bytelength": 2},
                "forms": [{
                    "href": "gatt://BE-58-30-00-CC-11/fff0/fff1",
                    "sbo:methodName": "sbo:read"
                }]
            }
        }
    })
}

struct Fixture {
    radio: Arc<StubRadio>,
    service: BluetoothService,
    catalog: ResourceCatalog,
}

fn fixture() -> Fixture {
    init_tracing();
    let radio = StubRadio::new();
    radio.make_visible(address(LAMP));
    let service = BluetoothService::with_config(radio.clone(), config(1_000));
    let catalog = ResourceCatalog::from_thing_description(&lamp_description()).unwrap();
    Fixture {
        radio,
        service,
        catalog,
    }
}

#[tokio::test(start_paused = true)]
async fn test_read_property() {
    let f = fixture();
    let level = f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    level.set_value(&[0x2c, 0x01]);

    let value = f.service.read(f.catalog.property("level").unwrap()).await.unwrap();
    assert_eq!(value, Value::Integer(300));

    let lamp = address(LAMP);
    assert!(f.service.connections().is_connected(lamp));
    assert_eq!(f.service.connections().hold_count(lamp), 0);

    sleep(Duration::from_millis(1_100)).await;
    assert!(!f.service.connections().is_connected(lamp));
}

#[tokio::test(start_paused = true)]
async fn test_write_property() {
    let f = fixture();
    let level = f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    let color = f.radio.add_characteristic(uuid("fff0"), uuid("fff3"));

    let rgb: Value = [
        ("R", Value::Integer(255)),
        ("G", Value::Integer(0)),
        ("B", Value::Integer(0)),
    ]
    .into_iter()
    .collect();
    f.service
        .write(f.catalog.property("color").unwrap(), &rgb)
        .await
        .unwrap();
    f.service
        .write(f.catalog.property("level").unwrap(), &Value::Integer(42))
        .await
        .unwrap();

    let writes = color.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(hex::encode(&writes[0].0), "7e000503ff000000ef");
    assert_eq!(writes[0].1, WriteMode::WithResponse);
    assert_eq!(level.writes(), vec![(vec![0x2a, 0x00], WriteMode::WithResponse)]);
    assert_eq!(f.radio.connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_invoke_action() {
    let f = fixture();
    let control = f.radio.add_characteristic(uuid("fff0"), uuid("fff4"));

    let result = f
        .service
        .invoke(f.catalog.action("reset").unwrap(), None)
        .await
        .unwrap();
    assert_eq!(result, Value::Null);

    f.service
        .invoke(f.catalog.action("setLevel").unwrap(), Some(&Value::Integer(7)))
        .await
        .unwrap();

    assert_eq!(
        control.writes(),
        vec![
            (vec![0x00], WriteMode::WithoutResponse),
            (vec![0x07], WriteMode::WithResponse),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_holds_connection() {
    let f = fixture();
    let level = f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    let lamp = address(LAMP);

    let mut subscription = f
        .service
        .subscribe(f.catalog.event("levelChanged").unwrap())
        .await
        .unwrap();
    assert_eq!(subscription.device(), Some(lamp));
    assert_eq!(f.service.connections().hold_count(lamp), 1);

    assert!(level.notify(&[0x2c, 0x01]));
    assert!(level.notify(&[0x01]));
    assert_eq!(subscription.next().await.unwrap().unwrap(), Value::Integer(300));
    assert!(matches!(
        subscription.next().await.unwrap(),
        Err(BindingError::Codec(_))
    ));

    sleep(Duration::from_secs(10)).await;
    assert!(f.service.connections().is_connected(lamp));

    subscription.unsubscribe().await.unwrap();
    assert!(!level.is_notifying());
    assert_eq!(f.service.connections().hold_count(lamp), 0);

    sleep(Duration::from_millis(1_100)).await;
    assert!(!f.service.connections().is_connected(lamp));
}

#[tokio::test(start_paused = true)]
async fn test_dropped_subscription_releases_hold() {
    let f = fixture();
    let level = f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    let lamp = address(LAMP);

    let subscription = f
        .service
        .subscribe(f.catalog.event("levelChanged").unwrap())
        .await
        .unwrap();
    drop(subscription);
    sleep(Duration::from_millis(1)).await;

    assert_eq!(level.stop_calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(f.service.connections().hold_count(lamp), 0);
}

#[tokio::test(start_paused = true)]
async fn test_operation_mismatch() {
    let f = fixture();
    f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));

    let err = f
        .service
        .subscribe(f.catalog.event("polled").unwrap())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, BindingError::Operation(_)));
    assert!(err.is_configuration());

    let err = f
        .service
        .write(f.catalog.property("vendor").unwrap(), &Value::from("acme"))
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::Operation(_)));

    // Rejected before any radio traffic.
    assert_eq!(f.radio.connects(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_service_and_characteristic() {
    let f = fixture();
    f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    let lamp = address(LAMP);

    let err = f
        .service
        .read(f.catalog.property("vendor").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::ServiceNotFound { device, .. } if device == lamp));

    let err = f
        .service
        .read(f.catalog.property("model").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BindingError::CharacteristicNotFound { characteristic, .. } if characteristic == uuid("ffff")
    ));
    assert_eq!(f.service.connections().hold_count(lamp), 0);
}

#[tokio::test(start_paused = true)]
async fn test_read_advertisement() {
    let f = fixture();
    let tag = address(TAG);
    f.radio.advertise(
        tag,
        vec![
            ManufacturerData {
                company_id: 0x004C,
                data: vec![0x02, 0x15],
            },
            ManufacturerData {
                company_id: 0x0499,
                data: vec![0x12, 0xFC],
            },
        ],
    );

    let Value::Number(temperature) = f
        .service
        .read(f.catalog.property("temperature").unwrap())
        .await
        .unwrap()
    else {
        panic!("expected a number");
    };
    assert!((temperature - 24.3).abs() < 1e-9);

    let raw = f
        .service
        .read(f.catalog.property("advertisement").unwrap())
        .await
        .unwrap();
    let expected: Value = [
        ("companyId", Value::Integer(0x004C)),
        ("data", Value::from("0215")),
    ]
    .into_iter()
    .collect();
    assert_eq!(raw, expected);

    let err = f
        .service
        .read(f.catalog.property("missingVendor").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::Advertisement { device, .. } if device == tag));

    // Advertisements never connect.
    assert_eq!(f.radio.connects(), 0);
    assert!(f.service.connections().connected_devices().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_read_advertisement_without_data() {
    let f = fixture();
    let err = f
        .service
        .read(f.catalog.property("advertisement").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, BindingError::Advertisement { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_connect_and_close() {
    let f = fixture();
    let lamp = address(LAMP);

    f.service.connect(&f.catalog).await.unwrap();
    assert_eq!(f.service.connections().connected_devices(), vec![lamp]);
    assert_eq!(f.radio.connects(), 1);

    f.service.close().await.unwrap();
    assert!(f.service.connections().connected_devices().is_empty());
    assert_eq!(f.radio.disconnects(), 1);
    assert!(!f.radio.is_discovering_now());
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_keeps_live_subscription_held() {
    let f = fixture();
    f.radio.add_characteristic(uuid("fff0"), uuid("fff1"));
    let lamp = address(LAMP);
    let event = f.catalog.event("levelChanged").unwrap();

    let stale = f.service.subscribe(event).await.unwrap();
    f.service.disconnect(&f.catalog).await.unwrap();
    assert!(!f.service.connections().is_connected(lamp));

    let live = f.service.subscribe(event).await.unwrap();
    assert_eq!(f.service.connections().hold_count(lamp), 2);

    stale.unsubscribe().await.unwrap();
    assert_eq!(f.service.connections().hold_count(lamp), 1);

    sleep(Duration::from_millis(1_100)).await;
    assert!(f.service.connections().is_connected(lamp));
    assert_eq!(f.radio.connects(), 2);

    live.unsubscribe().await.unwrap();
    sleep(Duration::from_millis(1_100)).await;
    assert!(!f.service.connections().is_connected(lamp));
}
