use tach_core::{FanMonitor, PinId, ScriptedTach, SpeedBoard};
use tach_io::protocol::{respond, ErrorKind, ProtocolVersion, Request, Response};

fn board() -> (Vec<FanMonitor<ScriptedTach>>, SpeedBoard) {
    let mut fan1 = FanMonitor::new(
        "fan1",
        "GPIO_FAN_TACH_1",
        ScriptedTach::new(PinId(138), [true, false, true, true]),
        4,
    ).unwrap();
    for _ in 0..4 {
        fan1.tick();
    }
    let fan2 = FanMonitor::new(
        "fan2",
        "GPIO_FAN_TACH_2",
        ScriptedTach::new(PinId(139), Vec::new()),
        20,
    ).unwrap();
    let fans = vec![fan1, fan2];
    let board = SpeedBoard::from_monitors(&fans);
    (fans, board)
}

#[test]
fn parses_read_request() {
    let raw = r#"{"type":"read","protocol_version":{"major":1,"minor":0},"fan":"fan2"}"#;
    match Request::parse(raw).expect("read should parse") {
        Request::Read(msg) => {
            assert_eq!(msg.fan, "fan2");
            assert_eq!(msg.protocol_version, ProtocolVersion::v1());
        }
        _ => panic!("expected read request"),
    }
}

#[test]
fn parses_list_without_version() {
    let msg = Request::parse(r#"{"type":"list"}"#).expect("list should parse");
    assert!(matches!(msg, Request::List(_)));
    assert!(msg.protocol_version().is_supported());
}

#[test]
fn rejects_unknown_type_and_missing_fan() {
    assert!(Request::parse(r#"{"type":"write","fan":"fan1"}"#).is_none());
    assert!(Request::parse(r#"{"type":"read"}"#).is_none());
    assert!(Request::parse("not json").is_none());
}

#[test]
fn read_returns_latched_speed() {
    let (_fans, board) = board();
    let line = respond(&board, r#"{"type":"read","fan":"fan1"}"#).to_line();
    let value: serde_json::Value = serde_json::from_str(&line).unwrap();
    assert_eq!(value["type"], "speed");
    assert_eq!(value["fan"], "fan1");
    assert_eq!(value["transitions"], 3);
    assert_eq!(value["latches"], 1);
    assert_eq!(value["protocol_version"]["major"], 1);
}

#[test]
fn unknown_fan_is_reported_not_numeric() {
    let (_fans, board) = board();
    let response = respond(&board, r#"{"type":"read","fan":"fan3"}"#);
    assert_eq!(response.error_kind(), Some(ErrorKind::UnknownFan));
    let value: serde_json::Value = serde_json::from_str(&response.to_line()).unwrap();
    assert_eq!(value["type"], "error");
    assert_eq!(value["kind"], "unknown_fan");
    assert_eq!(value["fan"], "fan3");
    assert!(value.get("transitions").is_none());
}

#[test]
fn list_reports_fans_in_order() {
    let (_fans, board) = board();
    let response = respond(&board, r#"{"type":"list"}"#);
    assert!(matches!(response, Response::Fans(_)));
    let value: serde_json::Value = serde_json::from_str(&response.to_line()).unwrap();
    assert_eq!(value["fans"][0]["fan"], "fan1");
    assert_eq!(value["fans"][1]["label"], "GPIO_FAN_TACH_2");
    assert_eq!(value["fans"][1]["pin"], 139);
}

#[test]
fn bad_lines_and_versions_are_errors() {
    let (_fans, board) = board();
    assert_eq!(
        respond(&board, "{").error_kind(),
        Some(ErrorKind::BadRequest)
    );
    assert_eq!(
        respond(
            &board,
            r#"{"type":"read","fan":"fan1","protocol_version":{"major":2,"minor":0}}"#
        )
        .error_kind(),
        Some(ErrorKind::UnsupportedVersion)
    );
}
