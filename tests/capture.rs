mod common;

use common::{capture_frames, cpu_dispatcher, handshake, passwords, pcap, AP, STATION};
use pmkforge::attack::{AttackEngine, AttackOptions};
use pmkforge::capture::{self, CaptureParser, HandshakeState, LINKTYPE_IEEE802_11};
use pmkforge::error::CaptureError;
use pmkforge::{source, Handshake, StopToken};

#[test]
fn capture_yields_the_synthetic_handshake() {
    let bytes = pcap(&capture_frames("linksys", "dictionary", true));
    let parsed = capture::parse(&bytes).unwrap();

    assert!(parsed.is_completed((AP, STATION)));
    let hs = parsed.best_handshake(None).unwrap();
    assert_eq!(hs, handshake("linksys", "dictionary"));
    assert!(pmkforge::verify_password(b"dictionary", &hs));
    assert!(!pmkforge::verify_password(b"dictionarx", &hs));
}

#[test]
fn completion_is_stable_once_reached() {
    let frames = capture_frames("linksys", "dictionary", true);
    let mut parser = CaptureParser::new();
    let mut states = Vec::new();
    for frame in &frames {
        parser.feed(LINKTYPE_IEEE802_11, frame);
        states.push(parser.capture().state((AP, STATION)));
    }
    assert_eq!(
        states,
        vec![HandshakeState::NoData, HandshakeState::HalfHandshake, HandshakeState::Complete]
    );

    let before = parser.capture().handshake((AP, STATION)).unwrap();
    for frame in &frames {
        parser.feed(LINKTYPE_IEEE802_11, frame);
    }
    assert_eq!(parser.capture().handshake((AP, STATION)).unwrap(), before);
}

#[test]
fn unnamed_access_point_needs_an_essid() {
    let bytes = pcap(&capture_frames("linksys", "dictionary", false));
    let mut parsed = capture::parse(&bytes).unwrap();
    assert!(parsed.is_completed((AP, STATION)));
    assert!(matches!(
        parsed.handshake((AP, STATION)),
        Err(CaptureError::EssidUnknown(_))
    ));

    parsed.assume_essid(&"linksys".parse().unwrap());
    assert_eq!(parsed.best_handshake(Some(AP)).unwrap(), handshake("linksys", "dictionary"));
}

#[test]
fn stripped_capture_still_cracks() {
    let mut frames = capture_frames("linksys", "dictionary", true);
    // noise the strip pass has to drop
    frames.insert(1, vec![0x40, 0, 0, 0]);
    frames.push(frames[1].clone());
    let bytes = pcap(&frames);

    let stripped = capture::strip_capture(&bytes).unwrap();
    assert!(stripped.len() < bytes.len());
    let hs = capture::parse(&stripped).unwrap().best_handshake(None).unwrap();

    let dispatcher = cpu_dispatcher();
    let engine = AttackEngine::new(&dispatcher, AttackOptions::default());
    let outcome = engine
        .passthrough(&hs, source::memory(passwords(40, &["dictionary"])), &StopToken::new())
        .unwrap();
    assert_eq!(outcome.password.unwrap().as_bytes(), b"dictionary");
}

#[test]
fn analysis_reports_pairs() {
    let bytes = pcap(&capture_frames("linksys", "dictionary", true));
    let analysis = capture::analyze(&bytes).unwrap();
    assert_eq!(analysis.completed(), 1);
    assert_eq!(analysis.stations[0].ap, AP);
    assert_eq!(analysis.stations[0].essid.as_ref().unwrap().as_bytes(), b"linksys");
    assert_eq!(analysis.stats.anomalies(), 0);
}

#[test]
fn handshake_json_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("handshake.json");
    let hs = handshake("linksys", "dictionary");
    hs.save_to_file(&path).unwrap();
    assert_eq!(Handshake::load_from_file(&path).unwrap(), hs);
}

#[test]
fn garbage_is_not_a_capture() {
    assert!(capture::parse(b"this is not a capture").is_err());
}
