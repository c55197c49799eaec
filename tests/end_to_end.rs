//! Config-to-wire scenarios through the public API

use surfacelink::chain::ExtendedSurface;
use surfacelink::config::AppConfig;
use surfacelink::surface::{InputAddress, InputEvent, ManualScheduler, OutputAddress, Surface};
use surfacelink::transport::MemorySink;

const STUDIO: &str = r#"
surfaces:
  - name: main
    protocol: mcu
    input_port: "X-Touch"
    output_port: "X-Touch"
  - name: ext
    protocol: mcu
    input_port: "X-Touch-Ext"
    output_port: "X-Touch-Ext"
    index_offset: 128
    extender: true
  - name: hui
    protocol: hui
    input_port: "HUI"
    output_port: "HUI"
    index_offset: 256
timing:
  keepalive_ms: 0
"#;

fn build(config: &AppConfig) -> (ExtendedSurface, Vec<MemorySink>) {
    let options = config.timing.surface_options();
    let mut chain = ExtendedSurface::new();
    let mut sinks = Vec::new();
    for unit in &config.surfaces {
        let sink = MemorySink::new();
        let surface = Surface::from_family(
            unit.name.clone(),
            unit.protocol,
            &unit.protocol_options(),
            Box::new(sink.clone()),
            Box::new(ManualScheduler::new()),
            options.clone(),
        );
        chain.push(unit.index_offset, surface).unwrap();
        sinks.push(sink);
    }
    (chain, sinks)
}

#[test]
fn test_attach_sends_mackie_handshakes() {
    let config = AppConfig::parse(STUDIO).unwrap();
    let (mut chain, sinks) = build(&config);
    chain.attach_all();

    let main = sinks[0].take();
    assert_eq!(main[0], vec![0xF0, 0x00, 0x00, 0x66, 0x14, 0x00, 0xF7]);
    let ext = sinks[1].take();
    assert_eq!(ext[0], vec![0xF0, 0x00, 0x00, 0x66, 0x15, 0x00, 0xF7]);
}

#[test]
fn test_global_indices_reach_the_right_unit() {
    let config = AppConfig::parse(STUDIO).unwrap();
    let (mut chain, sinks) = build(&config);
    chain.attach_all();
    sinks.iter().for_each(|s| s.clear());

    chain.set_output(OutputAddress::fader(129), 8192, None, false).unwrap();
    chain.set_output(OutputAddress::button(256 + 9), 1, None, false).unwrap();

    assert!(sinks[0].is_empty());
    assert_eq!(sinks[1].take(), vec![vec![0xE1, 0x00, 0x40]]);
    assert_eq!(sinks[2].take(), vec![vec![0xB0, 0x0C, 0x01], vec![0xB0, 0x2C, 0x41]]);

    // Same requests again are absorbed by each unit's cache
    chain.set_output(OutputAddress::fader(129), 8192, None, false).unwrap();
    chain.set_output(OutputAddress::button(256 + 9), 1, None, false).unwrap();
    assert!(sinks.iter().all(|s| s.is_empty()));
}

#[test]
fn test_inputs_come_back_in_global_indices() {
    let config = AppConfig::parse(STUDIO).unwrap();
    let (mut chain, _sinks) = build(&config);
    chain.attach_all();

    let events = chain.receive(2, &[0xB0, 0x0F, 0x01, 0xB0, 0x2F, 0x41]);
    assert_eq!(events, vec![InputEvent::ButtonDown(InputAddress::button(256 + 9))]);

    let events = chain.receive(1, &[0x90, 0x20, 0x7F]);
    assert_eq!(events, vec![InputEvent::ButtonDown(InputAddress::button(128 + 0x20))]);
}

#[test]
fn test_each_unit_reports_distinct_addresses() {
    let config = AppConfig::parse(STUDIO).unwrap();
    let (mut chain, _sinks) = build(&config);
    chain.attach_all();

    // Main's last button note and the extender's first are neighbours
    let main = chain.receive(0, &[0x90, 0x7F, 0x7F]);
    let ext = chain.receive(1, &[0x90, 0x00, 0x7F]);
    assert_eq!(main, vec![InputEvent::ButtonDown(InputAddress::button(127))]);
    assert_eq!(ext, vec![InputEvent::ButtonDown(InputAddress::button(128))]);
}

#[test]
fn test_overlapping_offsets_are_rejected() {
    let crowded = STUDIO.replace("index_offset: 128", "index_offset: 8");
    assert!(AppConfig::parse(&crowded).is_err());
}

#[test]
fn test_writes_before_attach_are_flushed_on_attach() {
    let config = AppConfig::parse(STUDIO).unwrap();
    let (mut chain, sinks) = build(&config);

    chain.set_output(OutputAddress::knob_ring(2), 11, None, false).unwrap();
    assert!(sinks[0].is_empty());

    chain.attach_all();
    assert!(sinks[0].take().contains(&vec![0xB0, 0x32, 0x0B]));
}

#[test]
fn test_pad_display_line() {
    let yaml = r#"
surfaces:
  - name: grid
    protocol: pad
    input_port: "Push"
    output_port: "Push"
"#;
    let config = AppConfig::parse(yaml).unwrap();
    let (mut chain, sinks) = build(&config);
    chain.attach_all();
    sinks[0].clear();

    chain.set_text(68, 8, "Hello").unwrap();
    let sent = sinks[0].take();
    assert_eq!(sent.len(), 1);
    let line = &sent[0];
    assert_eq!(&line[..8], &[0xF0, 0x47, 0x7F, 0x15, 0x19, 0x00, 0x45, 0x00]);
    assert_eq!(&line[8..13], b"Hello");
    assert_eq!(line[13], b' ');
    assert_eq!(line.len(), 8 + 68 + 1);
}
