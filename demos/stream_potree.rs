//! Streams a tiny synthetic in-memory Potree dataset end to end and
//! prints what each pass loaded. Runs on any target, no files needed:
//! `cargo run --example stream_potree`

use backscatter::prelude::*;
use backscatter::resource::memory::MemoryClient;
use byteorder::{ByteOrder, LittleEndian};
use bytes::Bytes;
use std::collections::HashMap;

const STRIDE: usize = 23;

fn record(lon: f64, lat: f64, alt: f64, intensity: u16, class: u8, gps: f64) -> [u8; STRIDE] {
    let mut rec = [0u8; STRIDE];
    LittleEndian::write_i32(&mut rec[0..4], (lon / 0.001).round() as i32);
    LittleEndian::write_i32(&mut rec[4..8], (lat / 0.001).round() as i32);
    LittleEndian::write_i32(&mut rec[8..12], (alt / 0.001).round() as i32);
    LittleEndian::write_u16(&mut rec[12..14], intensity);
    rec[14] = class;
    LittleEndian::write_f64(&mut rec[15..23], gps);
    rec
}

fn dataset() -> MemoryClient {
    let metadata = r#"{
      "version": "2.0", "name": "demo", "description": "", "points": 64,
      "projection": "EPSG:4326",
      "hierarchy": { "firstChunkSize": 22, "stepSize": 4, "depth": 2 },
      "offset": [0.0, 0.0, 0.0], "scale": [0.001, 0.001, 0.001], "spacing": 1.0,
      "boundingBox": { "min": [-10.0, -10.0, 0.0], "max": [10.0, 10.0, 20.0] },
      "encoding": "DEFAULT",
      "attributes": [
        { "name": "position", "description": "", "size": 12, "numElements": 3,
          "elementSize": 4, "type": "int32", "min": [-10.0,-10.0,0.0], "max": [10.0,10.0,20.0] },
        { "name": "intensity", "description": "", "size": 2, "numElements": 1,
          "elementSize": 2, "type": "uint16", "min": [0], "max": [65535] },
        { "name": "classification", "description": "", "size": 1, "numElements": 1,
          "elementSize": 1, "type": "uint8", "min": [0], "max": [255] },
        { "name": "gps-time", "description": "", "size": 8, "numElements": 1,
          "elementSize": 8, "type": "double", "min": [0], "max": [1e9] }
      ]
    }"#;

    let mut octree = Vec::new();
    for i in 0..64 {
        let t = i as f64 / 64.0;
        let rec = record(
            -10.0 + 20.0 * t,
            -10.0 + 20.0 * t,
            20.0 * t,
            (i * 100) as u16,
            (i % 4) as u8,
            7.0e8 + i as f64,
        );
        octree.extend_from_slice(&rec);
    }

    // a single-node hierarchy: the root record carries the whole payload
    let mut hierarchy = [0u8; 22];
    hierarchy[0] = 1;
    LittleEndian::write_u32(&mut hierarchy[2..6], 64);
    LittleEndian::write_u32(&mut hierarchy[14..18], octree.len() as u32);

    let mut files = HashMap::new();
    files.insert("mem://demo/metadata.json".to_string(), Bytes::from(metadata));
    files.insert("mem://demo/hierarchy.bin".to_string(), Bytes::from(hierarchy.to_vec()));
    files.insert("mem://demo/octree.bin".to_string(), Bytes::from(octree));
    MemoryClient::new(files)
}

fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let mut engine =
        futures::executor::block_on(StreamingEngine::open_potree("mem://demo", dataset())).unwrap();

    let stats = futures::executor::block_on(engine.update()).unwrap();
    println!("first pass: {:?}", stats);

    // narrow the height window and stream again
    engine.set_height_filter(RangeFilter::enabled(0.0, 10.0));
    let stats = futures::executor::block_on(engine.update()).unwrap();
    println!("filtered pass: {:?}", stats);

    let snapshot = engine.render_snapshot();
    println!(
        "{} nodes resident, {} points budgeted, {} positions in snapshot",
        snapshot.loaded_nodes,
        snapshot.resident_points,
        snapshot.positions.len() / 3
    );
}
