//! Streams a local COPC file through the engine:
//! `cargo run --example stream_native -- /path/to/track.copc.laz`

use backscatter::camera::CameraState;
use backscatter::resource::file::FileClient;
use backscatter::StreamingEngine;
use glam::DVec3;
use std::sync::Arc;

#[tokio::main(flavor = "current_thread")]
pub async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let path = std::env::args().nth(1).expect("usage: stream_native <file.copc.laz>");
    let url = format!("file://{}", path);

    let file_client = Arc::new(FileClient);
    let mut engine = StreamingEngine::open_copc(&url, file_client).await.unwrap();

    engine.set_point_budget(2_000_000);
    engine.set_camera(CameraState::looking_at(DVec3::new(0.0, 0.0, 4000.0), DVec3::ZERO));

    let stats = engine.update().await.unwrap();
    println!("pass: {:#?}", stats);
    println!("engine: {:#?}", engine.stats());

    for (node, block) in engine.loaded_blocks().take(8) {
        println!("{}: {} points resident", node.name, block.len());
    }
}
