//! Tile mesh construction example.
//!
//! Builds a ring of composite tiles, each an assembly wrapping a core and a
//! router, partitions them across two ranks, then walks the whole pipeline:
//! validate, project the graph for rank 0, flatten what remains, and hand
//! the result to the recording engine stub.

use std::sync::Arc;

use devgraph::backend::{emit, RecordingBackend};
use devgraph::{
    Device, DeviceClass, DeviceGraph, FlattenPolicy, GraphResult, PortDescriptor,
};

const TILES: u32 = 4;
const RANKS: u32 = 2;

// -----------------------------------------------------------------------------
// Device classes
// -----------------------------------------------------------------------------

fn core_class() -> Arc<DeviceClass> {
    DeviceClass::library("Core", "proc.Core")
        .with_port(PortDescriptor::single("net", "net").with_latency("1ns"))
        .build()
}

fn router_class() -> Arc<DeviceClass> {
    DeviceClass::library("Router", "merlin.hr_router")
        .with_port(PortDescriptor::single("host", "net"))
        .with_port(PortDescriptor::bounded("ring", "ring", 2).optional())
        .build()
}

/// A tile wraps one core and one router; its `left`/`right` ports bind to the
/// router's ring ports.
fn tile_class() -> Arc<DeviceClass> {
    let core = core_class();
    let router = router_class();
    let expander = move |dev: &Device, g: &mut DeviceGraph| -> GraphResult<()> {
        let c = Device::named(&core, dev.scoped_name("core"));
        let r = Device::named(&router, dev.scoped_name("router"));
        g.link(c.port("net")?, r.port("host")?, None)?;
        g.link(dev.port("left")?, r.port_indexed("ring", 0)?, None)?;
        g.link(dev.port("right")?, r.port_indexed("ring", 1)?, None)?;
        Ok(())
    };
    DeviceClass::assembly("Tile", expander)
        .with_port(PortDescriptor::single("left", "ring").optional())
        .with_port(PortDescriptor::single("right", "ring").optional())
        .build()
}

// -----------------------------------------------------------------------------
// Main
// -----------------------------------------------------------------------------

fn main() -> GraphResult<()> {
    devgraph::init_logging("info");

    let tile = tile_class();
    let tiles: Vec<Device> = (0..TILES)
        .map(|i| Device::named(&tile, format!("tile{i}")))
        .collect();
    for (i, dev) in tiles.iter().enumerate() {
        dev.set_partition(i as u32 % RANKS, 0);
    }

    // Ring topology: each tile's right port meets its neighbor's left port.
    let mut graph = DeviceGraph::new();
    for i in 0..TILES as usize {
        let next = (i + 1) % TILES as usize;
        graph.link(
            tiles[i].port("right")?,
            tiles[next].port("left")?,
            Some("10ns"),
        )?;
    }

    graph.check_partition()?;
    println!("full graph: {}", graph.summary());

    // Project for rank 0, then expand whatever stayed opaque.
    let mut local = graph.follow_links(0)?;
    local.flatten(FlattenPolicy::Full)?;
    local.verify_links()?;
    println!("rank 0 graph: {}", local.summary());

    let mut backend = RecordingBackend::new();
    emit(&local, &mut backend)?;
    println!(
        "emitted {} components, {} connections",
        backend.component_count(),
        backend.connection_count()
    );
    Ok(())
}
