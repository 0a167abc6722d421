use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use teleik::engine::SimEngine;
use teleik::input::{Button, InputEvent, ScriptedDevice};
use teleik::scene::build_scene;
use teleik::teleop::Viewer;
use teleik::{TeleopController, TeleopSettings};

/// Headless dual-arm teleoperation demo with a scripted mouse.
#[derive(Parser)]
struct Args {
    /// Stop after this many ticks (default: run until ctrl-c).
    #[arg(long)]
    ticks: Option<u64>,
    /// TOML settings file; defaults reproduce the reference setup.
    #[arg(long)]
    settings: Option<PathBuf>,
}

struct ConsoleViewer {
    remaining: Option<u64>,
    site: usize,
    ticks: u64,
}

impl Viewer for ConsoleViewer {
    fn is_running(&self) -> bool {
        self.remaining.is_none_or(|remaining| remaining > 0)
    }

    fn sync(&mut self, engine: &SimEngine) {
        if let Some(remaining) = &mut self.remaining {
            *remaining -= 1;
        }
        self.ticks += 1;
        if self.ticks % 200 == 0 {
            let p = engine.site_pose(self.site).translation.vector;
            info!(t = engine.time, x = p.x, y = p.y, z = p.z, "left end effector");
        }
    }
}

fn script() -> ScriptedDevice {
    let mut events = Vec::new();
    // drift the driven arm +x, open the grippers along the way
    for _ in 0..10 {
        events.push((
            Duration::from_millis(50),
            InputEvent::Scroll { dx: 1, dy: 0 },
        ));
    }
    // a little y and z motion
    for _ in 0..5 {
        events.push((
            Duration::from_millis(50),
            InputEvent::Scroll { dx: 0, dy: -1 },
        ));
    }
    for _ in 0..3 {
        events.push((
            Duration::from_millis(100),
            InputEvent::Click {
                button: Button::Right,
                pressed: true,
            },
        ));
    }
    ScriptedDevice::new(events)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let settings = match &args.settings {
        Some(path) => TeleopSettings::from_path(path)?,
        None => TeleopSettings::default(),
    };

    let (engine, setup) = build_scene()?;
    let site = engine.site_id(&setup.left.site)?;
    let mut controller =
        TeleopController::new(engine, settings, setup, Some(Box::new(script())))?;

    let stop = controller.stop_handle();
    ctrlc::set_handler(move || {
        stop.store(true, Ordering::Release);
        println!("Caught interrupt\nExiting...");
    })?;

    let mut viewer = ConsoleViewer {
        remaining: args.ticks,
        site,
        ticks: 0,
    };
    controller.run(&mut viewer);

    info!("done");
    Ok(())
}
