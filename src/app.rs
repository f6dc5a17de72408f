//! Application orchestration: startup, signal handling, shutdown cascade.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::monitor::EnvMonitor;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct App {
    monitor: EnvMonitor,
    shutdown: Arc<AtomicBool>,
}

impl App {
    /// Start every component; any failure here aborts startup.
    pub fn new(config: Config) -> Result<Self> {
        log::info!(
            "site {} ({}) at {:.4} E {:.4} N, {} m",
            config.site.name,
            config.site.device_id,
            config.site.longitude,
            config.site.latitude,
            config.site.altitude
        );
        let monitor = EnvMonitor::start(config)?;
        Ok(Self {
            monitor,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Block until SIGINT/SIGTERM, then run the shutdown cascade.
    pub fn run(&mut self) -> Result<()> {
        let mut signals = Signals::new([SIGINT, SIGTERM])
            .map_err(|e| Error::Other(format!("signal handler: {}", e)))?;
        let flag = Arc::clone(&self.shutdown);
        let handle = signals.handle();
        let watcher = std::thread::Builder::new()
            .name("signals".to_string())
            .spawn(move || {
                for signal in signals.forever() {
                    log::info!("received signal {}, shutting down", signal);
                    flag.store(true, Ordering::Relaxed);
                    break;
                }
            })
            .map_err(|e| Error::Other(format!("spawn signals: {}", e)))?;

        log::info!("daemon goes running");
        let mut ticks = 0u32;
        while !self.shutdown.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(200));
            ticks += 1;
            if ticks % 1500 == 0 {
                // five-minute heartbeat with the schedule phase
                log::debug!("observation phase: {:?}", self.monitor.phase());
            }
        }

        handle.close();
        let _ = watcher.join();
        self.monitor.stop();
        log::info!("daemon stopped");
        Ok(())
    }
}
