/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! The auto-scroll controller.
//!
//! A started run is a spawned task that advances the page on a fixed
//! tick, slows near section centers, and ends at the bottom of the page
//! or on `stop`. The page is reached only through the two ports below,
//! so the controller never touches a browser directly and runs under a
//! paused clock in tests.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

use crate::types::{CruiseError, ScrollMetrics, SectionPlacement};

// ---------------------------------------------------------------------------
// Ports
// ---------------------------------------------------------------------------

/// Read and move the page.
pub trait ScrollSurface {
    /// Advance the vertical scroll position by `dy` CSS pixels.
    fn scroll_by(&self, dy: f64) -> impl Future<Output = Result<(), CruiseError>> + Send;

    /// Current scroll position and page extent.
    fn metrics(&self) -> impl Future<Output = Result<ScrollMetrics, CruiseError>> + Send;

    /// Viewport-relative boxes of the candidate sections, document order.
    fn placements(&self) -> impl Future<Output = Result<Vec<SectionPlacement>, CruiseError>> + Send;
}

/// Tell the page that scroll activity happened.
pub trait ScrollNotifier {
    fn notify_scroll_activity(&self) -> impl Future<Output = Result<(), CruiseError>> + Send;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Tuning for a scroll run.
#[derive(Debug, Clone)]
pub struct ScrollConfig {
    /// Pixels advanced per tick at cruising pace (default: 10).
    pub normal_speed: f64,
    /// Pixels advanced per tick while slowed (default: 1).
    pub slow_speed: f64,
    /// How long a triggered section keeps the run slowed (default: 3000 ms).
    pub slowdown: Duration,
    /// Tick period (default: 16 ms, roughly one frame).
    pub tick: Duration,
    /// How close a section center must be to the viewport center to
    /// trigger a slowdown, in pixels (default: 50).
    pub center_threshold: f64,
    /// Delay before the first tick (default: none).
    pub startup_delay: Duration,
}

impl Default for ScrollConfig {
    fn default() -> Self {
        Self {
            normal_speed: 10.0,
            slow_speed: 1.0,
            slowdown: Duration::from_millis(3000),
            tick: Duration::from_millis(16),
            center_threshold: 50.0,
            startup_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Speed {
    Normal,
    Slow,
}

/// Value carried by the run watch channel. The generation lets a task
/// notice that a stop/start pair inside one tick period handed the flag
/// to a newer run.
#[derive(Debug, Clone, Copy)]
struct RunState {
    running: bool,
    generation: u64,
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Drives one page's auto-scroll. At most one run is active at a time;
/// `start` while running and `stop` while idle are logged no-ops.
pub struct ScrollController<S, N> {
    surface: S,
    notifier: N,
    config: ScrollConfig,
    active: Arc<watch::Sender<RunState>>,
}

impl<S, N> ScrollController<S, N>
where
    S: ScrollSurface + Clone + Send + Sync + 'static,
    N: ScrollNotifier + Clone + Send + Sync + 'static,
{
    pub fn new(surface: S, notifier: N, config: ScrollConfig) -> Self {
        let (active, _) = watch::channel(RunState {
            running: false,
            generation: 0,
        });
        Self {
            surface,
            notifier,
            config,
            active: Arc::new(active),
        }
    }

    /// Begin a run that skips the given section ids. A second start
    /// while a run is active changes nothing.
    pub fn start(&self, exclusions: HashSet<String>) {
        let mut generation = 0;
        let started = self.active.send_if_modified(|state| {
            if state.running {
                false
            } else {
                state.running = true;
                state.generation += 1;
                generation = state.generation;
                true
            }
        });
        if !started {
            info!("auto-scroll already running");
            return;
        }
        info!(excluded = exclusions.len(), "auto-scroll started");

        let surface = self.surface.clone();
        let notifier = self.notifier.clone();
        let config = self.config.clone();
        let active = Arc::clone(&self.active);
        tokio::spawn(async move {
            run_loop(surface, notifier, config, exclusions, generation, &active).await;
        });
    }

    /// End the active run. The run task exits at its next tick boundary
    /// without touching the page again.
    pub fn stop(&self) {
        let stopped = self.active.send_if_modified(|state| {
            if state.running {
                state.running = false;
                true
            } else {
                false
            }
        });
        if stopped {
            info!("auto-scroll stopped");
        } else {
            info!("no auto-scroll in progress, nothing to stop");
        }
    }

    pub fn is_running(&self) -> bool {
        self.active.borrow().running
    }

    /// Resolve once no run is active. Returns immediately when idle.
    pub async fn wait_until_idle(&self) {
        let mut rx = self.active.subscribe();
        let _ = rx.wait_for(|state| !state.running).await;
    }
}

// ---------------------------------------------------------------------------
// Run loop
// ---------------------------------------------------------------------------

async fn run_loop<S, N>(
    surface: S,
    notifier: N,
    config: ScrollConfig,
    exclusions: HashSet<String>,
    generation: u64,
    active: &watch::Sender<RunState>,
) where
    S: ScrollSurface,
    N: ScrollNotifier,
{
    let mut speed = Speed::Normal;
    let mut slow_until: Option<Instant> = None;
    let mut triggered: HashSet<String> = HashSet::new();

    let first = Instant::now() + config.startup_delay + config.tick;
    let mut ticks = interval_at(first, config.tick);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticks.tick().await;
        let state = *active.borrow();
        if !state.running || state.generation != generation {
            break;
        }

        // The slow phase ends at its deadline whether or not anything
        // else happened; a run that ends earlier retires the deadline
        // with it.
        if let Some(deadline) = slow_until {
            if Instant::now() >= deadline {
                speed = Speed::Normal;
                slow_until = None;
                debug!("speed restored");
            }
        }

        let step = match speed {
            Speed::Normal => config.normal_speed,
            Speed::Slow => config.slow_speed,
        };
        if let Err(err) = surface.scroll_by(step).await {
            warn!("scroll step failed: {err}");
            break;
        }
        if let Err(err) = notifier.notify_scroll_activity().await {
            warn!("scroll notification failed: {err}");
            break;
        }

        let metrics = match surface.metrics().await {
            Ok(metrics) => metrics,
            Err(err) => {
                warn!("metrics read failed: {err}");
                break;
            }
        };
        if metrics.at_bottom() {
            info!("reached bottom, auto-scroll stopped");
            break;
        }

        if slow_until.is_some() {
            continue;
        }

        let placements = match surface.placements().await {
            Ok(placements) => placements,
            Err(err) => {
                warn!("section scan failed: {err}");
                break;
            }
        };
        let viewport_center = metrics.viewport_height / 2.0;
        for section in &placements {
            if exclusions.contains(&section.id) {
                continue;
            }
            if (section.center() - viewport_center).abs() < config.center_threshold
                && !triggered.contains(&section.id)
            {
                triggered.insert(section.id.clone());
                speed = Speed::Slow;
                slow_until = Some(Instant::now() + config.slowdown);
                debug!(section = %section.id, "slowing near section center");
                break;
            }
        }
    }

    // Natural end and stop() converge here. A newer run may own the
    // flag by now; if so it is left alone.
    active.send_if_modified(|state| {
        if state.running && state.generation == generation {
            state.running = false;
            true
        } else {
            false
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = ScrollConfig::default();
        assert_eq!(config.normal_speed, 10.0);
        assert_eq!(config.slow_speed, 1.0);
        assert_eq!(config.slowdown, Duration::from_millis(3000));
        assert_eq!(config.tick, Duration::from_millis(16));
        assert_eq!(config.center_threshold, 50.0);
        assert_eq!(config.startup_delay, Duration::ZERO);
    }
}
