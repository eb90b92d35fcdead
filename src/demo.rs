use anyhow::{Context, Result};
use log::{error, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::config::DemoConfig;
use crate::error::P9813Error;
use crate::frame::Color;
use crate::session::{Command, Session};
use crate::spi::Bus;

/// Granularity of the stop-flag check while waiting between passes
const STOP_POLL: Duration = Duration::from_millis(50);

pub struct Demo<B: Bus> {
    session: Session<B>,
    config: DemoConfig,
    stop: Arc<AtomicBool>,
    rng: StdRng,
    pass: usize,
}

impl<B: Bus> Demo<B> {
    pub fn new(session: Session<B>, config: DemoConfig, stop: Arc<AtomicBool>) -> Self {
        Self::with_rng(session, config, stop, StdRng::from_entropy())
    }

    pub fn with_rng(
        session: Session<B>,
        config: DemoConfig,
        stop: Arc<AtomicBool>,
        rng: StdRng,
    ) -> Self {
        if config.colors.is_empty() {
            info!("No colors configured, using random colors");
        }
        Demo {
            session,
            config,
            stop,
            rng,
            pass: 0,
        }
    }

    /// Apply colors once, or keep going until the stop flag is raised
    pub fn run(&mut self) -> Result<()> {
        loop {
            self.step()?;

            if !self.config.repeat || self.stop.load(Ordering::SeqCst) {
                break;
            }
            if self.wait() {
                break;
            }
        }
        Ok(())
    }

    /// One pass: pick the chain colors and send them
    pub fn step(&mut self) -> Result<()> {
        let colors = self.next_colors();
        for (i, c) in colors.iter().enumerate() {
            info!("Setting LED {} to ({}, {}, {})", i, c.r, c.g, c.b);
        }
        self.send(Command::Chain(colors))
            .context(format!("Failed to update LEDs on pass {}", self.pass))?;
        self.pass += 1;
        Ok(())
    }

    /// Run, then finish. A failure while running wins over one while
    /// finishing; the latter is only logged in that case.
    pub fn run_and_finish(mut self) -> Result<Session<B>> {
        let result = self.run();
        match (result, self.finish()) {
            (Ok(()), finished) => finished,
            (Err(e), Ok(_)) => Err(e),
            (Err(e), Err(finish_err)) => {
                error!("Cleanup after failure also failed: {:#}", finish_err);
                Err(e)
            }
        }
    }

    /// Blank the chain if configured and close the session
    pub fn finish(mut self) -> Result<Session<B>> {
        if self.config.blank_on_exit {
            info!("Switching LEDs off");
            self.send(Command::Off)
                .context("Failed to switch LEDs off")?;
        }
        self.session.close();
        Ok(self.session)
    }

    pub fn session(&self) -> &Session<B> {
        &self.session
    }

    fn next_colors(&mut self) -> Vec<Color> {
        let chips = self.session.chips();
        if self.config.colors.is_empty() {
            (0..chips)
                .map(|_| Color::new(self.rng.gen(), self.rng.gen(), self.rng.gen()))
                .collect()
        } else {
            // Walk the configured pattern along the chain, one chip per pass
            let mut colors = self.config.colors.clone();
            let shift = self.pass % colors.len();
            colors.rotate_right(shift);
            colors
        }
    }

    /// Send with the configured number of retries for transient bus errors
    fn send(&mut self, command: Command) -> std::result::Result<(), P9813Error> {
        let mut attempt = 0;
        loop {
            match self.session.set(command.clone()) {
                Err(e) if e.is_transient() && attempt < self.config.retries => {
                    attempt += 1;
                    warn!(
                        "Transfer failed (attempt {} of {}): {}",
                        attempt,
                        self.config.retries + 1,
                        e
                    );
                }
                result => return result,
            }
        }
    }

    /// Sleep for the configured interval; true if stopped meanwhile
    fn wait(&self) -> bool {
        let deadline = Instant::now() + Duration::from_millis(self.config.interval_ms);
        loop {
            if self.stop.load(Ordering::SeqCst) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(STOP_POLL.min(deadline - now));
        }
    }
}
