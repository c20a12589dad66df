// Only the tests build this off Windows.
#![cfg_attr(not(target_os = "windows"), allow(dead_code))]

use crate::error;
use iphelper::api::NotifyApi;
use iphelper::{ChangeEvent, ChangeNotify};
use log::{info, warn};

/// Counts wakes and stopped watchers to decide when the loop ends.
#[derive(Debug)]
pub struct Tally {
    limit: Option<usize>,
    seen: usize,
    running: [bool; 2],
}

impl Tally {
    pub fn new(address: bool, route: bool, limit: Option<usize>) -> Self {
        Self {
            limit,
            seen: 0,
            running: [address, route],
        }
    }

    /// Returns false once the loop should stop.
    pub fn record(&mut self, event: &ChangeEvent) -> bool {
        match &event.error {
            None => {
                self.seen += 1;
                info!("{} change #{}", event.kind, self.seen);
            }
            Some(err) => {
                warn!("Stopped watching {} changes: {}", event.kind, err);
                self.running[event.kind.index()] = false;
            }
        }

        let limited = self.limit.is_some_and(|limit| self.seen >= limit);
        !limited && self.running.iter().any(|running| *running)
    }

    pub fn seen(&self) -> usize {
        self.seen
    }
}

pub async fn run<A: NotifyApi>(notify: &ChangeNotify<A>, mut tally: Tally) -> error::Result<usize> {
    loop {
        tokio::select! {
            event = notify.recv() => {
                let Some(event) = event else { break };
                if !tally.record(&event) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    notify.close()?;
    Ok(tally.seen())
}
