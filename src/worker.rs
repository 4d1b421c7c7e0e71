//! Actuator command dispatch.
//!
//! A strike occupies a rod for a few hundred milliseconds of pulse train, far
//! longer than a frame. Each actuated row therefore runs on its own thread fed
//! through a channel, and the control loop only ever enqueues work. A row that
//! is still busy drops new commands; a row that does not finish in time is
//! faulted and left alone for the rest of the game.

use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::{self, error::TryRecvError};

use crate::actuator::{Row, RowActuator};
use crate::config::{Config, RowConfig};
use crate::controller::RowCommander;
use crate::error::{ActuatorError, Error};
use crate::motor::MotorDriver;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RowCommand {
    MoveTo(f32),
    RotateTo(f32),
    Kick { angle: f32, dx: f32, dy: f32 },
    Center,
}

impl RowCommand {
    pub fn apply<D: MotorDriver>(self, actuator: &mut RowActuator<D>) -> Result<u32, ActuatorError> {
        match self {
            RowCommand::MoveTo(target) => actuator.move_to(target),
            RowCommand::RotateTo(target) => actuator.rotate_to(target),
            RowCommand::Kick { angle, dx, dy } => actuator.kick_angle(angle, dx, dy),
            RowCommand::Center => actuator.center(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Idle,
    Busy,
    /// Timed out or lost its worker; takes no more commands
    Faulted,
}

/// Fate of a submitted command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Sent,
    /// Row still busy with the previous maneuver
    Dropped,
    /// Row faulted or not actuated, or the command was rejected on the spot
    Refused,
}

#[derive(Debug)]
struct Completion {
    row: Row,
    result: Result<u32, ActuatorError>,
}

fn run_worker<D: MotorDriver>(
    mut actuator: RowActuator<D>,
    mut commands: mpsc::UnboundedReceiver<RowCommand>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    let index = actuator.row().index;

    if let Err(err) = actuator.start() {
        log::warn!("row {}: starting motors failed: {}", index, err);
    }

    while let Some(command) = commands.blocking_recv() {
        log::trace!("row {}: executing {:?}", index, command);

        let result = command.apply(&mut actuator);
        let completion = Completion {
            row: actuator.row().clone(),
            result,
        };

        if completions.send(completion).is_err() {
            break;
        }
    }

    if let Err(err) = actuator.stop() {
        log::warn!("row {}: releasing motors failed: {}", index, err);
    }

    log::debug!("row {}: worker finished", index);
}

/// Control-loop side of one row worker.
pub struct RowHandle {
    index: u8,
    commands: Option<mpsc::UnboundedSender<RowCommand>>,
    completions: mpsc::UnboundedReceiver<Completion>,
    status: RowStatus,
    busy_since: Option<Instant>,
    timeout: Duration,
    row: Row,
    last_result: Option<Result<u32, ActuatorError>>,
    thread: Option<JoinHandle<()>>,
}

impl RowHandle {
    pub fn spawn<D: MotorDriver + 'static>(
        actuator: RowActuator<D>,
        timeout: Duration,
    ) -> Result<Self, Error> {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (done_tx, done_rx) = mpsc::unbounded_channel();

        let row = actuator.row().clone();
        let index = row.index;

        let thread = thread::Builder::new()
            .name(format!("row-{}", index))
            .spawn(move || run_worker(actuator, cmd_rx, done_tx))?;

        Ok(Self {
            index,
            commands: Some(cmd_tx),
            completions: done_rx,
            status: RowStatus::Idle,
            busy_since: None,
            timeout,
            row,
            last_result: None,
            thread: Some(thread),
        })
    }

    #[inline]
    pub fn index(&self) -> u8 {
        self.index
    }

    /// Pose reported with the latest completed command.
    #[inline]
    pub fn row(&self) -> &Row {
        &self.row
    }

    #[inline]
    pub fn status(&self) -> RowStatus {
        self.status
    }

    #[inline]
    pub fn last_result(&self) -> Option<&Result<u32, ActuatorError>> {
        self.last_result.as_ref()
    }

    fn fault(&mut self) {
        self.status = RowStatus::Faulted;
        self.busy_since = None;
    }

    /// Collects completions and enforces the maneuver timeout.
    pub fn poll(&mut self) -> RowStatus {
        loop {
            match self.completions.try_recv() {
                Ok(done) => {
                    self.row = done.row;
                    self.last_result = Some(done.result);

                    if self.status == RowStatus::Busy {
                        self.status = RowStatus::Idle;
                        self.busy_since = None;
                    }
                }

                Err(TryRecvError::Empty) => break,

                Err(TryRecvError::Disconnected) => {
                    if self.status != RowStatus::Faulted {
                        log::error!("row {}: worker thread is gone", self.index);
                        self.fault();
                    }

                    break;
                }
            }
        }

        if let Some(since) = self.busy_since {
            if since.elapsed() > self.timeout {
                log::warn!(
                    "row {}: maneuver not finished after {:?}, row faulted",
                    self.index,
                    self.timeout
                );
                self.fault();
            }
        }

        self.status
    }

    pub fn submit(&mut self, command: RowCommand) -> Result<Dispatch, Error> {
        match self.poll() {
            RowStatus::Faulted => {
                log::debug!("row {}: faulted, refusing {:?}", self.index, command);
                Ok(Dispatch::Refused)
            }

            RowStatus::Busy => {
                log::debug!("row {}: busy, dropping {:?}", self.index, command);
                Ok(Dispatch::Dropped)
            }

            RowStatus::Idle => {
                let sent = match &self.commands {
                    Some(tx) => tx.send(command).is_ok(),
                    None => false,
                };

                if !sent {
                    self.fault();
                    return Err(Error::WorkerDisconnected(self.index));
                }

                self.status = RowStatus::Busy;
                self.busy_since = Some(Instant::now());

                Ok(Dispatch::Sent)
            }
        }
    }

    /// Polls until the row is no longer busy or `limit` runs out.
    pub fn settle(&mut self, limit: Duration) -> RowStatus {
        let deadline = Instant::now() + limit;

        while self.poll() == RowStatus::Busy && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }

        self.status
    }
}

impl Drop for RowHandle {
    fn drop(&mut self) {
        // Closing the channel lets the worker finish its maneuver and exit.
        self.commands.take();

        if let Some(thread) = self.thread.take() {
            if self.status == RowStatus::Faulted {
                log::warn!("row {}: leaving faulted worker detached", self.index);
            } else if thread.join().is_err() {
                log::error!("row {}: worker panicked", self.index);
            }
        }
    }
}

/// One worker per actuated row.
pub struct RowPool {
    handles: Vec<RowHandle>,
}

impl RowPool {
    /// Spawns workers for the actuated rows, with motors from `driver_for`.
    pub fn spawn<F>(config: &Config, mut driver_for: F) -> Result<Self, Error>
    where
        F: FnMut(&RowConfig) -> Box<dyn MotorDriver>,
    {
        let timeout = Duration::from_millis(config.controller.maneuver_timeout_ms);

        let handles = config
            .rows
            .iter()
            .filter(|r| r.actuated)
            .map(|r| RowHandle::spawn(RowActuator::new(r, driver_for(r)), timeout))
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("{} row workers running", handles.len());

        Ok(Self { handles })
    }

    pub fn handle(&self, index: u8) -> Option<&RowHandle> {
        self.handles.iter().find(|h| h.index == index)
    }

    fn handle_mut(&mut self, index: u8) -> Option<&mut RowHandle> {
        self.handles.iter_mut().find(|h| h.index == index)
    }

    pub fn handles(&self) -> &[RowHandle] {
        &self.handles
    }

    /// Waits for every row to finish its current maneuver.
    pub fn settle(&mut self, limit: Duration) {
        for h in &mut self.handles {
            h.settle(limit);
        }
    }
}

impl RowCommander for RowPool {
    fn dispatch(&mut self, row: u8, command: RowCommand) -> Result<Dispatch, Error> {
        match self.handle_mut(row) {
            Some(h) => h.submit(command),
            None => {
                log::warn!("row {} has no worker, {:?} refused", row, command);
                Ok(Dispatch::Refused)
            }
        }
    }

    fn linear_position(&self, row: u8) -> Option<f32> {
        self.handle(row).map(|h| h.row.linear_position)
    }
}

/// Runs every command to completion on the calling thread, the way a single
/// synchronous control loop would.
pub struct InlineRows<D> {
    actuators: Vec<RowActuator<D>>,
    results: Vec<Option<Result<u32, ActuatorError>>>,
}

impl<D: MotorDriver> InlineRows<D> {
    pub fn new(config: &Config, mut driver_for: impl FnMut(&RowConfig) -> D) -> Self {
        let actuators = config
            .rows
            .iter()
            .filter(|r| r.actuated)
            .map(|r| RowActuator::new(r, driver_for(r)))
            .collect::<Vec<_>>();

        Self {
            results: vec![None; actuators.len()],
            actuators,
        }
    }

    pub fn start(&mut self) -> Result<(), ActuatorError> {
        self.actuators.iter_mut().try_for_each(|a| a.start())
    }

    pub fn actuator(&self, index: u8) -> Option<&RowActuator<D>> {
        self.actuators.iter().find(|a| a.row().index == index)
    }

    /// Outcome of the latest command run on row `index`.
    pub fn last_result(&self, index: u8) -> Option<&Result<u32, ActuatorError>> {
        let slot = self.actuators.iter().position(|a| a.row().index == index)?;

        self.results[slot].as_ref()
    }
}

impl<D: MotorDriver> RowCommander for InlineRows<D> {
    fn dispatch(&mut self, row: u8, command: RowCommand) -> Result<Dispatch, Error> {
        let slot = match self.actuators.iter().position(|a| a.row().index == row) {
            Some(slot) => slot,
            None => return Ok(Dispatch::Refused),
        };

        // Rejections are already logged by the actuator and are not fatal.
        let result = command.apply(&mut self.actuators[slot]);
        let dispatch = if result.is_ok() {
            Dispatch::Sent
        } else {
            Dispatch::Refused
        };
        self.results[slot] = Some(result);

        Ok(dispatch)
    }

    fn linear_position(&self, row: u8) -> Option<f32> {
        self.actuator(row).map(|a| a.row().linear_position)
    }
}
