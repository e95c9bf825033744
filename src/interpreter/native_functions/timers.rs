// File: src/interpreter/native_functions/timers.rs
//
// Timer collaborator (`thread.*` builtins).
// Each started timer gets a worker thread that sleeps and posts a
// `TimerFired` into a channel. The evaluator drains the channel on its own
// thread (`Interpreter::pump_timers`), so script callbacks never run
// concurrently with the evaluator. Every start bumps a generation counter;
// completions from a stopped or restarted timer carry a stale generation and
// are dropped by `accept`.

use super::{arg_i64, arg_str, opt_arg, BuiltinError, BuiltinRegistry};
use crate::ast::Parameter;
use crate::interpreter::Value;
use crate::types::DataType;
use ahash::AHashMap;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Completion posted by a timer worker
#[derive(Debug, Clone, PartialEq)]
pub struct TimerFired {
    pub name: String,
    pub generation: u64,
}

#[derive(Debug)]
struct TimerEntry {
    callback: String,
    generation: u64,
    repeat: bool,
}

#[derive(Debug, Default)]
struct TimerState {
    timers: AHashMap<String, TimerEntry>,
    next_generation: u64,
}

/// Active-timer registry shared between the builtins and worker threads
#[derive(Debug, Clone)]
pub struct TimerRegistry {
    state: Arc<Mutex<TimerState>>,
    sender: Sender<TimerFired>,
}

/// Receiving end, owned by the evaluator
#[derive(Debug)]
pub struct TimerQueue {
    receiver: Receiver<TimerFired>,
}

pub fn channel() -> (TimerRegistry, TimerQueue) {
    let (sender, receiver) = mpsc::channel();
    let registry = TimerRegistry { state: Arc::new(Mutex::new(TimerState::default())), sender };
    (registry, TimerQueue { receiver })
}

impl TimerRegistry {
    fn lock(&self) -> MutexGuard<'_, TimerState> {
        // A panicking worker cannot leave the map half-updated
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Starts (or restarts) a timer that will request `callback` after `interval`
    pub fn start(&self, name: &str, interval: Duration, callback: &str, repeat: bool) {
        let key = name.to_lowercase();
        let generation = {
            let mut state = self.lock();
            state.next_generation += 1;
            let generation = state.next_generation;
            let entry = TimerEntry { callback: callback.to_string(), generation, repeat };
            if state.timers.insert(key.clone(), entry).is_some() {
                tracing::debug!(timer = %key, "timer restarted");
            }
            generation
        };
        tracing::debug!(timer = %key, ms = interval.as_millis() as u64, repeat, "timer started");

        let state = Arc::clone(&self.state);
        let sender = self.sender.clone();
        thread::spawn(move || loop {
            thread::sleep(interval);
            let alive = {
                let state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                state.timers.get(&key).map_or(false, |t| t.generation == generation)
            };
            if !alive {
                break;
            }
            if sender.send(TimerFired { name: key.clone(), generation }).is_err() || !repeat {
                break;
            }
        });
    }

    /// Deregisters a timer; returns whether it was active
    pub fn stop(&self, name: &str) -> bool {
        let removed = self.lock().timers.remove(&name.to_lowercase()).is_some();
        if removed {
            tracing::debug!(timer = %name.to_lowercase(), "timer stopped");
        }
        removed
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.lock().timers.contains_key(&name.to_lowercase())
    }

    /// Active timer names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock().timers.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn active_count(&self) -> usize {
        self.lock().timers.len()
    }

    /// Callback to run for a completion, or None when the completion is stale.
    /// A one-shot timer is deregistered once its completion is accepted.
    pub fn accept(&self, fired: &TimerFired) -> Option<String> {
        let mut state = self.lock();
        let entry = state.timers.get(&fired.name)?;
        if entry.generation != fired.generation {
            return None;
        }
        let callback = entry.callback.clone();
        if !entry.repeat {
            state.timers.remove(&fired.name);
        }
        tracing::debug!(timer = %fired.name, callback = %callback, "timer fired");
        Some(callback)
    }

    pub fn stop_all(&self) {
        self.lock().timers.clear();
    }
}

impl TimerQueue {
    /// Completions already queued, without blocking
    pub fn drain(&self) -> Vec<TimerFired> {
        self.receiver.try_iter().collect()
    }

    /// Waits up to `timeout` for the next completion
    pub fn wait(&self, timeout: Duration) -> Option<TimerFired> {
        match self.receiver.recv_timeout(timeout) {
            Ok(fired) => Some(fired),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

pub fn register(registry: &mut BuiltinRegistry, timers: &TimerRegistry) {
    let handle = timers.clone();
    registry.register(
        "thread.timerStart",
        vec![
            Parameter::required("name", DataType::String),
            Parameter::required("ms", DataType::Long),
            Parameter::required("callback", DataType::String),
            Parameter::optional("repeat", DataType::Bool, None),
        ],
        Some(DataType::String),
        move |args| {
            let name = arg_str(args, 0)?;
            let ms = arg_i64(args, 1)?;
            if ms < 0 {
                return Err(BuiltinError::invalid(format!("timer interval {} ms is negative", ms)));
            }
            let callback = arg_str(args, 2)?;
            let repeat = matches!(opt_arg(args, 3), Some(Value::Bool(true)));
            handle.start(name, Duration::from_millis(ms as u64), callback, repeat);
            Ok(Value::string(name))
        },
    );

    let handle = timers.clone();
    registry.register(
        "thread.timerStop",
        vec![Parameter::required("name", DataType::String)],
        Some(DataType::Bool),
        move |args| Ok(Value::Bool(handle.stop(arg_str(args, 0)?))),
    );

    let handle = timers.clone();
    registry.register(
        "thread.timerIsRunning",
        vec![Parameter::required("name", DataType::String)],
        Some(DataType::Bool),
        move |args| Ok(Value::Bool(handle.is_running(arg_str(args, 0)?))),
    );

    let handle = timers.clone();
    registry.register("thread.timerList", vec![], Some(DataType::Array), move |_| {
        Ok(Value::array(handle.names().into_iter().map(Value::string).collect()))
    });
}
