//! In-process runtime double.
//!
//! Records every launch, uploaded archive and removed path, serves canned
//! logs, and can delay each `stop` by a random amount to exercise concurrent
//! shutdown.

use std::collections::BTreeMap;
use std::ops::Range;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use keel_core::ByteStream;
use rand::Rng;
use tokio::io::AsyncReadExt;

use crate::error::{ContainerError, ContainerResult};
use crate::runtime::{ContainerRuntime, LogStream, RunSpec};

#[derive(Debug, Clone)]
pub struct FakeProcess {
    pub id: String,
    pub spec: RunSpec,
    pub running: bool,
    pub logs: Vec<u8>,
    /// Archives passed to `copy_into`, in order.
    pub uploads: Vec<Vec<u8>>,
    /// Paths passed to `remove_files`, in order.
    pub removed: Vec<String>,
}

#[derive(Default)]
struct FakeState {
    processes: Vec<FakeProcess>,
    stops: Vec<String>,
}

impl FakeState {
    fn find_mut(&mut self, id: &str) -> Option<&mut FakeProcess> {
        if id.is_empty() {
            return None;
        }
        self.processes.iter_mut().find(|p| p.id.starts_with(id))
    }
}

pub struct FakeRuntime {
    state: Mutex<FakeState>,
    id_len: usize,
    stop_delay_ms: Option<Range<u64>>,
    address: String,
    fail_runs: AtomicBool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeState::default()),
            id_len: 64,
            stop_delay_ms: None,
            address: "127.0.0.1".to_string(),
            fail_runs: AtomicBool::new(false),
        }
    }

    /// Length of the ids handed out by `run`.
    pub fn with_id_len(mut self, len: usize) -> Self {
        self.id_len = len;
        self
    }

    /// Sleep a random number of milliseconds in `range` inside every `stop`.
    pub fn with_stop_delay(mut self, range: Range<u64>) -> Self {
        self.stop_delay_ms = Some(range);
        self
    }

    /// Address reported for every process.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Make every subsequent `run` fail like a broken engine.
    pub fn fail_runs(&self, fail: bool) {
        self.fail_runs.store(fail, Ordering::SeqCst);
    }

    /// Register a running process directly, as if started elsewhere.
    pub fn seed(&self, spec: RunSpec) -> String {
        let id = self.next_id();
        self.state.lock().expect("fake state").processes.push(FakeProcess {
            id: id.clone(),
            spec,
            running: true,
            logs: Vec::new(),
            uploads: Vec::new(),
            removed: Vec::new(),
        });
        id
    }

    pub fn set_logs(&self, id: &str, logs: impl Into<Vec<u8>>) {
        let mut state = self.state.lock().expect("fake state");
        if let Some(p) = state.find_mut(id) {
            p.logs = logs.into();
        }
    }

    /// The process `id` (full id or handle) refers to.
    pub fn process(&self, id: &str) -> Option<FakeProcess> {
        self.state.lock().expect("fake state").find_mut(id).cloned()
    }

    pub fn processes(&self) -> Vec<FakeProcess> {
        self.state.lock().expect("fake state").processes.clone()
    }

    /// Specs passed to `run`, in launch order.
    pub fn runs(&self) -> Vec<RunSpec> {
        self.processes().into_iter().map(|p| p.spec).collect()
    }

    /// Ids passed to `stop`, in completion order.
    pub fn stops(&self) -> Vec<String> {
        self.state.lock().expect("fake state").stops.clone()
    }

    pub fn running_count(&self) -> usize {
        self.processes().iter().filter(|p| p.running).count()
    }

    fn next_id(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.id_len)
            .map(|_| std::char::from_digit(rng.gen_range(0..16), 16).unwrap_or('0'))
            .collect()
    }
}

impl Default for FakeRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    fn name(&self) -> &str {
        "fake"
    }

    async fn run(&self, spec: &RunSpec) -> ContainerResult<String> {
        if self.fail_runs.load(Ordering::SeqCst) {
            return Err(ContainerError::CommandFailed {
                command: "fake run".to_string(),
                status: "exit status: 125".to_string(),
                stderr: "engine unavailable".to_string(),
            });
        }
        Ok(self.seed(spec.clone()))
    }

    async fn logs(&self, id: &str) -> ContainerResult<LogStream> {
        let mut state = self.state.lock().expect("fake state");
        let process = state
            .find_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        Ok(LogStream::from_reader(std::io::Cursor::new(process.logs.clone())))
    }

    async fn stop(&self, id: &str) -> ContainerResult<()> {
        if self.state.lock().expect("fake state").find_mut(id).is_none() {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        if let Some(range) = &self.stop_delay_ms {
            let ms = rand::thread_rng().gen_range(range.clone());
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        let mut state = self.state.lock().expect("fake state");
        if let Some(p) = state.find_mut(id) {
            p.running = false;
        }
        state.stops.push(id.to_string());
        Ok(())
    }

    async fn list_by_labels(
        &self,
        labels: &BTreeMap<String, String>,
    ) -> ContainerResult<Vec<String>> {
        let state = self.state.lock().expect("fake state");
        Ok(state
            .processes
            .iter()
            .filter(|p| p.running)
            .filter(|p| labels.iter().all(|(k, v)| p.spec.labels.get(k) == Some(v)))
            .map(|p| p.id.clone())
            .collect())
    }

    async fn address(&self, id: &str) -> ContainerResult<String> {
        let mut state = self.state.lock().expect("fake state");
        state
            .find_mut(id)
            .map(|_| self.address.clone())
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))
    }

    async fn copy_into(&self, id: &str, mut archive: ByteStream) -> ContainerResult<()> {
        if self.state.lock().expect("fake state").find_mut(id).is_none() {
            return Err(ContainerError::NotFound(id.to_string()));
        }
        let mut bytes = Vec::new();
        archive
            .read_to_end(&mut bytes)
            .await
            .map_err(|source| ContainerError::Stream {
                command: "fake cp".to_string(),
                source,
            })?;
        let mut state = self.state.lock().expect("fake state");
        let process = state
            .find_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        process.uploads.push(bytes);
        Ok(())
    }

    async fn remove_files(&self, id: &str, paths: &[String]) -> ContainerResult<()> {
        let mut state = self.state.lock().expect("fake state");
        let process = state
            .find_mut(id)
            .ok_or_else(|| ContainerError::NotFound(id.to_string()))?;
        process.removed.extend(paths.iter().cloned());
        Ok(())
    }
}
